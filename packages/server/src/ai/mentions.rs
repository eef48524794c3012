use once_cell::sync::Lazy;
use regex::Regex;

/// AI assistants addressable by mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiKind {
    WayneAi,
    ConsultingAi,
}

impl AiKind {
    pub const ALL: [AiKind; 2] = [AiKind::WayneAi, AiKind::ConsultingAi];

    /// The handle as it appears after `@` in message content, and as the
    /// persisted `aiType`.
    pub fn handle(&self) -> &'static str {
        match self {
            AiKind::WayneAi => "wayneAI",
            AiKind::ConsultingAi => "consultingAI",
        }
    }

    pub fn parse(handle: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.handle() == handle)
    }
}

static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"@(wayneAI|consultingAI)\b").expect("mention pattern is valid")
});

/// Every distinct AI handle mentioned in the content, in first-seen order.
pub fn extract_ai_mentions(content: &str) -> Vec<AiKind> {
    let mut seen = Vec::new();
    for capture in MENTION_RE.captures_iter(content) {
        if let Some(kind) = AiKind::parse(&capture[1]) {
            if !seen.contains(&kind) {
                seen.push(kind);
            }
        }
    }
    seen
}

/// The query sent to the AI service: original content with this mention
/// removed.
pub fn strip_mention(content: &str, kind: AiKind) -> String {
    content
        .replace(&format!("@{}", kind.handle()), "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_are_extracted_once_each() {
        let found = extract_ai_mentions("@wayneAI explain @consultingAI and @wayneAI again");
        assert_eq!(found, vec![AiKind::WayneAi, AiKind::ConsultingAi]);
    }

    #[test]
    fn partial_handles_do_not_match() {
        assert!(extract_ai_mentions("email me at test@wayneAIx.com").is_empty());
        assert!(extract_ai_mentions("no mentions here").is_empty());
    }

    #[test]
    fn stripping_removes_the_handle_and_tidies_whitespace() {
        let query = strip_mention("@wayneAI   what is rust?", AiKind::WayneAi);
        assert_eq!(query, "what is rust?");
    }
}
