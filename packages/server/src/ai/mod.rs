mod client;
mod mentions;

pub use client::{AiEvent, AiProvider, HttpAiClient};
pub use mentions::{AiKind, extract_ai_mentions, strip_mention};
