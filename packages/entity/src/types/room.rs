use serde::{Deserialize, Serialize};

use crate::types::user::UserSummary;

/// A chat room. The room document exclusively owns its participant list and
/// password; the same JSON shape is written to the hot tier under
/// `chat_room:<id>` and to the durable `rooms` collection.
///
/// Invariants: the creator is always a participant, participant ids are
/// unique, and `has_password` holds exactly when `password` is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub creator: UserSummary,
    pub participants: Vec<UserSummary>,
    #[serde(rename = "hasPassword")]
    pub has_password: bool,
    /// Stored plaintext, compared by equality on join. Flagged in DESIGN.md;
    /// intentionally not hashed to stay wire-compatible with the deployed
    /// system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "participantsCount")]
    pub participants_count: usize,
    /// Epoch milliseconds, server-assigned.
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

impl Room {
    pub fn new(
        id: String,
        name: String,
        creator: UserSummary,
        password: Option<String>,
        created_at: i64,
    ) -> Self {
        let password = password.filter(|p| !p.is_empty());
        let creator = creator.without_image();
        Self {
            id,
            name: name.trim().to_string(),
            participants: vec![creator.clone()],
            has_password: password.is_some(),
            password,
            creator,
            participants_count: 1,
            created_at,
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.id == user_id)
    }

    /// Appends the user, preserving participant uniqueness. Returns whether
    /// the set changed.
    pub fn add_participant(&mut self, user: UserSummary) -> bool {
        if self.is_participant(&user.id) {
            return false;
        }
        self.participants.push(user.without_image());
        self.participants_count = self.participants.len();
        true
    }

    /// Removes the user from the participant set; the creator entry is kept
    /// so the room never loses its owner. Returns whether the set changed.
    pub fn remove_participant(&mut self, user_id: &str) -> bool {
        if user_id == self.creator.id {
            return false;
        }
        let before = self.participants.len();
        self.participants.retain(|p| p.id != user_id);
        self.participants_count = self.participants.len();
        before != self.participants.len()
    }

    pub fn check_password(&self, supplied: Option<&str>) -> bool {
        match (&self.password, supplied) {
            (Some(stored), Some(given)) => stored == given,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Password-free projection for API responses.
    pub fn view(&self, viewer_id: Option<&str>) -> RoomView {
        RoomView {
            id: self.id.clone(),
            name: self.name.clone(),
            creator: self.creator.clone(),
            participants: self.participants.clone(),
            participants_count: self.participants_count,
            has_password: self.has_password,
            is_creator: viewer_id.map(|u| u == self.creator.id).unwrap_or(false),
            created_at: self.created_at,
        }
    }
}

/// What clients see: a room without its password, with `is_creator` derived
/// for the requesting user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomView {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub creator: UserSummary,
    pub participants: Vec<UserSummary>,
    #[serde(rename = "participantsCount")]
    pub participants_count: usize,
    #[serde(rename = "hasPassword")]
    pub has_password: bool,
    #[serde(rename = "isCreator")]
    pub is_creator: bool,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user(id: &str) -> UserSummary {
        UserSummary {
            id: id.to_string(),
            name: format!("user-{id}"),
            email: format!("{id}@example.com"),
            profile_image: Some(format!("https://img.example.com/{id}.png")),
        }
    }

    #[test]
    fn creator_is_always_a_participant() {
        let room = Room::new("r1".into(), "  Alpha  ".into(), sample_user("a"), None, 1_000);
        assert_eq!(room.name, "Alpha");
        assert!(room.is_participant("a"));
        assert_eq!(room.participants_count, 1);
        assert!(!room.has_password);
    }

    #[test]
    fn empty_password_means_open_room() {
        let room = Room::new("r1".into(), "Alpha".into(), sample_user("a"), Some(String::new()), 0);
        assert!(!room.has_password);
        assert!(room.check_password(None));
    }

    #[test]
    fn participants_stay_unique() {
        let mut room = Room::new("r1".into(), "Alpha".into(), sample_user("a"), None, 0);
        assert!(room.add_participant(sample_user("b")));
        assert!(!room.add_participant(sample_user("b")));
        assert_eq!(room.participants_count, 2);
    }

    #[test]
    fn creator_cannot_be_removed() {
        let mut room = Room::new("r1".into(), "Alpha".into(), sample_user("a"), None, 0);
        room.add_participant(sample_user("b"));
        assert!(!room.remove_participant("a"));
        assert!(room.remove_participant("b"));
        assert_eq!(room.participants_count, 1);
    }

    #[test]
    fn password_compared_by_equality() {
        let room =
            Room::new("r1".into(), "Alpha".into(), sample_user("a"), Some("x".into()), 0);
        assert!(room.has_password);
        assert!(room.check_password(Some("x")));
        assert!(!room.check_password(Some("y")));
        assert!(!room.check_password(None));
    }

    #[test]
    fn view_omits_password_and_derives_is_creator() {
        let room =
            Room::new("r1".into(), "Alpha".into(), sample_user("a"), Some("x".into()), 42);
        let view = room.view(Some("a"));
        assert!(view.is_creator);
        assert!(view.has_password);
        let json = serde_json::to_value(&view).expect("serialize");
        assert!(json.get("password").is_none());
        assert!(!room.view(Some("b")).is_creator);
    }
}
