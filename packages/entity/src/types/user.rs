use serde::{Deserialize, Serialize};

/// A user account. Created and owned externally; the core only reads these
/// and updates `profile_image`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(rename = "profileImage", skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

/// Denormalized user snapshot embedded in rooms and messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(rename = "profileImage", skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            profile_image: user.profile_image.clone(),
        }
    }
}

impl UserSummary {
    /// Snapshot without the profile image, the shape rooms embed for
    /// creators and participants.
    pub fn without_image(&self) -> Self {
        Self { profile_image: None, ..self.clone() }
    }
}
