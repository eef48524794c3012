use mongodb::bson::doc;
use mongodb::{Collection, Database};

use parlay_entity::User;

use crate::repository::error::RepositoryError;

#[derive(Clone)]
pub struct UserRepository {
    collection: Collection<User>,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { collection: db.collection("users") }
    }

    pub async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.collection.find_one(doc! { "_id": user_id }).await?)
    }

    pub async fn require(&self, user_id: &str) -> Result<User, RepositoryError> {
        self.get_by_id(user_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("user", user_id))
    }

    /// The only user mutation the core performs.
    pub async fn update_profile_image(
        &self,
        user_id: &str,
        profile_image: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let update = match profile_image {
            Some(url) => doc! { "$set": { "profileImage": url } },
            None => doc! { "$unset": { "profileImage": "" } },
        };
        let result = self.collection.update_one(doc! { "_id": user_id }, update).await?;
        Ok(result.modified_count > 0)
    }
}
