use futures::TryStreamExt;
use mongodb::bson::{Document, doc, to_bson};
use mongodb::{Collection, Database};

use parlay_entity::{Room, UserSummary};

use crate::repository::error::RepositoryError;

/// Durable-tier filter mirroring the hot-tier search expression.
#[derive(Debug, Clone, Default)]
pub struct RoomListFilter {
    /// Substring match on the room name.
    pub search: Option<String>,
    pub has_password: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomSort {
    CreatedAt,
    Name,
    ParticipantsCount,
}

impl RoomSort {
    pub fn field_name(&self) -> &'static str {
        match self {
            RoomSort::CreatedAt => "createdAt",
            RoomSort::Name => "name",
            RoomSort::ParticipantsCount => "participantsCount",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "createdAt" => Some(RoomSort::CreatedAt),
            "name" => Some(RoomSort::Name),
            "participantsCount" => Some(RoomSort::ParticipantsCount),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct RoomRepository {
    collection: Collection<Room>,
}

impl RoomRepository {
    pub fn new(db: Database) -> Self {
        Self { collection: db.collection("rooms") }
    }

    pub async fn create(&self, room: &Room) -> Result<(), RepositoryError> {
        self.collection.insert_one(room).await?;
        Ok(())
    }

    /// Full document including the stored password.
    pub async fn get_by_id(&self, room_id: &str) -> Result<Option<Room>, RepositoryError> {
        Ok(self.collection.find_one(doc! { "_id": room_id }).await?)
    }

    pub async fn require(&self, room_id: &str) -> Result<Room, RepositoryError> {
        self.get_by_id(room_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("room", room_id))
    }

    pub async fn save(&self, room: &Room) -> Result<(), RepositoryError> {
        self.collection
            .replace_one(doc! { "_id": &room.id }, room)
            .upsert(true)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, room_id: &str) -> Result<bool, RepositoryError> {
        let result = self.collection.delete_one(doc! { "_id": room_id }).await?;
        Ok(result.deleted_count > 0)
    }

    /// Guarded push keeping participant ids unique; `participantsCount`
    /// maintained alongside so repeated application is a no-op.
    pub async fn add_participant(
        &self,
        room_id: &str,
        user: &UserSummary,
    ) -> Result<bool, RepositoryError> {
        let user_doc = to_bson(&user.without_image())?;
        let result = self
            .collection
            .update_one(
                doc! { "_id": room_id, "participants._id": { "$ne": &user.id } },
                doc! {
                    "$push": { "participants": user_doc },
                    "$inc": { "participantsCount": 1 },
                },
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    pub async fn remove_participant(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<bool, RepositoryError> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": room_id, "participants._id": user_id },
                doc! {
                    "$pull": { "participants": { "_id": user_id } },
                    "$inc": { "participantsCount": -1 },
                },
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    pub async fn all(&self) -> Result<Vec<Room>, RepositoryError> {
        let cursor = self.collection.find(doc! {}).await?;
        Ok(cursor.try_collect().await?)
    }

    /// Paged listing equivalent to the hot-tier index search, used on cache
    /// miss.
    pub async fn list(
        &self,
        filter: &RoomListFilter,
        sort: RoomSort,
        descending: bool,
        skip: u64,
        limit: i64,
    ) -> Result<(Vec<Room>, u64), RepositoryError> {
        let filter_doc = build_filter(filter);
        let total = self.collection.count_documents(filter_doc.clone()).await?;
        let order = if descending { -1 } else { 1 };
        let cursor = self
            .collection
            .find(filter_doc)
            .sort(doc! { sort.field_name(): order })
            .skip(skip)
            .limit(limit)
            .await?;
        let rooms: Vec<Room> = cursor.try_collect().await?;
        Ok((rooms, total))
    }

    pub fn collection(&self) -> &Collection<Room> {
        &self.collection
    }
}

fn build_filter(filter: &RoomListFilter) -> Document {
    let mut document = Document::new();
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        document.insert(
            "name",
            doc! { "$regex": regex_escape(search), "$options": "i" },
        );
    }
    if let Some(has_password) = filter.has_password {
        document.insert("hasPassword", has_password);
    }
    document
}

/// Escapes a user-supplied search term for use inside `$regex`.
fn regex_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if r"\.^$|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_is_empty_without_conditions() {
        assert!(build_filter(&RoomListFilter::default()).is_empty());
    }

    #[test]
    fn filter_combines_search_and_password() {
        let filter = build_filter(&RoomListFilter {
            search: Some("alpha".into()),
            has_password: Some(true),
        });
        let name = filter.get_document("name").expect("name condition");
        assert_eq!(name.get_str("$regex").expect("regex"), "alpha");
        assert_eq!(name.get_str("$options").expect("options"), "i");
        assert!(filter.get_bool("hasPassword").expect("hasPassword condition"));
    }

    #[test]
    fn search_terms_are_regex_escaped() {
        assert_eq!(regex_escape("a.b*"), r"a\.b\*");
        assert_eq!(regex_escape("plain"), "plain");
    }

    #[test]
    fn sort_fields_parse() {
        assert_eq!(RoomSort::parse("createdAt"), Some(RoomSort::CreatedAt));
        assert_eq!(RoomSort::parse("name"), Some(RoomSort::Name));
        assert_eq!(RoomSort::parse("participantsCount"), Some(RoomSort::ParticipantsCount));
        assert_eq!(RoomSort::parse("bogus"), None);
    }
}
