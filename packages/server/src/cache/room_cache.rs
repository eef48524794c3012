//! Read-through + write-through room cache: the hot tier serves listings via
//! the secondary index, the durable tier is the source of truth on miss.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use parlay_entity::{
    DataSource, PageMeta, Room, RoomView, SortSpec, UserSummary, new_object_id,
};
use parlay_storage::hot::{HotTier, SearchOptions};
use parlay_storage::repository::{RoomListFilter, RoomRepository, RoomSort};

use crate::cache::{ROOM_INDEX, escape_search_term, room_key};
use crate::error::ApiError;

const MAX_PAGE_SIZE: u64 = 50;
const DEFAULT_PAGE_SIZE: u64 = 10;

/// Listing query after normalization; invalid values are clamped rather than
/// rejected.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomListQuery {
    #[serde(default)]
    pub page: u64,
    #[serde(rename = "pageSize", default)]
    pub page_size: Option<u64>,
    #[serde(rename = "sortField", default)]
    pub sort_field: Option<String>,
    #[serde(rename = "sortOrder", default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(rename = "hasPassword", default)]
    pub has_password: Option<bool>,
    #[serde(skip)]
    pub user_id: Option<String>,
}

impl Default for RoomListQuery {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: None,
            sort_field: None,
            sort_order: None,
            search: None,
            has_password: None,
            user_id: None,
        }
    }
}

impl RoomListQuery {
    fn page_size(&self) -> u64 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    fn sort(&self) -> RoomSort {
        self.sort_field
            .as_deref()
            .and_then(RoomSort::parse)
            .unwrap_or(RoomSort::CreatedAt)
    }

    fn descending(&self) -> bool {
        self.sort_order.as_deref().map(|order| order != "asc").unwrap_or(true)
    }

    fn sort_spec(&self) -> SortSpec {
        SortSpec {
            field: self.sort().field_name().to_string(),
            order: if self.descending() { "desc" } else { "asc" }.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomView>,
    #[serde(flatten)]
    pub meta: PageMeta,
}

pub struct RoomCacheService {
    hot: Arc<HotTier>,
    rooms: RoomRepository,
}

impl RoomCacheService {
    pub fn new(hot: Arc<HotTier>, rooms: RoomRepository) -> Self {
        Self { hot, rooms }
    }

    /// Paged, sorted, filtered listing. Hot tier first; any error or empty
    /// index result falls back to the durable tier with an equivalent
    /// filter.
    pub async fn list_rooms(&self, query: &RoomListQuery) -> Result<RoomListResponse, ApiError> {
        let page_size = query.page_size();
        let offset = query.page * page_size;

        match self.list_from_hot(query, offset, page_size).await {
            Ok(Some(response)) => return Ok(response),
            Ok(None) => debug!("room index empty, serving listing from the durable tier"),
            Err(err) => {
                warn!(error = %err, "room listing fell back to the durable tier");
            },
        }

        self.list_from_durable(query, offset, page_size).await
    }

    async fn list_from_hot(
        &self,
        query: &RoomListQuery,
        offset: u64,
        page_size: u64,
    ) -> Result<Option<RoomListResponse>, ApiError> {
        let expression = build_room_search(query.search.as_deref(), query.has_password);
        let options = SearchOptions {
            sort_by: Some(query.sort().field_name().to_string()),
            descending: query.descending(),
            offset,
            limit: page_size,
        };
        let result = self.hot.search(ROOM_INDEX, &expression, &options).await?;
        if result.total == 0 {
            return Ok(None);
        }

        let mut rooms = Vec::with_capacity(result.keys.len());
        for key in &result.keys {
            let Some(doc) = self.hot.json_get(key, "$").await? else { continue };
            match serde_json::from_value::<Room>(doc) {
                Ok(room) => rooms.push(room.view(query.user_id.as_deref())),
                Err(err) => warn!(key = %key, error = %err, "undecodable cached room skipped"),
            }
        }

        let meta = PageMeta::new(
            result.total,
            query.page,
            page_size,
            rooms.len() as u64,
            query.sort_spec(),
            DataSource::Redis,
        );
        Ok(Some(RoomListResponse { rooms, meta }))
    }

    async fn list_from_durable(
        &self,
        query: &RoomListQuery,
        offset: u64,
        page_size: u64,
    ) -> Result<RoomListResponse, ApiError> {
        let filter = RoomListFilter {
            search: query.search.clone(),
            has_password: query.has_password,
        };
        let (rooms, total) = self
            .rooms
            .list(&filter, query.sort(), query.descending(), offset, page_size as i64)
            .await?;

        // Write-through on the way out so the next listing hits the index.
        for room in &rooms {
            self.cache_room(room).await;
        }

        let views: Vec<RoomView> =
            rooms.iter().map(|room| room.view(query.user_id.as_deref())).collect();
        let meta = PageMeta::new(
            total,
            query.page,
            page_size,
            views.len() as u64,
            query.sort_spec(),
            DataSource::Mongodb,
        );
        Ok(RoomListResponse { rooms: views, meta })
    }

    /// Read-through by key.
    pub async fn get_room(&self, room_id: &str) -> Result<Option<Room>, ApiError> {
        let key = room_key(room_id);
        match self.hot.json_get(&key, "$").await {
            Ok(Some(doc)) => {
                if let Ok(room) = serde_json::from_value::<Room>(doc) {
                    return Ok(Some(room));
                }
                warn!(room_id, "undecodable cached room, reloading from the durable tier");
            },
            Ok(None) => {},
            Err(err) => warn!(room_id, error = %err, "room read fell back to the durable tier"),
        }
        let Some(room) = self.rooms.get_by_id(room_id).await? else {
            return Ok(None);
        };
        self.cache_room(&room).await;
        Ok(Some(room))
    }

    /// Write-through create: durable first, then the hot-tier document. The
    /// response omits the password.
    pub async fn create_room(
        &self,
        name: &str,
        creator: UserSummary,
        password: Option<String>,
    ) -> Result<RoomView, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::Validation("방 이름을 입력해주세요.".to_string()));
        }
        let room = Room::new(
            new_object_id(),
            name.to_string(),
            creator.clone(),
            password,
            chrono::Utc::now().timestamp_millis(),
        );
        self.rooms.create(&room).await?;
        self.cache_room(&room).await;
        info!(room_id = %room.id, creator = %creator.id, "room created");
        Ok(room.view(Some(&creator.id)))
    }

    /// Join with password gate; appends the participant when new and
    /// rewrites the cached document.
    pub async fn join_room(
        &self,
        room_id: &str,
        user: UserSummary,
        password: Option<&str>,
    ) -> Result<RoomView, ApiError> {
        let mut room = self.rooms.get_by_id(room_id).await?.ok_or(ApiError::NotFound)?;
        if !room.check_password(password) {
            return Err(ApiError::PasswordMismatch);
        }
        if room.add_participant(user.clone()) {
            self.rooms.add_participant(room_id, &user).await?;
        }
        self.cache_room(&room).await;
        Ok(room.view(Some(&user.id)))
    }

    /// Removes a participant durably and rewrites the cached document.
    pub async fn leave_room(&self, room_id: &str, user_id: &str) -> Result<Option<Room>, ApiError> {
        let Some(mut room) = self.rooms.get_by_id(room_id).await? else {
            return Ok(None);
        };
        if room.remove_participant(user_id) {
            self.rooms.remove_participant(room_id, user_id).await?;
        }
        self.cache_room(&room).await;
        Ok(Some(room))
    }

    /// Creator-only room deletion; removes the durable document and the
    /// cached copy. Messages are retained.
    pub async fn delete_room(&self, room_id: &str, user_id: &str) -> Result<(), ApiError> {
        let room = self.rooms.get_by_id(room_id).await?.ok_or(ApiError::NotFound)?;
        if room.creator.id != user_id {
            return Err(ApiError::NotParticipant);
        }
        self.rooms.delete(room_id).await?;
        let _ = self.hot.json_del(&room_key(room_id), "$").await;
        info!(room_id, "room deleted");
        Ok(())
    }

    /// Pre-populates the hot tier with every room. Returns (cached, total).
    pub async fn warm_cache(&self) -> Result<(usize, usize), ApiError> {
        let rooms = self.rooms.all().await?;
        let total = rooms.len();
        let mut cached = 0;
        for room in &rooms {
            if self.try_cache_room(room).await {
                cached += 1;
            }
        }
        info!(cached, total, "room cache warmed");
        Ok((cached, total))
    }

    async fn cache_room(&self, room: &Room) {
        self.try_cache_room(room).await;
    }

    async fn try_cache_room(&self, room: &Room) -> bool {
        let doc = match serde_json::to_value(room) {
            Ok(doc) => doc,
            Err(_) => return false,
        };
        match self.hot.json_set(&room_key(&room.id), "$", &doc).await {
            Ok(()) => true,
            Err(err) => {
                warn!(room_id = %room.id, error = %err, "failed to cache room document");
                false
            },
        }
    }
}

/// Search expression over the room index; `*` when unfiltered.
fn build_room_search(search: Option<&str>, has_password: Option<bool>) -> String {
    let mut conditions = Vec::new();
    if let Some(term) = search.map(str::trim).filter(|term| !term.is_empty()) {
        conditions.push(format!("@name:{}*", escape_search_term(term)));
    }
    if let Some(has_password) = has_password {
        conditions.push(format!("@hasPassword:{{{has_password}}}"));
    }
    if conditions.is_empty() {
        "*".to_string()
    } else {
        conditions.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfiltered_search_is_a_wildcard() {
        assert_eq!(build_room_search(None, None), "*");
        assert_eq!(build_room_search(Some("   "), None), "*");
    }

    #[test]
    fn search_combines_name_and_password_conditions() {
        assert_eq!(build_room_search(Some("alpha"), None), "@name:alpha*");
        assert_eq!(build_room_search(None, Some(true)), "@hasPassword:{true}");
        assert_eq!(
            build_room_search(Some("study"), Some(false)),
            "@name:study* @hasPassword:{false}"
        );
    }

    #[test]
    fn page_size_is_clamped() {
        let query = RoomListQuery { page_size: Some(500), ..RoomListQuery::default() };
        assert_eq!(query.page_size(), MAX_PAGE_SIZE);
        let query = RoomListQuery { page_size: Some(0), ..RoomListQuery::default() };
        assert_eq!(query.page_size(), 1);
        assert_eq!(RoomListQuery::default().page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn sort_defaults_to_created_at_desc() {
        let query = RoomListQuery::default();
        assert_eq!(query.sort(), RoomSort::CreatedAt);
        assert!(query.descending());
        let query = RoomListQuery {
            sort_field: Some("name".into()),
            sort_order: Some("asc".into()),
            ..RoomListQuery::default()
        };
        assert_eq!(query.sort(), RoomSort::Name);
        assert!(!query.descending());
    }
}
