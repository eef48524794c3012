//! Process-wide realtime session registry: at most one live session per
//! user, room membership for fan-out, per-(room,user) load guards and the
//! participants cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info};

use parlay_entity::UserSummary;

use crate::cache::ROOM_KEY_PREFIX;
use crate::cluster::InvalidationSink;
use crate::realtime::protocol::{OutboundFrame, ServerEvent};

/// Grace period between `duplicate_login` and the forced close of the old
/// session.
pub const DUPLICATE_LOGIN_GRACE: Duration = Duration::from_secs(10);

const PARTICIPANTS_TTL: Duration = Duration::from_secs(300);

/// Sender half of one connection plus enough identity to dedupe sessions.
#[derive(Clone)]
pub struct SessionHandle {
    /// Unique per WebSocket connection.
    pub connection_id: String,
    pub session_id: String,
    pub tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl SessionHandle {
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(OutboundFrame::Event(event)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(OutboundFrame::Close);
    }
}

pub struct Hub {
    /// userId → live session (single-session enforcement).
    connected_users: RwLock<HashMap<String, SessionHandle>>,
    /// userId → the one room the user is currently in.
    connected_rooms: RwLock<HashMap<String, String>>,
    /// roomId → connected userIds, for fan-out.
    room_members: RwLock<HashMap<String, HashSet<String>>>,
    /// In-flight history loads, keyed (roomId, userId).
    load_guards: Mutex<HashSet<(String, String)>>,
    /// Consecutive failed history loads per (roomId, userId); decremented on
    /// success so a past bad patch never locks a user out.
    load_retries: Mutex<HashMap<(String, String), u32>>,
    participants_cache: Cache<String, Vec<UserSummary>>,
    socket_count: AtomicUsize,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected_users: RwLock::new(HashMap::new()),
            connected_rooms: RwLock::new(HashMap::new()),
            room_members: RwLock::new(HashMap::new()),
            load_guards: Mutex::new(HashSet::new()),
            load_retries: Mutex::new(HashMap::new()),
            participants_cache: Cache::builder()
                .time_to_live(PARTICIPANTS_TTL)
                .max_capacity(10_000)
                .build(),
            socket_count: AtomicUsize::new(0),
        })
    }

    /// Registers a session for the user. If another live session exists, it
    /// is notified, given the grace period, told the session ended, then
    /// force-closed; the new session owns the mapping immediately.
    pub async fn register_session(
        &self,
        user_id: &str,
        handle: SessionHandle,
        device_info: String,
        ip_address: String,
    ) {
        let previous = {
            let mut users = self.connected_users.write().await;
            users.insert(user_id.to_string(), handle)
        };
        self.socket_count.fetch_add(1, Ordering::Relaxed);

        if let Some(previous) = previous {
            info!(user_id, "duplicate login, scheduling takeover of the old session");
            tokio::spawn(async move {
                previous.send(ServerEvent::DuplicateLogin {
                    device_info,
                    ip_address,
                    timestamp: Utc::now().timestamp_millis(),
                });
                tokio::time::sleep(DUPLICATE_LOGIN_GRACE).await;
                previous.send(ServerEvent::SessionEnded {
                    reason: "duplicate_login".to_string(),
                });
                previous.close();
            });
        }
    }

    /// Clears the user's entry only when it still belongs to this
    /// connection; after a takeover by a newer session the whole per-user
    /// state (room, guards) belongs to that session and is left untouched.
    /// Returns the room the user was in, if any.
    pub async fn unregister_session(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Option<String> {
        self.socket_count.fetch_sub(1, Ordering::Relaxed);
        let owned = {
            let mut users = self.connected_users.write().await;
            if users.get(user_id).map(|h| h.connection_id.as_str()) == Some(connection_id) {
                users.remove(user_id);
                true
            } else {
                false
            }
        };
        if !owned {
            return None;
        }
        let room = self.leave_current_room(user_id).await;
        self.clear_user_guards(user_id).await;
        room
    }

    pub async fn session_for(&self, user_id: &str) -> Option<SessionHandle> {
        self.connected_users.read().await.get(user_id).cloned()
    }

    /// Is this connection still the registered session for the user?
    pub async fn owns_session(&self, user_id: &str, connection_id: &str) -> bool {
        self.connected_users
            .read()
            .await
            .get(user_id)
            .map(|h| h.connection_id.as_str() == connection_id)
            .unwrap_or(false)
    }

    pub async fn current_room(&self, user_id: &str) -> Option<String> {
        self.connected_rooms.read().await.get(user_id).cloned()
    }

    /// Moves the user into a room, returning the previous room if there was
    /// one.
    pub async fn enter_room(&self, user_id: &str, room_id: &str) -> Option<String> {
        let previous = {
            let mut rooms = self.connected_rooms.write().await;
            rooms.insert(user_id.to_string(), room_id.to_string())
        };
        let mut members = self.room_members.write().await;
        if let Some(previous_room) = previous.as_deref().filter(|prev| *prev != room_id) {
            if let Some(set) = members.get_mut(previous_room) {
                set.remove(user_id);
                if set.is_empty() {
                    members.remove(previous_room);
                }
            }
        }
        members.entry(room_id.to_string()).or_default().insert(user_id.to_string());
        previous.filter(|prev| prev != room_id)
    }

    /// Leaves whatever room the user is in, returning it.
    pub async fn leave_current_room(&self, user_id: &str) -> Option<String> {
        let room = {
            let mut rooms = self.connected_rooms.write().await;
            rooms.remove(user_id)
        }?;
        let mut members = self.room_members.write().await;
        if let Some(set) = members.get_mut(&room) {
            set.remove(user_id);
            if set.is_empty() {
                members.remove(&room);
            }
        }
        Some(room)
    }

    /// Fans an event out to every connected member of a room, optionally
    /// excluding one user.
    pub async fn emit_to_room(&self, room_id: &str, event: ServerEvent, exclude: Option<&str>) {
        let members: Vec<String> = {
            let rooms = self.room_members.read().await;
            match rooms.get(room_id) {
                Some(set) => set.iter().cloned().collect(),
                None => return,
            }
        };
        let users = self.connected_users.read().await;
        for member in members {
            if exclude == Some(member.as_str()) {
                continue;
            }
            if let Some(handle) = users.get(&member) {
                handle.send(event.clone());
            }
        }
    }

    /// Fan-out to every connected session, for lobby-level announcements
    /// like `roomCreated`.
    pub async fn emit_to_all(&self, event: ServerEvent) {
        let users = self.connected_users.read().await;
        for handle in users.values() {
            handle.send(event.clone());
        }
    }

    pub async fn emit_to_user(&self, user_id: &str, event: ServerEvent) {
        if let Some(handle) = self.session_for(user_id).await {
            handle.send(event);
        }
    }

    // ---- per-(room,user) history-load bookkeeping ----

    /// Claims the load guard; false while another load is in flight.
    pub async fn try_begin_load(&self, room_id: &str, user_id: &str) -> bool {
        self.load_guards
            .lock()
            .await
            .insert((room_id.to_string(), user_id.to_string()))
    }

    pub async fn end_load(&self, room_id: &str, user_id: &str, succeeded: bool) {
        self.load_guards
            .lock()
            .await
            .remove(&(room_id.to_string(), user_id.to_string()));
        let mut retries = self.load_retries.lock().await;
        let key = (room_id.to_string(), user_id.to_string());
        if succeeded {
            match retries.get_mut(&key) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    retries.remove(&key);
                },
                None => {},
            }
        } else {
            *retries.entry(key).or_insert(0) += 1;
        }
    }

    pub async fn load_failures(&self, room_id: &str, user_id: &str) -> u32 {
        self.load_retries
            .lock()
            .await
            .get(&(room_id.to_string(), user_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub async fn clear_user_guards(&self, user_id: &str) {
        self.load_guards.lock().await.retain(|(_, user)| user != user_id);
        self.load_retries.lock().await.retain(|(_, user), _| user != user_id);
    }

    // ---- participants cache (5-minute TTL) ----

    pub async fn cached_participants(&self, room_id: &str) -> Option<Vec<UserSummary>> {
        self.participants_cache.get(room_id).await
    }

    pub async fn cache_participants(&self, room_id: &str, participants: Vec<UserSummary>) {
        self.participants_cache.insert(room_id.to_string(), participants).await;
    }

    pub async fn evict_participants(&self, room_id: &str) {
        self.participants_cache.invalidate(room_id).await;
    }

    pub fn socket_count(&self) -> usize {
        self.socket_count.load(Ordering::Relaxed)
    }
}

/// The bus's late-bound callback: peer cache invalidations evict the local
/// participants cache for affected rooms.
impl InvalidationSink for Hub {
    fn keys_invalidated(&self, keys: &[String]) {
        for key in keys {
            if let Some(room_id) = key.strip_prefix(ROOM_KEY_PREFIX) {
                let cache = self.participants_cache.clone();
                let room_id = room_id.to_string();
                tokio::spawn(async move {
                    cache.invalidate(&room_id).await;
                });
                debug!(room_id = %key, "participants cache invalidated by peer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(connection_id: &str) -> (SessionHandle, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SessionHandle {
                connection_id: connection_id.to_string(),
                session_id: format!("sess-{connection_id}"),
                tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_the_new_session() {
        let hub = Hub::new();
        let (first, _rx1) = handle("c1");
        hub.register_session("u1", first, "dev".into(), "ip".into()).await;
        let (second, _rx2) = handle("c2");
        hub.register_session("u1", second, "dev".into(), "ip".into()).await;

        // The old connection's disconnect fires after the takeover.
        hub.unregister_session("u1", "c1").await;
        assert!(hub.owns_session("u1", "c2").await);
    }

    #[tokio::test]
    async fn duplicate_login_notifies_the_old_session() {
        let hub = Hub::new();
        let (first, mut rx1) = handle("c1");
        hub.register_session("u1", first, "phone".into(), "1.2.3.4".into()).await;
        let (second, _rx2) = handle("c2");
        hub.register_session("u1", second, "laptop".into(), "5.6.7.8".into()).await;

        let frame = rx1.recv().await.expect("duplicate_login frame");
        match frame {
            OutboundFrame::Event(ServerEvent::DuplicateLogin { device_info, .. }) => {
                assert_eq!(device_info, "laptop");
            },
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn entering_a_room_leaves_the_previous_one() {
        let hub = Hub::new();
        assert_eq!(hub.enter_room("u1", "r1").await, None);
        assert_eq!(hub.enter_room("u1", "r2").await, Some("r1".to_string()));
        assert_eq!(hub.current_room("u1").await.as_deref(), Some("r2"));
        // Re-entering the same room is not a move.
        assert_eq!(hub.enter_room("u1", "r2").await, None);
    }

    #[tokio::test]
    async fn load_guard_blocks_concurrent_loads() {
        let hub = Hub::new();
        assert!(hub.try_begin_load("r1", "u1").await);
        assert!(!hub.try_begin_load("r1", "u1").await);
        hub.end_load("r1", "u1", false).await;
        assert_eq!(hub.load_failures("r1", "u1").await, 1);
        assert!(hub.try_begin_load("r1", "u1").await);
        hub.end_load("r1", "u1", true).await;
        // Success decrements, so the user never locks out permanently.
        assert_eq!(hub.load_failures("r1", "u1").await, 0);
    }

    #[tokio::test]
    async fn fan_out_respects_exclusion() {
        let hub = Hub::new();
        let (a, mut rx_a) = handle("ca");
        let (b, mut rx_b) = handle("cb");
        hub.register_session("ua", a, "d".into(), "i".into()).await;
        hub.register_session("ub", b, "d".into(), "i".into()).await;
        hub.enter_room("ua", "r1").await;
        hub.enter_room("ub", "r1").await;

        hub.emit_to_room(
            "r1",
            ServerEvent::MessagesRead { user_id: "ua".into(), message_ids: vec!["m1".into()] },
            Some("ua"),
        )
        .await;

        assert!(rx_b.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
    }
}
