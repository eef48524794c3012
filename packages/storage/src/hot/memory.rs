use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-process fallback store used once the real hot tier is unreachable.
/// Supports the key/value subset with real TTL semantics; search, stream
/// and JSON-path operations report empty results upstream.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Instant::now()).unwrap_or(false)
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, MemoryEntry>) -> R) -> R {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut entries)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.with_entries(|entries| {
            match entries.get(key) {
                Some(entry) if entry.is_expired() => {
                    entries.remove(key);
                    None
                },
                Some(entry) => Some(entry.value.clone()),
                None => None,
            }
        })
    }

    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        });
    }

    /// SET NX PX over the map; single-process mutual exclusion while
    /// degraded.
    pub fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> bool {
        self.with_entries(|entries| {
            let live = entries.get(key).map(|e| !e.is_expired()).unwrap_or(false);
            if live {
                return false;
            }
            entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            true
        })
    }

    pub fn del(&self, key: &str) -> bool {
        self.with_entries(|entries| entries.remove(key).map(|e| !e.is_expired()).unwrap_or(false))
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        self.with_entries(|entries| {
            match entries.get_mut(key) {
                Some(entry) if !entry.is_expired() => {
                    entry.expires_at = Some(Instant::now() + ttl);
                    true
                },
                Some(_) => {
                    entries.remove(key);
                    false
                },
                None => false,
            }
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remaining TTL in milliseconds; -1 when persistent, -2 when absent.
    pub fn pttl(&self, key: &str) -> i64 {
        self.with_entries(|entries| {
            match entries.get(key) {
                Some(entry) if entry.is_expired() => {
                    entries.remove(key);
                    -2
                },
                Some(entry) => match entry.expires_at {
                    Some(at) => at.saturating_duration_since(Instant::now()).as_millis() as i64,
                    None => -1,
                },
                None => -2,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| {
            entries.retain(|_, entry| !entry.is_expired());
            entries.len()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del_round_trip() {
        let engine = MemoryEngine::new();
        engine.set("k", "v", None);
        assert_eq!(engine.get("k").as_deref(), Some("v"));
        assert!(engine.del("k"));
        assert_eq!(engine.get("k"), None);
        assert!(!engine.del("k"));
    }

    #[test]
    fn expired_entries_disappear() {
        let engine = MemoryEngine::new();
        engine.set("k", "v", Some(Duration::from_millis(0)));
        assert_eq!(engine.get("k"), None);
        assert!(!engine.exists("k"));
        assert_eq!(engine.pttl("k"), -2);
    }

    #[test]
    fn pttl_reports_persistence() {
        let engine = MemoryEngine::new();
        engine.set("k", "v", None);
        assert_eq!(engine.pttl("k"), -1);
        assert!(engine.expire("k", Duration::from_secs(60)));
        assert!(engine.pttl("k") > 0);
    }

    #[test]
    fn set_nx_respects_live_entries() {
        let engine = MemoryEngine::new();
        assert!(engine.set_nx("lock", "a", Duration::from_secs(30)));
        assert!(!engine.set_nx("lock", "b", Duration::from_secs(30)));
        assert_eq!(engine.get("lock").as_deref(), Some("a"));
    }

    #[test]
    fn set_nx_reclaims_expired_entries() {
        let engine = MemoryEngine::new();
        assert!(engine.set_nx("lock", "a", Duration::from_millis(0)));
        assert!(engine.set_nx("lock", "b", Duration::from_secs(30)));
        assert_eq!(engine.get("lock").as_deref(), Some("b"));
    }
}
