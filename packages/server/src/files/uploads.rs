//! In-flight upload handshakes: presigned keys issued but not yet
//! completed. Entries expire with the presigned URL itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct PendingUpload {
    user_id: String,
    filename: String,
    issued_at: Instant,
}

/// key → pending handshake. A key can only be completed by the user it was
/// issued to, and only while the presigned URL is still valid.
pub struct ActiveUploads {
    pending: Mutex<HashMap<String, PendingUpload>>,
    ttl: Duration,
}

impl ActiveUploads {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self { pending: Mutex::new(HashMap::new()), ttl })
    }

    pub async fn register(&self, key: &str, user_id: &str, filename: &str) {
        let mut pending = self.pending.lock().await;
        pending.retain(|_, upload| upload.issued_at.elapsed() < self.ttl);
        pending.insert(
            key.to_string(),
            PendingUpload {
                user_id: user_id.to_string(),
                filename: filename.to_string(),
                issued_at: Instant::now(),
            },
        );
    }

    /// Consumes the handshake; true only for the issuing user within the
    /// validity window.
    pub async fn complete(&self, key: &str, user_id: &str) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.get(key) {
            Some(upload) if upload.user_id == user_id => {
                let live = upload.issued_at.elapsed() < self.ttl;
                debug!(key, filename = %upload.filename, live, "upload handshake consumed");
                pending.remove(key);
                live
            },
            _ => false,
        }
    }

    pub async fn count(&self) -> usize {
        let mut pending = self.pending.lock().await;
        pending.retain(|_, upload| upload.issued_at.elapsed() < self.ttl);
        pending.len()
    }

    #[cfg(test)]
    async fn pending_filename(&self, key: &str) -> Option<String> {
        self.pending.lock().await.get(key).map(|upload| upload.filename.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_is_single_use_and_owner_bound() {
        let uploads = ActiveUploads::new(Duration::from_secs(300));
        uploads.register("uploads/k1", "u1", "cat.png").await;
        assert_eq!(uploads.pending_filename("uploads/k1").await.as_deref(), Some("cat.png"));

        assert!(!uploads.complete("uploads/k1", "someone-else").await);
        assert!(uploads.complete("uploads/k1", "u1").await);
        assert!(!uploads.complete("uploads/k1", "u1").await);
    }

    #[tokio::test]
    async fn expired_handshakes_do_not_complete() {
        let uploads = ActiveUploads::new(Duration::from_millis(0));
        uploads.register("uploads/k2", "u1", "cat.png").await;
        assert!(!uploads.complete("uploads/k2", "u1").await);
        assert_eq!(uploads.count().await, 0);
    }
}
