use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub upstream: Arc<dyn UpstreamClient>,
    pub session: SessionKey,
    pub sync: SyncStatus,
}

/// Process-wide cell holding the unlocked session passphrase.
///
/// Set on remote unlock, cleared on lock. The scheduler only reads it;
/// a `None` means background jobs have no credentials and must skip.
#[derive(Clone, Default)]
pub struct SessionKey {
    inner: Arc<RwLock<Option<String>>>,
}

impl SessionKey {
    pub async fn get(&self) -> Option<String> {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, passphrase: String) {
        *self.inner.write().await = Some(passphrase);
    }

    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }
}

/// Shared record of the last completed full sync, used by the light job
/// to skip redundant work.
#[derive(Clone, Default)]
pub struct SyncStatus {
    last_full_sync: Arc<RwLock<Option<Instant>>>,
}

impl SyncStatus {
    pub async fn mark_full_sync(&self) {
        *self.last_full_sync.write().await = Some(Instant::now());
    }

    pub async fn full_sync_within(&self, window: Duration) -> bool {
        match *self.last_full_sync.read().await {
            Some(at) => at.elapsed() < window,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_key_set_and_clear() {
        let session = SessionKey::default();
        assert_eq!(session.get().await, None);
        session.set("passphrase".into()).await;
        assert_eq!(session.get().await.as_deref(), Some("passphrase"));
        session.clear().await;
        assert_eq!(session.get().await, None);
    }

    #[tokio::test]
    async fn sync_status_tracks_recent_full_sync() {
        let sync = SyncStatus::default();
        assert!(!sync.full_sync_within(Duration::from_secs(900)).await);
        sync.mark_full_sync().await;
        assert!(sync.full_sync_within(Duration::from_secs(900)).await);
        assert!(!sync.full_sync_within(Duration::from_nanos(1)).await);
    }
}
