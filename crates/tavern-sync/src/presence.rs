use std::time::Duration;

use tavern_db::Registration;
use tavern_types::{ConnectionKind, PresenceRecord};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SyncError;
use crate::{Backend, best_effort, with_backend};

/// Heartbeat-based liveness on top of the shared presence table.
///
/// Any live session may sweep; a crashed session's record is reaped by
/// whichever survivor sweeps first.
#[derive(Clone)]
pub struct PresenceTracker {
    backend: Backend,
    stale_after: Duration,
}

impl PresenceTracker {
    pub fn new(backend: Backend, stale_after: Duration) -> Self {
        Self {
            backend,
            stale_after,
        }
    }

    /// Mark `identity` online under a fresh session id. Returns `None` when
    /// storage was unavailable.
    pub async fn register(
        &self,
        identity: &str,
        display_name: &str,
        location: &str,
        connection_kind: ConnectionKind,
    ) -> Result<Option<PresenceRecord>, SyncError> {
        self.register_session(identity, display_name, location, connection_kind, Uuid::new_v4())
            .await
    }

    pub async fn register_session(
        &self,
        identity: &str,
        display_name: &str,
        location: &str,
        connection_kind: ConnectionKind,
        session_id: Uuid,
    ) -> Result<Option<PresenceRecord>, SyncError> {
        let reg = Registration {
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            location: location.to_string(),
            connection_kind,
            session_id,
        };
        let stale_after = self.stale_after;
        let result = with_backend(&self.backend, move |b| b.register_presence(&reg, stale_after)).await;
        let record = best_effort("register presence", result)?;
        if let Some(record) = &record {
            info!(
                "{} ({}) online via {} at {}",
                record.display_name, record.identity, record.connection_kind, record.location
            );
        }
        Ok(record)
    }

    /// Refresh the heartbeat and publish the current location.
    /// `Some(false)` means the record is gone (reaped or never registered);
    /// `None` means storage was unavailable and nothing is known.
    pub async fn heartbeat(&self, identity: &str, location: &str) -> Result<Option<bool>, SyncError> {
        let identity = identity.to_string();
        let location = location.to_string();
        let result = with_backend(&self.backend, move |b| b.touch_presence(&identity, &location)).await;
        best_effort("heartbeat", result)
    }

    pub async fn unregister(&self, identity: &str) -> Result<bool, SyncError> {
        let owned = identity.to_string();
        let result = with_backend(&self.backend, move |b| b.remove_presence(&owned)).await;
        let removed = best_effort("unregister presence", result)?.unwrap_or(false);
        if removed {
            info!("{} went offline", identity);
        }
        Ok(removed)
    }

    /// Unregister only if `session_id` still owns the record, so a session
    /// shutting down never evicts a newer login for the same identity.
    pub async fn unregister_session(&self, identity: &str, session_id: Uuid) -> Result<bool, SyncError> {
        let owned = identity.to_string();
        let result =
            with_backend(&self.backend, move |b| b.remove_presence_owned(&owned, session_id)).await;
        let removed = best_effort("unregister presence", result)?.unwrap_or(false);
        if removed {
            info!("{} went offline", identity);
        } else {
            debug!("{} presence owned by another session, left in place", identity);
        }
        Ok(removed)
    }

    /// Non-stale records ordered by display name. Empty on storage failure.
    pub async fn list_online(&self) -> Result<Vec<PresenceRecord>, SyncError> {
        let stale_after = self.stale_after;
        let result = with_backend(&self.backend, move |b| b.list_presence(stale_after)).await;
        Ok(best_effort("list online players", result)?.unwrap_or_default())
    }

    /// Delete records past the staleness threshold.
    pub async fn sweep_stale(&self) -> Result<usize, SyncError> {
        let stale_after = self.stale_after;
        let result = with_backend(&self.backend, move |b| b.remove_stale_presence(stale_after)).await;
        let removed = best_effort("sweep stale presence", result)?.unwrap_or(0);
        if removed > 0 {
            info!("Cleaned up {} stale online player entries", removed);
        }
        Ok(removed)
    }

    /// Whether `name` (identity or display name) has a fresh record right now.
    /// Always re-queries the backend.
    pub async fn is_online(&self, name: &str) -> Result<bool, SyncError> {
        let online = self.list_online().await?;
        Ok(online.iter().any(|p| {
            p.identity.eq_ignore_ascii_case(name) || p.display_name.eq_ignore_ascii_case(name)
        }))
    }
}
