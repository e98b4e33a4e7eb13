use std::time::Duration;

use chrono::{DateTime, Utc};
use tavern_types::{
    ConnectionKind, Message, MessageKind, NewsEntry, PlayerRecord, PresenceRecord,
    SharedStateEntry, UpdateOutcome,
};
use uuid::Uuid;

use crate::error::Result;

/// What an atomic-update transform wants done with the value it was shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    Write(String),
    Keep,
}

/// Fields supplied by a session when it registers presence. Timestamps come
/// from the backend's clock.
#[derive(Debug, Clone)]
pub struct Registration {
    pub identity: String,
    pub display_name: String,
    pub location: String,
    pub connection_kind: ConnectionKind,
    pub session_id: Uuid,
}

/// Durable store shared by every session.
///
/// All methods are blocking and fail fast with
/// [`crate::BackendError::Transient`] when storage is unavailable.
/// Async callers should run them on the blocking pool.
pub trait PersistenceBackend: Send + Sync {
    /// "Now" on the clock this backend stamps and compares rows with.
    fn now(&self) -> DateTime<Utc>;

    // -- Shared state --

    fn get_state(&self, key: &str) -> Result<Option<SharedStateEntry>>;

    /// Unconditional overwrite. Returns the new version.
    fn put_state(&self, key: &str, value: &str) -> Result<u64>;

    /// Read-transform-write that only commits if the key's version is
    /// unchanged since the read. Lost races re-run `transform` on the fresh
    /// value, so it may be called more than once and must be deterministic
    /// and side-effect free.
    fn atomic_update(
        &self,
        key: &str,
        transform: &dyn Fn(Option<&str>) -> Transform,
    ) -> Result<UpdateOutcome>;

    // -- Presence --

    /// Insert or take over the record for `identity`. `connected_at` is kept
    /// when the existing record is still fresh under `stale_after`.
    fn register_presence(&self, reg: &Registration, stale_after: Duration) -> Result<PresenceRecord>;

    /// Refresh the heartbeat and location. `false` if no record exists.
    fn touch_presence(&self, identity: &str, location: &str) -> Result<bool>;

    fn remove_presence(&self, identity: &str) -> Result<bool>;

    /// Remove the record only if `session_id` still owns it.
    fn remove_presence_owned(&self, identity: &str, session_id: Uuid) -> Result<bool>;

    fn get_presence(&self, identity: &str) -> Result<Option<PresenceRecord>>;

    /// Records heard from within `stale_after`, ordered by display name.
    fn list_presence(&self, stale_after: Duration) -> Result<Vec<PresenceRecord>>;

    /// Delete records silent for longer than `stale_after`.
    fn remove_stale_presence(&self, stale_after: Duration) -> Result<usize>;

    // -- Messages --

    fn insert_message(&self, from: &str, to: &str, kind: &MessageKind, body: &str) -> Result<i64>;

    /// Undelivered direct messages for `identity` plus broadcasts newer than
    /// `after_id`, ascending by id.
    fn unread_messages(&self, identity: &str, after_id: i64) -> Result<Vec<Message>>;

    /// Flag direct messages to `identity` as delivered, optionally only those
    /// with `id <= through`. Broadcast rows are never touched.
    fn mark_delivered(&self, identity: &str, through: Option<i64>) -> Result<usize>;

    fn max_message_id(&self) -> Result<i64>;

    // -- News --

    fn insert_news(&self, message: &str, category: &str, author: &str) -> Result<i64>;

    /// Newest first.
    fn recent_news(&self, limit: usize) -> Result<Vec<NewsEntry>>;

    // -- Player directory --

    fn record_login(&self, identity: &str, display_name: &str) -> Result<()>;

    fn record_logout(&self, identity: &str) -> Result<()>;

    fn get_player(&self, identity: &str) -> Result<Option<PlayerRecord>>;

    /// Look a player up by identity or display name, ignoring case. An
    /// identity match wins over a display-name match.
    fn find_player(&self, name: &str) -> Result<Option<PlayerRecord>>;

    fn player_exists(&self, name: &str) -> Result<bool> {
        Ok(self.find_player(name)?.is_some())
    }
}
