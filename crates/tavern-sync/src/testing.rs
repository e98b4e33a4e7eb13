//! Backend double that fails on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tavern_db::{BackendError, MemoryBackend, PersistenceBackend, Registration, Result, Transform};
use tavern_types::{
    Message, MessageKind, NewsEntry, PlayerRecord, PresenceRecord, SharedStateEntry, UpdateOutcome,
};
use uuid::Uuid;

/// [`MemoryBackend`] with switches for an outage, a player directory that
/// cannot be read, and atomic updates that never win their race.
#[derive(Default)]
pub(crate) struct FlakyBackend {
    inner: MemoryBackend,
    down: AtomicBool,
    lookups_down: AtomicBool,
    always_conflict: AtomicBool,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_lookups_down(&self, down: bool) {
        self.lookups_down.store(down, Ordering::SeqCst);
    }

    pub fn set_always_conflict(&self, conflict: bool) {
        self.always_conflict.store(conflict, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Transient("storage offline".into()));
        }
        Ok(())
    }
}

impl PersistenceBackend for FlakyBackend {
    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }

    fn get_state(&self, key: &str) -> Result<Option<SharedStateEntry>> {
        self.check()?;
        self.inner.get_state(key)
    }

    fn put_state(&self, key: &str, value: &str) -> Result<u64> {
        self.check()?;
        self.inner.put_state(key, value)
    }

    fn atomic_update(
        &self,
        key: &str,
        transform: &dyn Fn(Option<&str>) -> Transform,
    ) -> Result<UpdateOutcome> {
        self.check()?;
        if self.always_conflict.load(Ordering::SeqCst) {
            return Ok(UpdateOutcome::Conflict);
        }
        self.inner.atomic_update(key, transform)
    }

    fn register_presence(&self, reg: &Registration, stale_after: Duration) -> Result<PresenceRecord> {
        self.check()?;
        self.inner.register_presence(reg, stale_after)
    }

    fn touch_presence(&self, identity: &str, location: &str) -> Result<bool> {
        self.check()?;
        self.inner.touch_presence(identity, location)
    }

    fn remove_presence(&self, identity: &str) -> Result<bool> {
        self.check()?;
        self.inner.remove_presence(identity)
    }

    fn remove_presence_owned(&self, identity: &str, session_id: Uuid) -> Result<bool> {
        self.check()?;
        self.inner.remove_presence_owned(identity, session_id)
    }

    fn get_presence(&self, identity: &str) -> Result<Option<PresenceRecord>> {
        self.check()?;
        self.inner.get_presence(identity)
    }

    fn list_presence(&self, stale_after: Duration) -> Result<Vec<PresenceRecord>> {
        self.check()?;
        self.inner.list_presence(stale_after)
    }

    fn remove_stale_presence(&self, stale_after: Duration) -> Result<usize> {
        self.check()?;
        self.inner.remove_stale_presence(stale_after)
    }

    fn insert_message(&self, from: &str, to: &str, kind: &MessageKind, body: &str) -> Result<i64> {
        self.check()?;
        self.inner.insert_message(from, to, kind, body)
    }

    fn unread_messages(&self, identity: &str, after_id: i64) -> Result<Vec<Message>> {
        self.check()?;
        self.inner.unread_messages(identity, after_id)
    }

    fn mark_delivered(&self, identity: &str, through: Option<i64>) -> Result<usize> {
        self.check()?;
        self.inner.mark_delivered(identity, through)
    }

    fn max_message_id(&self) -> Result<i64> {
        self.check()?;
        self.inner.max_message_id()
    }

    fn insert_news(&self, message: &str, category: &str, author: &str) -> Result<i64> {
        self.check()?;
        self.inner.insert_news(message, category, author)
    }

    fn recent_news(&self, limit: usize) -> Result<Vec<NewsEntry>> {
        self.check()?;
        self.inner.recent_news(limit)
    }

    fn record_login(&self, identity: &str, display_name: &str) -> Result<()> {
        self.check()?;
        self.inner.record_login(identity, display_name)
    }

    fn record_logout(&self, identity: &str) -> Result<()> {
        self.check()?;
        self.inner.record_logout(identity)
    }

    fn get_player(&self, identity: &str) -> Result<Option<PlayerRecord>> {
        self.check()?;
        self.inner.get_player(identity)
    }

    fn find_player(&self, name: &str) -> Result<Option<PlayerRecord>> {
        self.check()?;
        if self.lookups_down.load(Ordering::SeqCst) {
            return Err(BackendError::Transient("player directory offline".into()));
        }
        self.inner.find_player(name)
    }
}
