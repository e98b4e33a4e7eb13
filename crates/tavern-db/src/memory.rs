//! In-process reference backend.
//!
//! Same contract as [`crate::Database`], held in a mutex. The atomic update
//! runs the transform outside the lock and commits with a version check, so
//! concurrent callers race the same way they do against SQLite.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tavern_types::{
    BROADCAST, Message, MessageKind, NewsEntry, PlayerRecord, PresenceRecord, SharedStateEntry,
    UpdateOutcome,
};
use tracing::debug;
use uuid::Uuid;

use crate::DatabaseOptions;
use crate::backend::{PersistenceBackend, Registration, Transform};
use crate::clock::{Clock, SystemClock};
use crate::error::{BackendError, Result, require};

#[derive(Default)]
struct MemoryState {
    world: HashMap<String, SharedStateEntry>,
    /// Keyed by lowercased identity.
    presence: HashMap<String, PresenceRecord>,
    messages: BTreeMap<i64, Message>,
    next_message_id: i64,
    news: Vec<NewsEntry>,
    players: HashMap<String, PlayerRecord>,
}

pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
    options: DatabaseOptions,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
            options: DatabaseOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DatabaseOptions) -> Self {
        self.options = options;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| BackendError::Transient(format!("Memory backend lock poisoned: {}", e)))
    }
}

fn window(stale_after: Duration) -> chrono::Duration {
    chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX)
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// ASCII-only case folding, the same as SQLite's NOCASE.
fn fold(identity: &str) -> String {
    identity.to_ascii_lowercase()
}

impl PersistenceBackend for MemoryBackend {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn get_state(&self, key: &str) -> Result<Option<SharedStateEntry>> {
        require("key", key)?;
        Ok(self.lock()?.world.get(key).cloned())
    }

    fn put_state(&self, key: &str, value: &str) -> Result<u64> {
        require("key", key)?;
        let mut state = self.lock()?;
        let entry = state
            .world
            .entry(key.to_string())
            .and_modify(|e| {
                e.value = value.to_string();
                e.version += 1;
            })
            .or_insert_with(|| SharedStateEntry {
                key: key.to_string(),
                value: value.to_string(),
                version: 1,
            });
        Ok(entry.version)
    }

    fn atomic_update(
        &self,
        key: &str,
        transform: &dyn Fn(Option<&str>) -> Transform,
    ) -> Result<UpdateOutcome> {
        require("key", key)?;

        for attempt in 1..=self.options.max_cas_attempts {
            let current = self.lock()?.world.get(key).cloned();
            let base_version = current.as_ref().map_or(0, |e| e.version);

            let next = match transform(current.as_ref().map(|e| e.value.as_str())) {
                Transform::Keep => {
                    return Ok(UpdateOutcome::AlreadyCurrent {
                        version: base_version,
                    });
                }
                Transform::Write(next) => next,
            };

            let mut state = self.lock()?;
            let live_version = state.world.get(key).map_or(0, |e| e.version);
            if live_version == base_version {
                state.world.insert(
                    key.to_string(),
                    SharedStateEntry {
                        key: key.to_string(),
                        value: next,
                        version: base_version + 1,
                    },
                );
                return Ok(UpdateOutcome::Committed {
                    version: base_version + 1,
                });
            }
            drop(state);

            debug!(key, attempt, "atomic update lost a race, retrying on fresh value");
        }

        Ok(UpdateOutcome::Conflict)
    }

    fn register_presence(&self, reg: &Registration, stale_after: Duration) -> Result<PresenceRecord> {
        require("identity", &reg.identity)?;
        let now = self.clock.now();
        let mut state = self.lock()?;

        let key = fold(&reg.identity);
        let (identity, connected_at) = match state.presence.get(&key) {
            Some(existing) if !existing.is_stale(now, window(stale_after)) => {
                (existing.identity.clone(), existing.connected_at)
            }
            Some(existing) => (existing.identity.clone(), now),
            None => (reg.identity.clone(), now),
        };

        let record = PresenceRecord {
            identity,
            display_name: reg.display_name.clone(),
            location: reg.location.clone(),
            connection_kind: reg.connection_kind,
            session_id: reg.session_id,
            connected_at,
            last_heartbeat_at: now,
        };
        state.presence.insert(key, record.clone());
        Ok(record)
    }

    fn touch_presence(&self, identity: &str, location: &str) -> Result<bool> {
        require("identity", identity)?;
        let now = self.clock.now();
        let mut state = self.lock()?;
        match state.presence.get_mut(&fold(identity)) {
            Some(record) => {
                record.last_heartbeat_at = now;
                record.location = location.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_presence(&self, identity: &str) -> Result<bool> {
        require("identity", identity)?;
        Ok(self.lock()?.presence.remove(&fold(identity)).is_some())
    }

    fn remove_presence_owned(&self, identity: &str, session_id: Uuid) -> Result<bool> {
        require("identity", identity)?;
        let mut state = self.lock()?;
        let key = fold(identity);
        if state.presence.get(&key).is_some_and(|r| r.session_id == session_id) {
            state.presence.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }

    fn get_presence(&self, identity: &str) -> Result<Option<PresenceRecord>> {
        require("identity", identity)?;
        Ok(self.lock()?.presence.get(&fold(identity)).cloned())
    }

    fn list_presence(&self, stale_after: Duration) -> Result<Vec<PresenceRecord>> {
        let now = self.clock.now();
        let mut online: Vec<PresenceRecord> = self
            .lock()?
            .presence
            .values()
            .filter(|r| !r.is_stale(now, window(stale_after)))
            .cloned()
            .collect();
        online.sort_by(|a, b| {
            fold(&a.display_name)
                .cmp(&fold(&b.display_name))
                .then_with(|| a.identity.cmp(&b.identity))
        });
        Ok(online)
    }

    fn remove_stale_presence(&self, stale_after: Duration) -> Result<usize> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        let before = state.presence.len();
        state.presence.retain(|_, r| !r.is_stale(now, window(stale_after)));
        Ok(before - state.presence.len())
    }

    fn insert_message(&self, from: &str, to: &str, kind: &MessageKind, body: &str) -> Result<i64> {
        require("from", from)?;
        require("to", to)?;
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.next_message_id += 1;
        let id = state.next_message_id;
        state.messages.insert(
            id,
            Message {
                id,
                from: from.to_string(),
                to: to.to_string(),
                kind: kind.clone(),
                body: body.to_string(),
                delivered: false,
                created_at: now,
            },
        );
        Ok(id)
    }

    fn unread_messages(&self, identity: &str, after_id: i64) -> Result<Vec<Message>> {
        require("identity", identity)?;
        if identity == BROADCAST {
            return Err(BackendError::InvalidArgument(
                "the broadcast marker is not a recipient".into(),
            ));
        }
        let state = self.lock()?;
        Ok(state
            .messages
            .values()
            .filter(|m| {
                (m.to.eq_ignore_ascii_case(identity) && !m.delivered)
                    || (m.is_broadcast() && m.id > after_id)
            })
            .cloned()
            .collect())
    }

    fn mark_delivered(&self, identity: &str, through: Option<i64>) -> Result<usize> {
        require("identity", identity)?;
        if identity == BROADCAST {
            return Ok(0);
        }
        let through = through.unwrap_or(i64::MAX);
        let mut state = self.lock()?;
        let mut marked = 0;
        for message in state.messages.range_mut(..=through).map(|(_, m)| m) {
            if !message.delivered && message.to.eq_ignore_ascii_case(identity) {
                message.delivered = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    fn max_message_id(&self) -> Result<i64> {
        Ok(self.lock()?.messages.keys().next_back().copied().unwrap_or(0))
    }

    fn insert_news(&self, message: &str, category: &str, author: &str) -> Result<i64> {
        require("message", message)?;
        let now = self.clock.now();
        let mut state = self.lock()?;
        let id = state.news.len() as i64 + 1;
        state.news.push(NewsEntry {
            id,
            message: message.to_string(),
            category: category.to_string(),
            author: author.to_string(),
            created_at: now,
        });
        Ok(id)
    }

    fn recent_news(&self, limit: usize) -> Result<Vec<NewsEntry>> {
        Ok(self.lock()?.news.iter().rev().take(limit).cloned().collect())
    }

    fn record_login(&self, identity: &str, display_name: &str) -> Result<()> {
        require("identity", identity)?;
        let now = self.clock.now();
        let mut state = self.lock()?;
        let player = state
            .players
            .entry(fold(identity))
            .or_insert_with(|| PlayerRecord {
                identity: identity.to_string(),
                display_name: display_name.to_string(),
                first_seen_at: now,
                last_login_at: None,
                last_logout_at: None,
                total_playtime_secs: 0,
            });
        player.display_name = display_name.to_string();
        player.last_login_at = Some(now);
        Ok(())
    }

    fn record_logout(&self, identity: &str) -> Result<()> {
        require("identity", identity)?;
        let now = self.clock.now();
        let mut state = self.lock()?;
        if let Some(player) = state.players.get_mut(&fold(identity)) {
            if let Some(login) = player.last_login_at {
                if player.last_logout_at.is_none_or(|out| out < login) {
                    player.total_playtime_secs += (now - login).num_seconds().max(0);
                }
            }
            player.last_logout_at = Some(now);
        }
        Ok(())
    }

    fn get_player(&self, identity: &str) -> Result<Option<PlayerRecord>> {
        require("identity", identity)?;
        Ok(self.lock()?.players.get(&fold(identity)).cloned())
    }

    fn find_player(&self, name: &str) -> Result<Option<PlayerRecord>> {
        if name.trim().is_empty() {
            return Ok(None);
        }
        let state = self.lock()?;
        if let Some(player) = state.players.get(&fold(name)) {
            return Ok(Some(player.clone()));
        }
        Ok(state
            .players
            .values()
            .find(|p| p.display_name.eq_ignore_ascii_case(name))
            .cloned())
    }
}
