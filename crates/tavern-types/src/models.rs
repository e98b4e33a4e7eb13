use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{ConnectionKind, MessageKind};

/// Recipient marker for messages addressed to every session.
pub const BROADCAST: &str = "*";

/// One versioned shared-state document. Value and version always travel together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedStateEntry {
    pub key: String,
    pub value: String,
    pub version: u64,
}

/// A decoded document paired with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Result of a compare-and-set update on a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The transform's output was written at `version`.
    Committed { version: u64 },
    /// The transform kept the current value; nothing was written.
    /// `version` is 0 when the key has never been written.
    AlreadyCurrent { version: u64 },
    /// Other writers kept winning until the retry budget ran out.
    Conflict,
}

impl UpdateOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub identity: String,
    pub display_name: String,
    pub location: String,
    pub connection_kind: ConnectionKind,
    /// Session instance that owns this record. A newer session for the same
    /// identity takes ownership on register.
    pub session_id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// Stale once the heartbeat has been silent for strictly longer than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.last_heartbeat_at > threshold
    }
}

/// Inter-session message. `id` defines the global delivery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    pub body: String,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsEntry {
    pub id: i64,
    pub message: String,
    pub category: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Directory entry for an identity that has connected at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub identity: String,
    pub display_name: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_logout_at: Option<DateTime<Utc>>,
    pub total_playtime_secs: i64,
}

/// Contents of the reserved `daily_state` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLockRecord {
    pub last_reset_day: i64,
    pub processed_by: String,
    #[serde(default = "Utc::now")]
    pub processed_at: DateTime<Utc>,
}
