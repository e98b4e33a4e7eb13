//! Database row types. These map directly to SQLite rows and are converted
//! into the `tavern-types` models at the edge of the query layer.

use tavern_types::{Message, NewsEntry, PlayerRecord, PresenceRecord};
use uuid::Uuid;

use crate::clock::from_millis;
use crate::error::{BackendError, Result};

pub struct PresenceRow {
    pub identity: String,
    pub display_name: String,
    pub location: String,
    pub connection_kind: String,
    pub session_id: String,
    pub connected_at: i64,
    pub last_heartbeat: i64,
}

impl PresenceRow {
    pub const COLUMNS: &'static str = "identity, display_name, location, connection_kind, \
         session_id, connected_at, last_heartbeat";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: row.get(0)?,
            display_name: row.get(1)?,
            location: row.get(2)?,
            connection_kind: row.get(3)?,
            session_id: row.get(4)?,
            connected_at: row.get(5)?,
            last_heartbeat: row.get(6)?,
        })
    }

    pub fn into_model(self) -> Result<PresenceRecord> {
        let session_id = self.session_id.parse::<Uuid>().map_err(|e| {
            BackendError::Corrupt(format!(
                "session_id '{}' on presence '{}': {}",
                self.session_id, self.identity, e
            ))
        })?;

        Ok(PresenceRecord {
            connection_kind: self.connection_kind.as_str().into(),
            connected_at: from_millis(self.connected_at)?,
            last_heartbeat_at: from_millis(self.last_heartbeat)?,
            identity: self.identity,
            display_name: self.display_name,
            location: self.location,
            session_id,
        })
    }
}

pub struct MessageRow {
    pub id: i64,
    pub from_identity: String,
    pub to_identity: String,
    pub kind: String,
    pub body: String,
    pub delivered: bool,
    pub created_at: i64,
}

impl MessageRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            from_identity: row.get(1)?,
            to_identity: row.get(2)?,
            kind: row.get(3)?,
            body: row.get(4)?,
            delivered: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    pub fn into_model(self) -> Result<Message> {
        Ok(Message {
            id: self.id,
            from: self.from_identity,
            to: self.to_identity,
            kind: self.kind.into(),
            body: self.body,
            delivered: self.delivered,
            created_at: from_millis(self.created_at)?,
        })
    }
}

pub struct NewsRow {
    pub id: i64,
    pub message: String,
    pub category: String,
    pub author: String,
    pub created_at: i64,
}

impl NewsRow {
    pub fn into_model(self) -> Result<NewsEntry> {
        Ok(NewsEntry {
            id: self.id,
            message: self.message,
            category: self.category,
            author: self.author,
            created_at: from_millis(self.created_at)?,
        })
    }
}

pub struct PlayerRow {
    pub identity: String,
    pub display_name: String,
    pub first_seen_at: i64,
    pub last_login_at: Option<i64>,
    pub last_logout_at: Option<i64>,
    pub total_playtime_secs: i64,
}

impl PlayerRow {
    pub const COLUMNS: &'static str = "identity, display_name, first_seen_at, last_login_at, \
         last_logout_at, total_playtime_secs";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: row.get(0)?,
            display_name: row.get(1)?,
            first_seen_at: row.get(2)?,
            last_login_at: row.get(3)?,
            last_logout_at: row.get(4)?,
            total_playtime_secs: row.get(5)?,
        })
    }

    pub fn into_model(self) -> Result<PlayerRecord> {
        Ok(PlayerRecord {
            identity: self.identity,
            display_name: self.display_name,
            first_seen_at: from_millis(self.first_seen_at)?,
            last_login_at: self.last_login_at.map(from_millis).transpose()?,
            last_logout_at: self.last_logout_at.map(from_millis).transpose()?,
            total_playtime_secs: self.total_playtime_secs,
        })
    }
}
