use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tavern_types::{
    BROADCAST, Message, MessageKind, NewsEntry, PlayerRecord, PresenceRecord, SharedStateEntry,
    UpdateOutcome,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::Database;
use crate::backend::{PersistenceBackend, Registration, Transform};
use crate::clock::to_millis;
use crate::error::{BackendError, Result, require};
use crate::models::{MessageRow, NewsRow, PlayerRow, PresenceRow};

impl Database {
    fn now_millis(&self) -> i64 {
        to_millis(PersistenceBackend::now(self))
    }

    /// Heartbeats at or after this instant are fresh.
    fn fresh_cutoff(&self, stale_after: Duration) -> i64 {
        let window = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
        self.now_millis().saturating_sub(window)
    }
}

impl PersistenceBackend for Database {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -- Shared state --

    fn get_state(&self, key: &str) -> Result<Option<SharedStateEntry>> {
        require("key", key)?;
        self.with_conn(|conn| query_state(conn, key))
    }

    fn put_state(&self, key: &str, value: &str) -> Result<u64> {
        require("key", key)?;
        let now = self.now_millis();
        let version: i64 = self.with_conn_mut(|conn| {
            let v = conn.query_row(
                "INSERT INTO world_state (key, value, version, updated_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     version = world_state.version + 1,
                     updated_at = excluded.updated_at
                 RETURNING version",
                params![key, value, now],
                |row| row.get(0),
            )?;
            Ok(v)
        })?;
        to_version(version)
    }

    fn atomic_update(
        &self,
        key: &str,
        transform: &dyn Fn(Option<&str>) -> Transform,
    ) -> Result<UpdateOutcome> {
        require("key", key)?;

        for attempt in 1..=self.options.max_cas_attempts {
            let current = self.with_conn(|conn| query_state(conn, key))?;
            let base_version = current.as_ref().map_or(0, |e| e.version);

            let next = match transform(current.as_ref().map(|e| e.value.as_str())) {
                Transform::Keep => {
                    return Ok(UpdateOutcome::AlreadyCurrent {
                        version: base_version,
                    });
                }
                Transform::Write(next) => next,
            };

            let now = self.now_millis();
            let written = self.with_conn_mut(|conn| {
                let n = if base_version == 0 {
                    conn.execute(
                        "INSERT INTO world_state (key, value, version, updated_at)
                         VALUES (?1, ?2, 1, ?3)
                         ON CONFLICT(key) DO NOTHING",
                        params![key, next, now],
                    )?
                } else {
                    conn.execute(
                        "UPDATE world_state SET value = ?2, version = version + 1, updated_at = ?3
                         WHERE key = ?1 AND version = ?4",
                        params![key, next, now, from_version(base_version)?],
                    )?
                };
                Ok(n)
            })?;

            if written == 1 {
                return Ok(UpdateOutcome::Committed {
                    version: base_version + 1,
                });
            }

            debug!(key, attempt, "atomic update lost a race, retrying on fresh value");
        }

        info!(key, "atomic update gave up after {} attempts", self.options.max_cas_attempts);
        Ok(UpdateOutcome::Conflict)
    }

    // -- Presence --

    fn register_presence(&self, reg: &Registration, stale_after: Duration) -> Result<PresenceRecord> {
        require("identity", &reg.identity)?;
        let now = self.now_millis();
        let cutoff = self.fresh_cutoff(stale_after);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO online_players
                     (identity, display_name, location, connection_kind, session_id, connected_at, last_heartbeat)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(identity) DO UPDATE SET
                     display_name = excluded.display_name,
                     location = excluded.location,
                     connection_kind = excluded.connection_kind,
                     session_id = excluded.session_id,
                     connected_at = CASE WHEN online_players.last_heartbeat >= ?7
                                         THEN online_players.connected_at
                                         ELSE excluded.connected_at END,
                     last_heartbeat = excluded.last_heartbeat",
                params![
                    reg.identity,
                    reg.display_name,
                    reg.location,
                    reg.connection_kind.as_str(),
                    reg.session_id.to_string(),
                    now,
                    cutoff,
                ],
            )?;
            let record = query_presence(&tx, &reg.identity)?.ok_or_else(|| {
                BackendError::Transient(format!("presence for '{}' vanished after upsert", reg.identity))
            })?;
            tx.commit()?;
            Ok(record)
        })
    }

    fn touch_presence(&self, identity: &str, location: &str) -> Result<bool> {
        require("identity", identity)?;
        let now = self.now_millis();
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE online_players SET last_heartbeat = ?2, location = ?3 WHERE identity = ?1",
                params![identity, now, location],
            )?;
            Ok(n > 0)
        })
    }

    fn remove_presence(&self, identity: &str) -> Result<bool> {
        require("identity", identity)?;
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM online_players WHERE identity = ?1", [identity])?;
            Ok(n > 0)
        })
    }

    fn remove_presence_owned(&self, identity: &str, session_id: Uuid) -> Result<bool> {
        require("identity", identity)?;
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM online_players WHERE identity = ?1 AND session_id = ?2",
                params![identity, session_id.to_string()],
            )?;
            Ok(n > 0)
        })
    }

    fn get_presence(&self, identity: &str) -> Result<Option<PresenceRecord>> {
        require("identity", identity)?;
        self.with_conn(|conn| query_presence(conn, identity))
    }

    fn list_presence(&self, stale_after: Duration) -> Result<Vec<PresenceRecord>> {
        let cutoff = self.fresh_cutoff(stale_after);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM online_players
                 WHERE last_heartbeat >= ?1
                 ORDER BY display_name COLLATE NOCASE, identity",
                PresenceRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([cutoff], PresenceRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(PresenceRow::into_model).collect()
        })
    }

    fn remove_stale_presence(&self, stale_after: Duration) -> Result<usize> {
        let cutoff = self.fresh_cutoff(stale_after);
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM online_players WHERE last_heartbeat < ?1", [cutoff])?;
            Ok(n)
        })
    }

    // -- Messages --

    fn insert_message(&self, from: &str, to: &str, kind: &MessageKind, body: &str) -> Result<i64> {
        require("from", from)?;
        require("to", to)?;
        let now = self.now_millis();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (from_identity, to_identity, kind, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![from, to, kind.as_str(), body, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn unread_messages(&self, identity: &str, after_id: i64) -> Result<Vec<Message>> {
        require("identity", identity)?;
        if identity == BROADCAST {
            return Err(BackendError::InvalidArgument(
                "the broadcast marker is not a recipient".into(),
            ));
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, from_identity, to_identity, kind, body, delivered, created_at
                 FROM messages
                 WHERE (to_identity = ?1 AND delivered = 0)
                    OR (to_identity = '*' AND id > ?2)
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![identity, after_id], MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_model).collect()
        })
    }

    fn mark_delivered(&self, identity: &str, through: Option<i64>) -> Result<usize> {
        require("identity", identity)?;
        if identity == BROADCAST {
            return Ok(0);
        }
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE messages SET delivered = 1
                 WHERE to_identity = ?1 AND delivered = 0 AND id <= ?2",
                params![identity, through.unwrap_or(i64::MAX)],
            )?;
            Ok(n)
        })
    }

    fn max_message_id(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let id = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM messages", [], |r| r.get(0))?;
            Ok(id)
        })
    }

    // -- News --

    fn insert_news(&self, message: &str, category: &str, author: &str) -> Result<i64> {
        require("message", message)?;
        let now = self.now_millis();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO news (message, category, author, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![message, category, author, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn recent_news(&self, limit: usize) -> Result<Vec<NewsEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message, category, author, created_at
                 FROM news ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(NewsRow {
                        id: row.get(0)?,
                        message: row.get(1)?,
                        category: row.get(2)?,
                        author: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(NewsRow::into_model).collect()
        })
    }

    // -- Player directory --

    fn record_login(&self, identity: &str, display_name: &str) -> Result<()> {
        require("identity", identity)?;
        let now = self.now_millis();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO players (identity, display_name, first_seen_at, last_login_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(identity) DO UPDATE SET
                     display_name = excluded.display_name,
                     last_login_at = excluded.last_login_at",
                params![identity, display_name, now],
            )?;
            Ok(())
        })
    }

    fn record_logout(&self, identity: &str) -> Result<()> {
        require("identity", identity)?;
        let now = self.now_millis();
        self.with_conn_mut(|conn| {
            // Only the first logout after a login adds playtime.
            conn.execute(
                "UPDATE players SET
                     total_playtime_secs = total_playtime_secs + CASE
                         WHEN last_login_at IS NOT NULL
                              AND (last_logout_at IS NULL OR last_logout_at < last_login_at)
                         THEN MAX(0, (?2 - last_login_at) / 1000)
                         ELSE 0 END,
                     last_logout_at = ?2
                 WHERE identity = ?1",
                params![identity, now],
            )?;
            Ok(())
        })
    }

    fn get_player(&self, identity: &str) -> Result<Option<PlayerRecord>> {
        require("identity", identity)?;
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM players WHERE identity = ?1", PlayerRow::COLUMNS),
                    [identity],
                    PlayerRow::from_row,
                )
                .optional()?;
            row.map(PlayerRow::into_model).transpose()
        })
    }

    fn find_player(&self, name: &str) -> Result<Option<PlayerRecord>> {
        if name.trim().is_empty() {
            return Ok(None);
        }
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM players WHERE identity = ?1 OR display_name = ?1
                         ORDER BY identity = ?1 DESC LIMIT 1",
                        PlayerRow::COLUMNS
                    ),
                    [name],
                    PlayerRow::from_row,
                )
                .optional()?;
            row.map(PlayerRow::into_model).transpose()
        })
    }
}

fn query_state(conn: &Connection, key: &str) -> Result<Option<SharedStateEntry>> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT value, version FROM world_state WHERE key = ?1",
            [key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(value, version)| {
        Ok(SharedStateEntry {
            key: key.to_string(),
            value,
            version: to_version(version)?,
        })
    })
    .transpose()
}

fn query_presence(conn: &Connection, identity: &str) -> Result<Option<PresenceRecord>> {
    let sql = format!(
        "SELECT {} FROM online_players WHERE identity = ?1",
        PresenceRow::COLUMNS
    );
    let row = conn
        .query_row(&sql, [identity], PresenceRow::from_row)
        .optional()?;
    row.map(PresenceRow::into_model).transpose()
}

fn to_version(v: i64) -> Result<u64> {
    u64::try_from(v).map_err(|_| BackendError::Corrupt(format!("negative version {}", v)))
}

fn from_version(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| BackendError::Corrupt(format!("version {} out of range", v)))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
