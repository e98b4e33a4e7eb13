use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Database: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE world_state (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                version     INTEGER NOT NULL DEFAULT 1,
                updated_at  INTEGER NOT NULL
            );

            CREATE TABLE online_players (
                identity         TEXT PRIMARY KEY COLLATE NOCASE,
                display_name     TEXT NOT NULL,
                location         TEXT NOT NULL,
                connection_kind  TEXT NOT NULL DEFAULT 'Unknown',
                session_id       TEXT NOT NULL,
                connected_at     INTEGER NOT NULL,
                last_heartbeat   INTEGER NOT NULL
            );

            CREATE INDEX idx_online_heartbeat ON online_players(last_heartbeat);

            CREATE TABLE messages (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                from_identity  TEXT NOT NULL COLLATE NOCASE,
                to_identity    TEXT NOT NULL COLLATE NOCASE,
                kind           TEXT NOT NULL,
                body           TEXT NOT NULL,
                delivered      INTEGER NOT NULL DEFAULT 0,
                created_at     INTEGER NOT NULL
            );

            CREATE INDEX idx_messages_to ON messages(to_identity, delivered);

            CREATE TABLE news (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                message     TEXT NOT NULL,
                category    TEXT NOT NULL DEFAULT '',
                author      TEXT NOT NULL DEFAULT '',
                created_at  INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Database: running migration v2 (player directory)");
        conn.execute_batch(
            "
            CREATE TABLE players (
                identity             TEXT PRIMARY KEY COLLATE NOCASE,
                display_name         TEXT NOT NULL COLLATE NOCASE,
                first_seen_at        INTEGER NOT NULL,
                last_login_at        INTEGER,
                last_logout_at       INTEGER,
                total_playtime_secs  INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_players_display_name ON players(display_name);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    Ok(())
}
