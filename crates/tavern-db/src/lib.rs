pub mod backend;
pub mod clock;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::info;

pub use backend::{PersistenceBackend, Registration, Transform};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BackendError, Result};
pub use memory::MemoryBackend;

const READER_POOL_SIZE: usize = 4;

/// Tunables shared by both backends.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Upper bound on waiting for SQLite's write lock before failing.
    pub busy_timeout: Duration,
    /// Read-transform-write attempts before an atomic update reports a conflict.
    pub max_cas_attempts: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(2),
            max_cas_attempts: 16,
        }
    }
}

/// SQLite backend with a reader/writer split.
///
/// Reads go through a small round-robin pool; all writes share one writer
/// connection. An atomic update reads through the pool and writes with a
/// version predicate, so it behaves the same way when several processes
/// share the database file.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
    clock: Arc<dyn Clock>,
    options: DatabaseOptions,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, Arc::new(SystemClock), DatabaseOptions::default())
    }

    pub fn open_with(path: &Path, clock: Arc<dyn Clock>, options: DatabaseOptions) -> Result<Self> {
        let writer = Connection::open(path)?;
        writer.busy_timeout(options.busy_timeout)?;

        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&writer)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(options.busy_timeout)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            READER_POOL_SIZE
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
            clock,
            options,
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|e| BackendError::Transient(format!("Reader lock poisoned: {}", e)))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .writer
            .lock()
            .map_err(|e| BackendError::Transient(format!("Writer lock poisoned: {}", e)))?;
        f(&mut conn)
    }
}
