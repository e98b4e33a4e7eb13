//! Shared-world synchronization for independently running player sessions.
//!
//! Every session talks to the same [`PersistenceBackend`]; there is no
//! coordinator process. Components are constructed explicitly and handed to
//! whoever needs them.

pub mod chat;
pub mod config;
pub mod daily;
pub mod error;
pub mod news;
pub mod presence;
pub mod relay;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tavern_db::{BackendError, PersistenceBackend};
use tracing::warn;

pub use chat::{ChatFacade, ChatReply, RosterLine};
pub use config::SyncConfig;
pub use daily::{ClaimOutcome, day_number};
pub use error::SyncError;
pub use news::NewsFeed;
pub use presence::PresenceTracker;
pub use relay::{Inbox, MessageRelay};
pub use session::OnlineSession;
pub use state::{SharedDocument, StateSynchronizer, SyncReport};

pub type Backend = Arc<dyn PersistenceBackend>;

/// Run a blocking backend call off the async runtime.
pub(crate) async fn with_backend<F, T>(backend: &Backend, f: F) -> Result<T, BackendError>
where
    F: FnOnce(&dyn PersistenceBackend) -> Result<T, BackendError> + Send + 'static,
    T: Send + 'static,
{
    let backend = backend.clone();
    tokio::task::spawn_blocking(move || f(backend.as_ref()))
        .await
        .map_err(|e| BackendError::Transient(format!("spawn_blocking join error: {}", e)))?
}

/// Presence, messaging and news are best effort: storage hiccups are logged
/// and read as "nothing happened", contract violations still reach the caller.
pub(crate) fn best_effort<T>(op: &str, result: Result<T, BackendError>) -> Result<Option<T>, SyncError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(BackendError::InvalidArgument(msg)) => Err(SyncError::InvalidArgument(msg)),
        Err(e) => {
            warn!("{} failed: {}", op, e);
            Ok(None)
        }
    }
}
