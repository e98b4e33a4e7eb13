use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tavern_db::Transform;
use tavern_types::{SharedStateEntry, UpdateOutcome, Versioned};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::{Backend, best_effort, with_backend};

/// Reserved key holding the daily-reset lock record.
pub const DAILY_STATE_KEY: &str = "daily_state";

/// The fixed set of game-wide documents persisted on behalf of game logic.
/// Contents are opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedDocument {
    Npcs,
    RoyalCourt,
    WorldEvents,
    Quests,
    Marketplace,
    StorySystems,
    Marriages,
    Economy,
    Children,
}

impl SharedDocument {
    pub const ALL: [SharedDocument; 9] = [
        Self::Npcs,
        Self::RoyalCourt,
        Self::WorldEvents,
        Self::Quests,
        Self::Marketplace,
        Self::StorySystems,
        Self::Marriages,
        Self::Economy,
        Self::Children,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Npcs => "npcs",
            Self::RoyalCourt => "royal_court",
            Self::WorldEvents => "world_events",
            Self::Quests => "quests",
            Self::Marketplace => "marketplace",
            Self::StorySystems => "story_systems",
            Self::Marriages => "marriages",
            Self::Economy => "economy",
            Self::Children => "children",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|doc| doc.key() == key)
    }
}

impl fmt::Display for SharedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-document results of [`StateSynchronizer::save_all`]. There is no
/// cross-document transaction, so a partial save is a normal outcome.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub saved: Vec<(SharedDocument, u64)>,
    pub failed: Vec<(SharedDocument, String)>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Versioned access to shared-state documents for one session.
#[derive(Clone)]
pub struct StateSynchronizer {
    backend: Backend,
    identity: Arc<str>,
}

impl StateSynchronizer {
    pub fn new(backend: Backend, identity: impl Into<String>) -> Self {
        let identity: String = identity.into();
        Self {
            backend,
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Publish the latest blob for `key`, overwriting whatever is there.
    pub async fn save_state(&self, key: &str, blob: impl Into<String>) -> Result<u64, SyncError> {
        reject_reserved(key)?;
        let key = key.to_string();
        let blob = blob.into();
        let version = with_backend(&self.backend, {
            let key = key.clone();
            move |b| b.put_state(&key, &blob)
        })
        .await?;
        debug!(key, version, "saved shared state");
        Ok(version)
    }

    /// Missing keys and storage hiccups both read as `None`; the caller starts
    /// from its default.
    pub async fn load_state(&self, key: &str) -> Result<Option<SharedStateEntry>, SyncError> {
        let key = key.to_string();
        let result = with_backend(&self.backend, move |b| b.get_state(&key)).await;
        Ok(best_effort("load shared state", result)?.flatten())
    }

    /// Compare-and-set update of one document. `transform` may run several
    /// times and must be deterministic.
    pub async fn atomic_update<F>(&self, key: &str, transform: F) -> Result<UpdateOutcome, SyncError>
    where
        F: Fn(Option<&str>) -> Transform + Send + Sync + 'static,
    {
        reject_reserved(key)?;
        self.atomic_update_raw(key, transform).await
    }

    pub(crate) async fn atomic_update_raw<F>(
        &self,
        key: &str,
        transform: F,
    ) -> Result<UpdateOutcome, SyncError>
    where
        F: Fn(Option<&str>) -> Transform + Send + Sync + 'static,
    {
        let key = key.to_string();
        let outcome = with_backend(&self.backend, move |b| b.atomic_update(&key, &transform)).await?;
        Ok(outcome)
    }

    pub async fn save_document<T: Serialize>(
        &self,
        doc: SharedDocument,
        value: &T,
    ) -> Result<u64, SyncError> {
        let json = serde_json::to_string(value).map_err(|source| SyncError::Encode {
            key: doc.key().to_string(),
            source,
        })?;
        self.save_state(doc.key(), json).await
    }

    /// Decode a document. A blob that fails to parse is logged and treated as
    /// absent so one session's bad write cannot take down the others.
    pub async fn load_document<T: DeserializeOwned>(
        &self,
        doc: SharedDocument,
    ) -> Result<Option<Versioned<T>>, SyncError> {
        let Some(entry) = self.load_state(doc.key()).await? else {
            return Ok(None);
        };
        if entry.value.is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<T>(&entry.value) {
            Ok(value) => Ok(Some(Versioned {
                value,
                version: entry.version,
            })),
            Err(e) => {
                warn!(
                    "Corrupt shared document '{}' at version {}: {}",
                    doc, entry.version, e
                );
                Ok(None)
            }
        }
    }

    /// Save each supplied document independently.
    pub async fn save_all<I>(&self, blobs: I) -> SyncReport
    where
        I: IntoIterator<Item = (SharedDocument, String)>,
    {
        let mut report = SyncReport::default();
        for (doc, blob) in blobs {
            match self.save_state(doc.key(), blob).await {
                Ok(version) => report.saved.push((doc, version)),
                Err(e) => {
                    warn!("Failed to save shared document '{}': {}", doc, e);
                    report.failed.push((doc, e.to_string()));
                }
            }
        }
        debug!(
            saved = report.saved.len(),
            failed = report.failed.len(),
            "shared state save pass finished"
        );
        report
    }

    /// Load every document that exists. An empty map means an empty world.
    pub async fn load_all(&self) -> HashMap<SharedDocument, SharedStateEntry> {
        let mut world = HashMap::new();
        for doc in SharedDocument::ALL {
            match self.load_state(doc.key()).await {
                Ok(Some(entry)) => {
                    world.insert(doc, entry);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load shared document '{}': {}", doc, e),
            }
        }
        debug!(documents = world.len(), "shared state loaded");
        world
    }
}

fn reject_reserved(key: &str) -> Result<(), SyncError> {
    if key == DAILY_STATE_KEY {
        return Err(SyncError::ReservedKey(key.to_string()));
    }
    Ok(())
}
