use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackendError>;

/// Failures surfaced by a [`crate::PersistenceBackend`].
///
/// Lost compare-and-set races are not errors; see
/// [`tavern_types::UpdateOutcome::Conflict`]. Missing keys are `None`.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Storage hiccup: busy database, I/O failure, poisoned lock.
    /// Safe to retry on the next tick.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Caller broke the contract (empty key, empty identity).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => Self::Corrupt(e.to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

pub(crate) fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BackendError::InvalidArgument(format!("{} must not be empty", field)));
    }
    Ok(())
}
