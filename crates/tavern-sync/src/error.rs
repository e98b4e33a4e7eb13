use tavern_db::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Backend(BackendError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("'{0}' is reserved for daily-reset coordination")]
    ReservedKey(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to encode shared document '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<BackendError> for SyncError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            other => Self::Backend(other),
        }
    }
}
