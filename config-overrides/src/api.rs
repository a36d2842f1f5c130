use std::sync::Arc;

use thiserror::Error;

use crate::override_definitions::OverrideType;
use crate::tabs::TabId;

/// Errors coming out of a `StorageClient`.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("storage is not available in this host")]
    Unavailable,
    #[error("timed out while talking to storage")]
    Timeout,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("failed to encode overrides for storage: {0}")]
    Serialization(String),
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Redis(Arc::new(err))
        }
    }
}

/// Errors coming out of the tab query and tab navigation collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TabError {
    #[error("tab APIs are not available in this host")]
    Unavailable,
    #[error("tab operation failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unknown override key {0}")]
    UnknownKey(String),
    #[error("override {key} expects a {expected} value, got {actual}")]
    TypeMismatch {
        key: String,
        expected: OverrideType,
        actual: OverrideType,
    },
    #[error("invalid override schema: {0}")]
    InvalidSchema(String),
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("failed to navigate tab {tab_id}: {source}")]
    Navigation {
        tab_id: TabId,
        #[source]
        source: TabError,
    },
    #[error(transparent)]
    Storage(#[from] StoreError),
}
