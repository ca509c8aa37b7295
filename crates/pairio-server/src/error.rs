//! Server errors

use pairio_core::RejectReason;
use thiserror::Error;

/// Machine-readable error codes carried in error bodies
pub mod error_codes {
    // Not found
    pub const CHANNEL_NOT_FOUND: u32 = 40401;
    pub const COLLECTION_NOT_FOUND: u32 = 40402;
    pub const KEY_NOT_FOUND: u32 = 40403;

    // Access
    pub const INVALID_SIGNATURE: u32 = 40101;
    pub const QUOTA_EXCEEDED: u32 = 42901;

    // Availability
    pub const DEFERRAL_TIMEOUT: u32 = 50301;

    // Backend
    pub const STORAGE_ERROR: u32 = 50002;
}

/// Failure of the key/value store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to HTTP callers
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),

    #[error("Not found: {collection}/{key}")]
    KeyNotFound { collection: String, key: String },

    #[error("Timed out after {0:?} waiting for a concurrency slot")]
    DeferralTimeout(std::time::Duration),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServerError {
    pub fn error_code(&self) -> u32 {
        match self {
            ServerError::Rejected(reason) => match reason {
                RejectReason::ChannelNotFound(_) => error_codes::CHANNEL_NOT_FOUND,
                RejectReason::CollectionNotFound { .. } => error_codes::COLLECTION_NOT_FOUND,
                RejectReason::InvalidSignature => error_codes::INVALID_SIGNATURE,
                RejectReason::QuotaExceeded(_) => error_codes::QUOTA_EXCEEDED,
            },
            ServerError::KeyNotFound { .. } => error_codes::KEY_NOT_FOUND,
            ServerError::DeferralTimeout(_) => error_codes::DEFERRAL_TIMEOUT,
            ServerError::Storage(_) => error_codes::STORAGE_ERROR,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ServerError::Rejected(reason) => match reason {
                RejectReason::ChannelNotFound(_) | RejectReason::CollectionNotFound { .. } => 404,
                RejectReason::InvalidSignature => 401,
                RejectReason::QuotaExceeded(_) => 429,
            },
            ServerError::KeyNotFound { .. } => 404,
            ServerError::DeferralTimeout(_) => 503,
            ServerError::Storage(_) => 500,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
