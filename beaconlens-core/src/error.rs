//! Error types for beaconlens-core

use thiserror::Error;

/// Main error type for the beaconlens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Storage failure (transient from the caller's point of view)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or malformed required field on an inbound event or query
    #[error("validation error: {0}")]
    Validation(String),

    /// Event names a domain the registry does not know
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    /// Event names a domain that no longer accepts telemetry
    #[error("domain is inactive: {0}")]
    InactiveDomain(String),

    /// Caller presented no credential, or one the scope resolver rejects
    #[error("unauthorized")]
    Unauthorized,

    /// Caller's scope resolved to zero domains
    #[error("no accessible domains")]
    NoAccessibleDomains,

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl Error {
    /// True for errors caused by the caller's input rather than by storage.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::UnknownDomain(_)
                | Error::InactiveDomain(_)
                | Error::Unauthorized
                | Error::NoAccessibleDomains
                | Error::SessionNotFound(_)
        )
    }
}

/// Result type alias for beaconlens-core
pub type Result<T> = std::result::Result<T, Error>;
