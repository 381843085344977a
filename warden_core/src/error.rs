//! Error types for the Warden permission engine.
//!
//! This module defines the error hierarchy shared by both crates, enabling
//! precise error handling throughout the system.

use thiserror::Error;

/// Root error type for the Warden system.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Holder error: {0}")]
    Holder(#[from] HolderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised while constructing or parsing nodes.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Errors raised by holder mutations and track navigation.
///
/// Both variants guarantee that no state change happened: mutations are
/// validated before anything is applied.
#[derive(Debug, Error)]
pub enum HolderError {
    #[error("The object already has that node: {0}")]
    AlreadyHas(String),

    #[error("The object does not have that node: {0}")]
    Lacks(String),
}

/// Errors surfaced by storage collaborators.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Holder not found in storage: {0}")]
    NotFound(String),

    #[error("Holder already exists in storage: {0}")]
    AlreadyExists(String),

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

impl Error {
    /// Whether this error is a storage `NotFound`.
    ///
    /// The manager uses this to distinguish "first load, create the record"
    /// from a genuine backend failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Storage(StorageError::NotFound(_)))
    }
}

/// Result type used throughout the Warden system.
pub type Result<T> = std::result::Result<T, Error>;
