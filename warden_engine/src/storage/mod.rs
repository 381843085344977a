//! The storage collaborator contract.
//!
//! The engine talks to persistence only through the [`Storage`] trait: an
//! ordered raw node list per holder, group/track definitions, and an
//! identity lookup cache. No wire format is mandated. The same operations
//! are exposed in three calling conventions — the blocking trait itself,
//! async futures, and completion callbacks — via [`AsyncStorage`].

mod facade;
mod memory;

pub use facade::AsyncStorage;
pub use memory::MemoryStorage;

use uuid::Uuid;

use warden_core::error::Result;
use warden_core::{HolderId, NodeRecord};

/// Blocking storage contract.
///
/// Implementations must be safe to call from any thread. The engine never
/// retries failed operations; retry policy belongs to the implementation
/// or the caller. A failed save leaves the engine's in-memory state
/// unchanged.
pub trait Storage: Send + Sync {
    /// Load the ordered raw node list for a holder.
    /// Fails with `StorageError::NotFound` if no record exists.
    fn load_nodes(&self, id: &HolderId) -> Result<Vec<NodeRecord>>;

    /// Persist the full node list for a holder, replacing what was stored.
    fn save_nodes(&self, id: &HolderId, nodes: &[NodeRecord]) -> Result<()>;

    /// Create an empty backing record for a holder.
    /// Fails with `StorageError::AlreadyExists` if one exists.
    fn create_holder(&self, id: &HolderId) -> Result<()>;

    /// Delete a holder's backing record.
    /// Fails with `StorageError::NotFound` if none exists.
    fn delete_holder(&self, id: &HolderId) -> Result<()>;

    /// Load a track's ordered group list.
    fn load_track(&self, name: &str) -> Result<Vec<String>>;

    /// Persist a track's ordered group list.
    fn save_track(&self, name: &str, groups: &[String]) -> Result<()>;

    /// Delete a track.
    fn delete_track(&self, name: &str) -> Result<()>;

    /// Look up the username last seen for a UUID.
    fn resolve_name(&self, uuid: Uuid) -> Result<Option<String>>;

    /// Look up the UUID last seen for a username (case-insensitive).
    fn resolve_uuid(&self, name: &str) -> Result<Option<Uuid>>;
}
