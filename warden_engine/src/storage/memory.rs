//! In-memory storage backend.
//!
//! The reference [`Storage`] implementation, used by the test suite and as
//! a template for real backends.

use dashmap::DashMap;
use uuid::Uuid;

use warden_core::error::{Result, StorageError};
use warden_core::{HolderId, NodeRecord};

use super::Storage;

/// A dashmap-backed storage collaborator.
#[derive(Default)]
pub struct MemoryStorage {
    holders: DashMap<HolderId, Vec<NodeRecord>>,
    tracks: DashMap<String, Vec<String>>,
    names: DashMap<Uuid, String>,
    uuids: DashMap<String, Uuid>,
}

impl MemoryStorage {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a holder's node list directly, creating the record if needed.
    pub fn seed_nodes(&self, id: &HolderId, nodes: Vec<NodeRecord>) {
        self.holders.insert(id.clone(), nodes);
    }

    /// Seed the identity lookup cache.
    pub fn seed_identity(&self, uuid: Uuid, name: &str) {
        let name = name.to_lowercase();
        self.names.insert(uuid, name.clone());
        self.uuids.insert(name, uuid);
    }
}

impl Storage for MemoryStorage {
    fn load_nodes(&self, id: &HolderId) -> Result<Vec<NodeRecord>> {
        self.holders
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StorageError::NotFound(id.to_string()).into())
    }

    fn save_nodes(&self, id: &HolderId, nodes: &[NodeRecord]) -> Result<()> {
        self.holders.insert(id.clone(), nodes.to_vec());
        Ok(())
    }

    fn create_holder(&self, id: &HolderId) -> Result<()> {
        if self.holders.contains_key(id) {
            return Err(StorageError::AlreadyExists(id.to_string()).into());
        }
        self.holders.insert(id.clone(), Vec::new());
        Ok(())
    }

    fn delete_holder(&self, id: &HolderId) -> Result<()> {
        self.holders
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(id.to_string()).into())
    }

    fn load_track(&self, name: &str) -> Result<Vec<String>> {
        self.tracks
            .get(&name.to_lowercase())
            .map(|entry| entry.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_lowercase()).into())
    }

    fn save_track(&self, name: &str, groups: &[String]) -> Result<()> {
        self.tracks.insert(name.to_lowercase(), groups.to_vec());
        Ok(())
    }

    fn delete_track(&self, name: &str) -> Result<()> {
        self.tracks
            .remove(&name.to_lowercase())
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_lowercase()).into())
    }

    fn resolve_name(&self, uuid: Uuid) -> Result<Option<String>> {
        Ok(self.names.get(&uuid).map(|entry| entry.clone()))
    }

    fn resolve_uuid(&self, name: &str) -> Result<Option<Uuid>> {
        Ok(self.uuids.get(&name.to_lowercase()).map(|entry| *entry))
    }
}
