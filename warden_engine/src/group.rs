//! Groups and the group registry.
//!
//! A group is a named permission holder that other holders can reference
//! through `group.<name>` edges. The registry is the shared, case-insensitive
//! keyed container the resolver walks during inheritance.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use warden_core::error::{HolderError, NodeError, Result};
use warden_core::{patterns, HolderId};

use crate::holder::{ChangeListener, PermissionHolder};
use crate::storage::Storage;

/// A named permission holder referencable from other holders' node sets.
pub struct Group {
    name: String,
    holder: PermissionHolder,
}

impl Group {
    fn new(name: String) -> Self {
        let holder = PermissionHolder::new(HolderId::Group(name.clone()));
        Self { name, holder }
    }

    /// The group's lowercase name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying holder, carrying the group's nodes and cache.
    pub fn holder(&self) -> &PermissionHolder {
        &self.holder
    }
}

/// Case-insensitive, name-keyed registry of loaded groups.
pub struct GroupRegistry {
    loaded: DashMap<String, Arc<Group>>,
    listener: RwLock<Option<Weak<dyn ChangeListener>>>,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            loaded: DashMap::new(),
            listener: RwLock::new(None),
        }
    }

    /// Attach the mutation listener applied to every current and future
    /// group holder.
    pub fn set_listener(&self, listener: Weak<dyn ChangeListener>) {
        for entry in self.loaded.iter() {
            entry.value().holder().set_listener(listener.clone());
        }
        *self.listener.write() = Some(listener);
    }

    /// Create a new, empty group. Fails with `AlreadyHas` if a group of
    /// that name (case-insensitive) exists.
    pub fn create(&self, name: &str) -> Result<Arc<Group>> {
        let name = validate_name(name)?;
        match self.loaded.entry(name.clone()) {
            Entry::Occupied(_) => Err(HolderError::AlreadyHas(name).into()),
            Entry::Vacant(vacant) => {
                let group = Arc::new(Group::new(name));
                if let Some(listener) = self.listener.read().clone() {
                    group.holder().set_listener(listener);
                }
                vacant.insert(group.clone());
                Ok(group)
            }
        }
    }

    /// Look up a loaded group.
    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.loaded.get(&name.to_lowercase()).map(|g| g.clone())
    }

    /// Whether a group of that name is loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(&name.to_lowercase())
    }

    /// The names of all loaded groups.
    pub fn names(&self) -> Vec<String> {
        self.loaded.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of all loaded groups.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        self.loaded.iter().map(|e| e.value().clone()).collect()
    }

    /// Remove a group from the registry. Fails with `Lacks` if absent.
    pub fn remove(&self, name: &str) -> Result<Arc<Group>> {
        self.loaded
            .remove(&name.to_lowercase())
            .map(|(_, group)| group)
            .ok_or_else(|| HolderError::Lacks(name.to_lowercase()).into())
    }

    /// Rename a group: create the target, copy the node set, drop the
    /// source. Membership edges held by other holders are not rewritten.
    pub fn rename(&self, from: &str, to: &str) -> Result<Arc<Group>> {
        let source = self
            .get(from)
            .ok_or_else(|| HolderError::Lacks(from.to_lowercase()))?;
        let target = self.create(to)?;
        target.holder().replace_nodes(source.holder().nodes());
        self.remove(from)?;
        debug!(from = %source.name(), to = %target.name(), "group renamed");
        Ok(target)
    }

    /// Load one group's nodes from storage, creating the group if it is not
    /// yet loaded. Malformed records are skipped with a warning.
    pub fn load(&self, storage: &dyn Storage, name: &str) -> Result<Arc<Group>> {
        let id = HolderId::group(name);
        let records = storage.load_nodes(&id)?;

        let group = match self.get(name) {
            Some(group) => group,
            None => self.create(name)?,
        };

        let mut nodes = Vec::with_capacity(records.len());
        for record in &records {
            match record.to_node() {
                Ok(node) => nodes.push(node),
                Err(err) => {
                    warn!(group = %group.name(), %err, "skipping malformed node record")
                }
            }
        }
        group.holder().replace_nodes(nodes);
        Ok(group)
    }

    /// Load several groups from storage.
    pub fn load_many(&self, storage: &dyn Storage, names: &[&str]) -> Result<Vec<Arc<Group>>> {
        names.iter().map(|name| self.load(storage, name)).collect()
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.to_lowercase();
    if name.is_empty() || patterns::INVALID_NAME_CHARS.is_match(&name) {
        return Err(NodeError::InvalidFormat(format!(
            "group name '{}' contains a reserved delimiter",
            name
        ))
        .into());
    }
    Ok(name)
}
