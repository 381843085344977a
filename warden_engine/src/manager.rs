//! The user manager.
//!
//! A concurrent UUID-keyed registry of loaded users with a load/unload
//! lifecycle. Loading is effectively-once per key: two racing `get_or_load`
//! calls for the same UUID produce one holder. Whether a user may be
//! unloaded is decided by an injected [`PlatformAdapter`], not by the
//! engine.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_core::error::Result;
use warden_core::{HolderId, Node, NodeRecord};

use crate::config::EngineConfig;
use crate::holder::ChangeListener;
use crate::storage::Storage;
use crate::user::User;

/// Host-supplied capabilities the engine cannot know itself.
pub trait PlatformAdapter: Send + Sync {
    /// Whether the subject is still needed in memory (e.g. still
    /// connected). Holders for subjects that are still needed are never
    /// unloaded.
    fn is_online(&self, uuid: Uuid) -> bool;

    /// Look up a display name for the subject, if the host knows one.
    fn lookup_name(&self, uuid: Uuid) -> Option<String>;
}

/// UUID-keyed registry of loaded users.
pub struct UserManager {
    storage: Arc<dyn Storage>,
    adapter: Arc<dyn PlatformAdapter>,
    config: EngineConfig,
    loaded: DashMap<Uuid, Arc<User>>,
    listener: RwLock<Option<Weak<dyn ChangeListener>>>,
}

impl UserManager {
    /// Create a manager over the given collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        adapter: Arc<dyn PlatformAdapter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            adapter,
            config,
            loaded: DashMap::new(),
            listener: RwLock::new(None),
        }
    }

    /// Attach the mutation listener applied to every current and future
    /// user holder.
    pub fn set_listener(&self, listener: Weak<dyn ChangeListener>) {
        for entry in self.loaded.iter() {
            entry.value().holder().set_listener(listener.clone());
        }
        *self.listener.write() = Some(listener);
    }

    /// Cheap presence check, used by concurrent callers to avoid duplicate
    /// load attempts.
    pub fn is_loaded(&self, uuid: Uuid) -> bool {
        self.loaded.contains_key(&uuid)
    }

    /// Look up a loaded user.
    pub fn get(&self, uuid: Uuid) -> Option<Arc<User>> {
        self.loaded.get(&uuid).map(|u| u.clone())
    }

    /// Look up a loaded user by last-seen name (case-insensitive).
    pub fn get_by_name(&self, name: &str) -> Option<Arc<User>> {
        let name = name.to_lowercase();
        self.loaded
            .iter()
            .find(|entry| entry.value().name().as_deref() == Some(name.as_str()))
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of all loaded users.
    pub fn loaded_users(&self) -> Vec<Arc<User>> {
        self.loaded.iter().map(|e| e.value().clone()).collect()
    }

    /// Fetch a user, loading from storage if absent. A missing backing
    /// record is created; any other storage failure is surfaced. Under a
    /// race, exactly one load happens per UUID.
    pub fn get_or_load(&self, uuid: Uuid) -> Result<Arc<User>> {
        if let Some(user) = self.get(uuid) {
            return Ok(user);
        }

        match self.loaded.entry(uuid) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(vacant) => {
                let user = self.load(uuid)?;
                vacant.insert(user.clone());
                Ok(user)
            }
        }
    }

    /// Unload a user, unless the platform adapter says the subject is
    /// still needed. Returns whether the holder was removed. Persisted
    /// state survives in storage either way.
    pub fn unload(&self, uuid: Uuid) -> bool {
        if self.adapter.is_online(uuid) {
            return false;
        }
        let removed = self.loaded.remove(&uuid).is_some();
        if removed {
            debug!(%uuid, "user unloaded");
        }
        removed
    }

    /// Persist a user's current node set.
    pub fn save(&self, user: &User) -> Result<()> {
        let records: Vec<NodeRecord> = user
            .holder()
            .nodes()
            .iter()
            .map(NodeRecord::from_node)
            .collect();
        self.storage
            .save_nodes(&HolderId::User(user.uuid()), &records)
    }

    /// Assign the configured default group to a user with no membership at
    /// all. Idempotent: safe to call on every load. Returns whether the
    /// user changed.
    pub fn give_default_if_needed(&self, user: &User) -> Result<bool> {
        if user.holder().has_group_edge(chrono::Utc::now()) {
            return Ok(false);
        }

        let default = self.config.default_group.clone();
        user.holder().set_primary_group(&default);
        let membership = Node::group_membership(&default)?;
        if !user.holder().has_exact(&membership) {
            user.holder().set(membership)?;
        }
        info!(uuid = %user.uuid(), group = %default, "user assigned to default group");
        Ok(true)
    }

    /// Whether a user carries anything beyond the plain default
    /// membership. Users that don't need not be persisted.
    pub fn should_save(&self, user: &User) -> bool {
        let nodes = user.holder().nodes();
        if nodes.len() != 1 {
            return true;
        }

        let only = &nodes[0];
        if !only.is_group_node()
            || only.is_temporary()
            || only.is_server_specific()
            || only.is_world_specific()
        {
            return true;
        }
        if only.group_name() != Some(self.config.default_group.as_str()) {
            return true;
        }

        user.primary_group().as_deref() != Some(self.config.default_group.as_str())
    }

    fn load(&self, uuid: Uuid) -> Result<Arc<User>> {
        let id = HolderId::User(uuid);
        let records = match self.storage.load_nodes(&id) {
            Ok(records) => records,
            Err(err) if err.is_not_found() => {
                self.storage.create_holder(&id)?;
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let name = match self.adapter.lookup_name(uuid) {
            Some(name) => Some(name),
            None => self.storage.resolve_name(uuid)?,
        };

        let user = Arc::new(User::new(uuid, name));
        if let Some(listener) = self.listener.read().clone() {
            user.holder().set_listener(listener);
        }

        let mut nodes = Vec::with_capacity(records.len());
        for record in &records {
            match record.to_node() {
                Ok(node) => nodes.push(node),
                Err(err) => warn!(%uuid, %err, "skipping malformed node record"),
            }
        }
        user.holder().replace_nodes(nodes);

        if self.give_default_if_needed(&user)? && self.should_save(&user) {
            self.save(&user)?;
        }

        debug!(%uuid, nodes = user.holder().nodes().len(), "user loaded");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use dashmap::DashSet;

    /// Adapter for tests: a settable online set, no name lookups.
    pub(crate) struct TestAdapter {
        pub online: DashSet<Uuid>,
    }

    impl TestAdapter {
        pub fn new() -> Self {
            Self {
                online: DashSet::new(),
            }
        }
    }

    impl PlatformAdapter for TestAdapter {
        fn is_online(&self, uuid: Uuid) -> bool {
            self.online.contains(&uuid)
        }

        fn lookup_name(&self, _uuid: Uuid) -> Option<String> {
            None
        }
    }

    fn manager() -> (Arc<MemoryStorage>, Arc<TestAdapter>, UserManager) {
        let storage = Arc::new(MemoryStorage::new());
        let adapter = Arc::new(TestAdapter::new());
        let manager = UserManager::new(
            storage.clone(),
            adapter.clone(),
            EngineConfig::default(),
        );
        (storage, adapter, manager)
    }

    #[test]
    fn test_load_creates_missing_record_and_defaults() {
        let (storage, _, manager) = manager();
        let uuid = Uuid::new_v4();

        let user = manager.get_or_load(uuid).unwrap();
        assert!(manager.is_loaded(uuid));

        // Fresh user: exactly one node, the default membership.
        let nodes = user.holder().nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].key(), "group.default");
        assert!(nodes[0].value());
        assert_eq!(user.primary_group().as_deref(), Some("default"));

        // The backing record now exists.
        assert!(storage.load_nodes(&HolderId::User(uuid)).is_ok());
    }

    #[test]
    fn test_get_or_load_returns_same_holder() {
        let (_, _, manager) = manager();
        let uuid = Uuid::new_v4();
        let a = manager.get_or_load(uuid).unwrap();
        let b = manager.get_or_load(uuid).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unload_respects_adapter() {
        let (_, adapter, manager) = manager();
        let uuid = Uuid::new_v4();
        manager.get_or_load(uuid).unwrap();

        adapter.online.insert(uuid);
        assert!(!manager.unload(uuid));
        assert!(manager.is_loaded(uuid));

        adapter.online.remove(&uuid);
        assert!(manager.unload(uuid));
        assert!(!manager.is_loaded(uuid));
    }

    #[test]
    fn test_state_survives_unload() {
        let (_, _, manager) = manager();
        let uuid = Uuid::new_v4();
        let user = manager.get_or_load(uuid).unwrap();
        user.holder().set_permission("chat.say", true).unwrap();
        manager.save(&user).unwrap();
        assert!(manager.unload(uuid));

        let reloaded = manager.get_or_load(uuid).unwrap();
        let keys: Vec<String> = reloaded
            .holder()
            .nodes()
            .iter()
            .map(|n| n.key().to_string())
            .collect();
        assert!(keys.contains(&"chat.say".to_string()));
    }

    #[test]
    fn test_give_default_is_idempotent() {
        let (_, _, manager) = manager();
        let user = manager.get_or_load(Uuid::new_v4()).unwrap();
        assert!(!manager.give_default_if_needed(&user).unwrap());
        assert_eq!(user.holder().nodes().len(), 1);
    }

    #[test]
    fn test_should_save() {
        let (_, _, manager) = manager();
        let user = manager.get_or_load(Uuid::new_v4()).unwrap();
        // Plain default membership only: nothing worth saving.
        assert!(!manager.should_save(&user));

        user.holder().set_permission("chat.say", true).unwrap();
        assert!(manager.should_save(&user));
    }

    #[test]
    fn test_get_by_name() {
        let (storage, _, manager) = manager();
        let uuid = Uuid::new_v4();
        storage.seed_identity(uuid, "Notch");

        manager.get_or_load(uuid).unwrap();
        assert!(manager.get_by_name("NOTCH").is_some());
        assert!(manager.get_by_name("nobody").is_none());
    }

    #[test]
    fn test_concurrent_loads_are_effectively_once() {
        let (_, _, manager) = manager();
        let manager = Arc::new(manager);
        let uuid = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || manager.get_or_load(uuid).unwrap())
            })
            .collect();
        let users: Vec<Arc<User>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for user in &users[1..] {
            assert!(Arc::ptr_eq(&users[0], user));
        }
    }
}
