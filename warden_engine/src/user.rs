//! User holders.

use parking_lot::RwLock;
use uuid::Uuid;

use warden_core::HolderId;

use crate::holder::PermissionHolder;

/// A user: a UUID-keyed permission holder with an optional last-seen name
/// and a primary group.
pub struct User {
    uuid: Uuid,
    name: RwLock<Option<String>>,
    holder: PermissionHolder,
}

impl User {
    /// Create a user holder.
    pub fn new(uuid: Uuid, name: Option<String>) -> Self {
        Self {
            uuid,
            name: RwLock::new(name.map(|n| n.to_lowercase())),
            holder: PermissionHolder::new(HolderId::User(uuid)),
        }
    }

    /// The user's UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The user's last-seen name, if known.
    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    /// Update the last-seen name.
    pub fn set_name(&self, name: &str) {
        *self.name.write() = Some(name.to_lowercase());
    }

    /// The underlying holder, carrying the user's nodes and cache.
    pub fn holder(&self) -> &PermissionHolder {
        &self.holder
    }

    /// The user's primary group, used when no explicit context
    /// disambiguates rank.
    pub fn primary_group(&self) -> Option<String> {
        self.holder.primary_group()
    }
}
