//! Holder identifiers.
//!
//! Users are keyed by UUID, groups by a case-insensitive name. Group names
//! are normalized to lowercase on construction so that registry lookups and
//! equality never have to think about casing.

use std::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a permission holder.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolderId {
    /// A user, keyed by UUID.
    User(Uuid),

    /// A group, keyed by its lowercase name.
    Group(String),
}

impl HolderId {
    /// Create a group identifier, normalizing the name to lowercase.
    pub fn group(name: &str) -> Self {
        HolderId::Group(name.to_lowercase())
    }

    /// Create a user identifier.
    pub fn user(uuid: Uuid) -> Self {
        HolderId::User(uuid)
    }

    /// Whether this identifies a group.
    pub fn is_group(&self) -> bool {
        matches!(self, HolderId::Group(_))
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderId::User(uuid) => write!(f, "user:{}", uuid),
            HolderId::Group(name) => write!(f, "group:{}", name),
        }
    }
}
