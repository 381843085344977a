//! Query contexts.
//!
//! A context is the (server, world, extra key-values) tuple that a
//! resolution query or a node is scoped to. Contexts are also used as cache
//! keys for resolved permission maps, so they are hashable and cheap to
//! clone.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// The context a permission query is evaluated in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    /// The server the query applies to, if any.
    pub server: Option<String>,

    /// The world the query applies to, if any. Only meaningful alongside a
    /// server.
    pub world: Option<String>,

    /// Auxiliary key-value constraints supplied by the host.
    pub extra: BTreeMap<String, String>,
}

impl Context {
    /// The global context: applies on every server and world.
    pub fn global() -> Self {
        Self::default()
    }

    /// A context scoped to one server.
    pub fn server(server: &str) -> Self {
        Self {
            server: Some(server.to_lowercase()),
            ..Self::default()
        }
    }

    /// A context scoped to one world of one server.
    pub fn server_world(server: &str, world: &str) -> Self {
        Self {
            server: Some(server.to_lowercase()),
            world: Some(world.to_lowercase()),
            extra: BTreeMap::new(),
        }
    }

    /// Add an auxiliary key-value pair to this context.
    pub fn with_extra(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_lowercase(), value.to_lowercase());
        self
    }

    /// Look up an auxiliary value.
    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(|v| v.as_str())
    }
}
