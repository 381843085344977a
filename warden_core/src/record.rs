//! The raw persisted form of a node.
//!
//! A [`NodeRecord`] is the unit a storage collaborator loads and saves per
//! node, independent of storage technology. The `"global"` sentinel stands
//! for an absent server/world and `expiry == 0` for a permanent node, so
//! that every field is always present in serialized form.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::node::Node;

/// Sentinel meaning "applies on all servers/worlds".
pub const GLOBAL: &str = "global";

/// The structured record persisted per node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The permission key.
    pub permission: String,

    /// The grant value.
    pub value: bool,

    /// Server context, or [`GLOBAL`].
    pub server: String,

    /// World context, or [`GLOBAL`].
    pub world: String,

    /// Expiry as epoch seconds, 0 meaning permanent.
    pub expiry: i64,

    /// Auxiliary context constraints, possibly empty.
    pub contexts: BTreeMap<String, String>,

    /// The explicit override flag. Optional in serialized form so records
    /// written before the flag existed still parse.
    #[serde(rename = "override", default, skip_serializing_if = "is_false")]
    pub overriding: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl NodeRecord {
    /// Capture a node into its persisted form.
    pub fn from_node(node: &Node) -> Self {
        Self {
            permission: node.key().to_string(),
            value: node.value(),
            server: node.server().unwrap_or(GLOBAL).to_string(),
            world: node.world().unwrap_or(GLOBAL).to_string(),
            expiry: node.expiry().map(|e| e.timestamp()).unwrap_or(0),
            contexts: node.extra().clone(),
            overriding: node.is_override(),
        }
    }

    /// Rebuild the node, re-validating the key and context formats.
    pub fn to_node(&self) -> Result<Node> {
        let mut builder = Node::builder(&self.permission)
            .value(self.value)
            .overriding(self.overriding);

        if self.server != GLOBAL {
            builder = builder.server(&self.server);
        }
        if self.world != GLOBAL {
            builder = builder.world(&self.world);
        }
        if self.expiry != 0 {
            let expiry = Utc
                .timestamp_opt(self.expiry, 0)
                .single()
                .ok_or_else(|| {
                    NodeError::InvalidFormat(format!("invalid expiry timestamp {}", self.expiry))
                })?;
            builder = builder.expiry(expiry);
        }
        for (key, value) in &self.contexts {
            builder = builder.extra(key, value);
        }

        builder.build()
    }
}
