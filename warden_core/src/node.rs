//! Permission nodes.
//!
//! A node is one immutable permission grant or group-inheritance edge,
//! qualified by context (server, world, extra key-values) and time
//! (optional expiry). Nodes are constructed through [`NodeBuilder`], which
//! validates key and context formats before anything touches a holder.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{NodeError, Result};
use crate::patterns;

/// Prefix marking a synthetic group-inheritance key.
pub const GROUP_PREFIX: &str = "group.";

/// Suffix marking a match-all wildcard key.
pub const WILDCARD_SUFFIX: &str = ".*";

/// One permission grant or group-inheritance edge.
///
/// Equality and hashing cover the full
/// (key, value, override, server, world, expiry, extra) tuple; a holder's
/// node set is unique by that identity. Nodes are immutable once built —
/// mutation means replacing the node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    key: String,
    value: bool,
    overriding: bool,
    server: Option<String>,
    world: Option<String>,
    expiry: Option<DateTime<Utc>>,
    extra: BTreeMap<String, String>,
}

impl Node {
    /// Start building a node for the given permission key.
    pub fn builder(key: &str) -> NodeBuilder {
        NodeBuilder::new(key)
    }

    /// Build a plain permanent permission node.
    pub fn permission(key: &str, value: bool) -> Result<Node> {
        NodeBuilder::new(key).value(value).build()
    }

    /// Build a permanent membership edge for the given group.
    pub fn group_membership(group: &str) -> Result<Node> {
        NodeBuilder::new(&format!("{}{}", GROUP_PREFIX, group)).build()
    }

    /// The permission key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The grant value: `true` grants, `false` negates.
    pub fn value(&self) -> bool {
        self.value
    }

    /// Whether this node carries the explicit override flag.
    pub fn is_override(&self) -> bool {
        self.overriding
    }

    /// The server this node is scoped to, if any.
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// The world this node is scoped to, if any.
    pub fn world(&self) -> Option<&str> {
        self.world.as_deref()
    }

    /// The absolute expiry timestamp, if this node is temporary.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// The auxiliary context constraints attached to this node.
    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    /// Whether this node is a group-inheritance edge.
    pub fn is_group_node(&self) -> bool {
        patterns::GROUP_MATCH.is_match(&self.key)
    }

    /// The group this edge points at, if it is a group node.
    pub fn group_name(&self) -> Option<&str> {
        if self.is_group_node() {
            Some(&self.key[GROUP_PREFIX.len()..])
        } else {
            None
        }
    }

    /// Whether this node is scoped to a server.
    pub fn is_server_specific(&self) -> bool {
        self.server.is_some()
    }

    /// Whether this node is scoped to a world.
    pub fn is_world_specific(&self) -> bool {
        self.world.is_some()
    }

    /// Whether this node has an expiry.
    pub fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    /// Whether this node's expiry has passed. Permanent nodes never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }

    /// Seconds until this node expires. Negative once expired, `None` for
    /// permanent nodes.
    pub fn seconds_til_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiry.map(|expiry| (expiry - now).num_seconds())
    }

    /// Whether this node denotes a whole subtree of permissions, either by
    /// trailing `.*` or by containing a shorthand range segment.
    pub fn is_wildcard(&self) -> bool {
        self.is_star_wildcard() || self.is_shorthand()
    }

    /// Whether this node is a match-all wildcard (trailing `.*`).
    pub fn is_star_wildcard(&self) -> bool {
        self.key.ends_with(WILDCARD_SUFFIX)
    }

    /// Whether this node's key contains a shorthand range segment.
    pub fn is_shorthand(&self) -> bool {
        patterns::SHORTHAND.is_match(&self.key)
    }

    /// Wildcard specificity: the number of dot-separated key segments.
    /// More segments mean a more specific wildcard.
    pub fn wildcard_level(&self) -> usize {
        self.key.split('.').count()
    }

    /// The literal prefix a `.*` wildcard covers, including the trailing
    /// dot. `None` for non-wildcard keys.
    pub fn wildcard_prefix(&self) -> Option<&str> {
        if self.is_star_wildcard() {
            Some(&self.key[..self.key.len() - 1])
        } else {
            None
        }
    }

    /// The literal keys this node stands for once shorthand ranges are
    /// expanded. Non-shorthand keys expand to themselves. Expansion never
    /// mutates storage; it only feeds the resolved map.
    pub fn expanded_keys(&self) -> Vec<String> {
        expand_shorthand(&self.key)
    }

    /// Whether this node applies in the given query context.
    ///
    /// A node matches if its own server/world are absent or exactly equal,
    /// and every one of its extra entries is present and equal in the query
    /// context. Absent always matches.
    pub fn matches_context(&self, ctx: &Context) -> bool {
        if let Some(server) = &self.server {
            if ctx.server.as_deref() != Some(server.as_str()) {
                return false;
            }
        }
        if let Some(world) = &self.world {
            if ctx.world.as_deref() != Some(world.as_str()) {
                return false;
            }
        }
        self.extra
            .iter()
            .all(|(k, v)| ctx.extra_value(k) == Some(v.as_str()))
    }

    /// Whether two nodes target the same grant, ignoring value, expiry and
    /// the override flag. This is the identity `unset` matches on, so an
    /// expired temporary node stays explicitly removable.
    pub fn almost_equals(&self, other: &Node) -> bool {
        self.key == other.key
            && self.server == other.server
            && self.world == other.world
            && self.extra == other.extra
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)?;
        if let Some(server) = &self.server {
            write!(f, " server={}", server)?;
        }
        if let Some(world) = &self.world {
            write!(f, " world={}", world)?;
        }
        if let Some(expiry) = &self.expiry {
            write!(f, " expiry={}", expiry.timestamp())?;
        }
        Ok(())
    }
}

/// Expand every shorthand range segment in a key into the cross-product of
/// literal keys. Keys without shorthand expand to themselves.
pub fn expand_shorthand(key: &str) -> Vec<String> {
    let (whole, alternatives) = match patterns::SHORTHAND
        .captures(key)
        .and_then(|c| c.get(0).zip(c.get(1)))
    {
        Some((whole, alternatives)) => (whole.range(), alternatives.as_str()),
        None => return vec![key.to_string()],
    };

    let mut out = Vec::new();
    for alternative in alternatives.split('|') {
        let candidate = format!(
            "{}{}{}",
            &key[..whole.start],
            alternative,
            &key[whole.end..]
        );
        // A key may contain more than one range segment.
        out.extend(expand_shorthand(&candidate));
    }
    out
}

/// Builder for [`Node`], validating key and context formats.
#[derive(Clone, Debug)]
pub struct NodeBuilder {
    key: String,
    value: bool,
    overriding: bool,
    server: Option<String>,
    world: Option<String>,
    expiry: Option<DateTime<Utc>>,
    extra: BTreeMap<String, String>,
}

impl NodeBuilder {
    /// Start a builder for the given key. The key is lowercased; validation
    /// happens in [`NodeBuilder::build`].
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_lowercase(),
            value: true,
            overriding: false,
            server: None,
            world: None,
            expiry: None,
            extra: BTreeMap::new(),
        }
    }

    /// Set the grant value.
    pub fn value(mut self, value: bool) -> Self {
        self.value = value;
        self
    }

    /// Set the explicit override flag.
    pub fn overriding(mut self, overriding: bool) -> Self {
        self.overriding = overriding;
        self
    }

    /// Scope the node to a server.
    pub fn server(mut self, server: &str) -> Self {
        self.server = Some(server.to_lowercase());
        self
    }

    /// Scope the node to a world. Requires a server scope.
    pub fn world(mut self, world: &str) -> Self {
        self.world = Some(world.to_lowercase());
        self
    }

    /// Give the node an absolute expiry timestamp.
    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Attach an auxiliary context constraint.
    pub fn extra(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_lowercase(), value.to_lowercase());
        self
    }

    /// Validate and build the node.
    pub fn build(self) -> Result<Node> {
        if self.key.is_empty() {
            return Err(NodeError::InvalidFormat("permission key is empty".into()).into());
        }
        if patterns::INVALID_KEY_CHARS.is_match(&self.key) {
            return Err(NodeError::InvalidFormat(format!(
                "permission key '{}' contains a disallowed separator",
                self.key
            ))
            .into());
        }
        if patterns::GROUP_MATCH.is_match(&self.key) {
            let group = &self.key[GROUP_PREFIX.len()..];
            if patterns::INVALID_NAME_CHARS.is_match(group) {
                return Err(NodeError::InvalidFormat(format!(
                    "group name '{}' contains a reserved delimiter",
                    group
                ))
                .into());
            }
        }
        if let Some(server) = &self.server {
            if server.is_empty() || patterns::INVALID_NAME_CHARS.is_match(server) {
                return Err(NodeError::InvalidFormat(format!(
                    "server '{}' contains a reserved delimiter",
                    server
                ))
                .into());
            }
        }
        if let Some(world) = &self.world {
            if self.server.is_none() {
                return Err(
                    NodeError::InvalidFormat("world context requires a server".into()).into(),
                );
            }
            if world.is_empty() || patterns::INVALID_NAME_CHARS.is_match(world) {
                return Err(NodeError::InvalidFormat(format!(
                    "world '{}' contains a reserved delimiter",
                    world
                ))
                .into());
            }
        }

        Ok(Node {
            key: self.key,
            value: self.value,
            overriding: self.overriding,
            server: self.server,
            world: self.world,
            expiry: self.expiry,
            extra: self.extra,
        })
    }
}
