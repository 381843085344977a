//! Permission holders.
//!
//! A [`PermissionHolder`] owns a subject's raw node collection and the
//! per-context cache of resolved permission maps. Nodes are mutated only
//! through the holder's own set/unset API: every mutation is validated
//! first, applied under the holder's write lock, and followed by a cache
//! invalidation that happens-before any resolution observing the new nodes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use warden_core::error::{HolderError, Result};
use warden_core::{Context, HolderId, Node};

/// Receiver for "this holder mutated" signals.
///
/// The update coordinator implements this to invalidate dependent holders.
/// Implementations are called after the mutating holder's lock is released
/// and must only touch other holders' caches, never re-enter the mutating
/// holder's node set.
pub trait ChangeListener: Send + Sync {
    /// Called after a successful mutation of the identified holder.
    fn holder_changed(&self, id: &HolderId);
}

struct HolderState {
    nodes: Vec<Node>,
    primary_group: Option<String>,
}

/// A subject (user or group) owning a set of permission nodes.
pub struct PermissionHolder {
    id: HolderId,
    state: RwLock<HolderState>,
    cache: DashMap<Context, Arc<HashMap<String, bool>>>,
    generation: AtomicU64,
    listener: RwLock<Option<Weak<dyn ChangeListener>>>,
}

impl PermissionHolder {
    /// Create an empty holder for the given identity.
    pub fn new(id: HolderId) -> Self {
        Self {
            id,
            state: RwLock::new(HolderState {
                nodes: Vec::new(),
                primary_group: None,
            }),
            cache: DashMap::new(),
            generation: AtomicU64::new(0),
            listener: RwLock::new(None),
        }
    }

    /// This holder's identity.
    pub fn id(&self) -> &HolderId {
        &self.id
    }

    /// Attach the mutation listener. Replaces any previous listener.
    pub fn set_listener(&self, listener: Weak<dyn ChangeListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Snapshot of the raw node set.
    pub fn nodes(&self) -> Vec<Node> {
        self.state.read().nodes.clone()
    }

    /// The primary group name, for user holders.
    pub fn primary_group(&self) -> Option<String> {
        self.state.read().primary_group.clone()
    }

    /// Set the primary group name.
    pub fn set_primary_group(&self, group: &str) {
        self.state.write().primary_group = Some(group.to_lowercase());
    }

    /// Whether the exact node (full identity) is present.
    pub fn has_exact(&self, node: &Node) -> bool {
        self.state.read().nodes.contains(node)
    }

    /// Unexpired membership edges as of `now`. Negated group nodes
    /// suppress inheritance rather than grant it, so they are not edges.
    pub fn group_edges(&self, now: DateTime<Utc>) -> Vec<Node> {
        self.state
            .read()
            .nodes
            .iter()
            .filter(|n| n.is_group_node() && n.value() && !n.is_expired(now))
            .cloned()
            .collect()
    }

    /// Whether the holder has any unexpired membership edge.
    pub fn has_group_edge(&self, now: DateTime<Utc>) -> bool {
        self.state
            .read()
            .nodes
            .iter()
            .any(|n| n.is_group_node() && n.value() && !n.is_expired(now))
    }

    /// Set a node. Fails with `AlreadyHas` if the exact node is already
    /// present; no state changes on failure.
    pub fn set(&self, node: Node) -> Result<()> {
        {
            let mut state = self.state.write();
            if state.nodes.contains(&node) {
                return Err(HolderError::AlreadyHas(node.to_string()).into());
            }
            state.nodes.push(node);
            self.invalidate_locked();
        }
        self.notify();
        Ok(())
    }

    /// Unset the node matching `node` on key, server, world and extra
    /// context — value, expiry and the override flag are ignored, so an
    /// expired temporary stays removable. Returns the removed node, or
    /// `Lacks` if nothing matched.
    pub fn unset(&self, node: &Node) -> Result<Node> {
        let removed = {
            let mut state = self.state.write();
            let index = state
                .nodes
                .iter()
                .position(|n| n.almost_equals(node))
                .ok_or_else(|| HolderError::Lacks(node.to_string()))?;
            let removed = state.nodes.remove(index);
            self.invalidate_locked();
            removed
        };
        self.notify();
        Ok(removed)
    }

    /// Set a plain permanent permission.
    pub fn set_permission(&self, key: &str, value: bool) -> Result<()> {
        self.set(Node::permission(key, value)?)
    }

    /// Set a temporary permission with an absolute expiry.
    pub fn set_temp_permission(
        &self,
        key: &str,
        value: bool,
        expiry: DateTime<Utc>,
    ) -> Result<()> {
        self.set(Node::builder(key).value(value).expiry(expiry).build()?)
    }

    /// Unset a plain permission by key.
    pub fn unset_permission(&self, key: &str) -> Result<Node> {
        self.unset(&Node::permission(key, true)?)
    }

    /// Add a permanent membership edge for the given group.
    pub fn add_group(&self, group: &str) -> Result<()> {
        self.set(Node::group_membership(group)?)
    }

    /// Remove the membership edge for the given group.
    pub fn remove_group(&self, group: &str) -> Result<Node> {
        self.unset(&Node::group_membership(group)?)
    }

    /// Remove every node whose expiry has passed, returning the removed
    /// nodes. Invalidates only when something was removed.
    pub fn audit_temporary(&self, now: DateTime<Utc>) -> Vec<Node> {
        let removed = {
            let mut state = self.state.write();
            let (expired, live): (Vec<Node>, Vec<Node>) = state
                .nodes
                .drain(..)
                .partition(|n| n.is_expired(now));
            state.nodes = live;
            if expired.is_empty() {
                return expired;
            }
            self.invalidate_locked();
            expired
        };
        debug!(holder = %self.id, count = removed.len(), "expired temporary nodes removed");
        self.notify();
        removed
    }

    /// Wholesale-replace the node set, e.g. after a refresh from storage.
    /// Bypasses per-node duplicate checks.
    pub fn replace_nodes(&self, nodes: Vec<Node>) {
        {
            let mut state = self.state.write();
            state.nodes = nodes;
            self.invalidate_locked();
        }
        self.notify();
    }

    /// Drop every cached context map. Used by the update coordinator; only
    /// touches the cache, so it never contends with the node-set lock.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::Release);
        self.cache.clear();
    }

    /// The current cache generation. Bumped on every invalidation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Look up a cached map for the given context.
    pub fn cached(&self, ctx: &Context) -> Option<Arc<HashMap<String, bool>>> {
        self.cache.get(ctx).map(|entry| entry.clone())
    }

    /// Cache a resolved map, unless an invalidation happened since
    /// `generation` was read. A stale map is simply not cached; the next
    /// query recomputes.
    pub fn store_cached(
        &self,
        ctx: Context,
        map: Arc<HashMap<String, bool>>,
        generation: u64,
    ) {
        if self.generation.load(Ordering::Acquire) == generation {
            self.cache.insert(ctx, map);
        }
    }

    // Must be called with the state write lock held, so that the
    // invalidation is visible before the new nodes are.
    fn invalidate_locked(&self) {
        self.generation.fetch_add(1, Ordering::Release);
        self.cache.clear();
    }

    fn notify(&self) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
            listener.holder_changed(&self.id);
        }
    }
}
