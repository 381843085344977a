//! The resolution algorithm.
//!
//! Resolution turns a holder's raw node set — combined with everything it
//! transitively inherits through group edges — into an effective map from
//! permission key to boolean for one query context.
//!
//! The algorithm runs in two passes:
//!
//! 1. **Literal pass**: candidates are grouped by literal key (shorthand
//!    ranges expanded) and each group is folded to a winner. Direct nodes
//!    always outrank inherited ones; within the same source the priority
//!    ordering from `warden_core::compare` decides, with full ties going to
//!    the later candidate in the stable collection order.
//! 2. **Wildcard pass**: `.*` nodes fill every known literal key sharing
//!    their prefix, most specific wildcard first, but only keys the literal
//!    pass left undecided. An explicit literal entry therefore always
//!    stands against a wildcard, and overlapping wildcards — which always
//!    differ in segment count — are ordered by specificity.
//!
//! Group cycles fail closed: a revisited group contributes nothing on
//! re-entry, so resolution always terminates and never double counts.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tracing::trace;

use warden_core::{compare_at, Context, HolderId, Node};

use crate::group::GroupRegistry;
use crate::holder::PermissionHolder;

/// The universe of literal permission keys wildcards may expand into,
/// typically registered by the host platform. Expansion also always covers
/// the literal keys present in the candidate set itself.
pub struct KnownPermissions {
    known: DashSet<String>,
}

impl KnownPermissions {
    /// Create an empty universe.
    pub fn new() -> Self {
        Self {
            known: DashSet::new(),
        }
    }

    /// Register a literal permission key.
    pub fn register(&self, key: &str) {
        self.known.insert(key.to_lowercase());
    }

    /// All registered keys.
    pub fn all(&self) -> Vec<String> {
        self.known.iter().map(|k| k.clone()).collect()
    }
}

impl Default for KnownPermissions {
    fn default() -> Self {
        Self::new()
    }
}

struct Candidate {
    node: Node,
    direct: bool,
}

/// Resolves effective permission maps against a group registry.
pub struct PermissionResolver {
    groups: Arc<GroupRegistry>,
    known: Arc<KnownPermissions>,
}

impl PermissionResolver {
    /// Create a resolver with an empty known-permission universe.
    pub fn new(groups: Arc<GroupRegistry>) -> Self {
        Self::with_known(groups, Arc::new(KnownPermissions::new()))
    }

    /// Create a resolver with a host-supplied known-permission universe.
    pub fn with_known(groups: Arc<GroupRegistry>, known: Arc<KnownPermissions>) -> Self {
        Self { groups, known }
    }

    /// The group registry this resolver walks.
    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    /// The known-permission universe.
    pub fn known(&self) -> &Arc<KnownPermissions> {
        &self.known
    }

    /// Resolve the effective permission map for one holder and context,
    /// returning the cached map when one is current.
    pub fn resolve(
        &self,
        holder: &PermissionHolder,
        ctx: &Context,
    ) -> Arc<HashMap<String, bool>> {
        self.resolve_at(holder, ctx, Utc::now())
    }

    /// Resolve at an explicit point in time. Expiry checks and the
    /// temporary-node ordering both use `now`.
    pub fn resolve_at(
        &self,
        holder: &PermissionHolder,
        ctx: &Context,
        now: DateTime<Utc>,
    ) -> Arc<HashMap<String, bool>> {
        if let Some(hit) = holder.cached(ctx) {
            return hit;
        }

        let generation = holder.generation();

        let mut candidates = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(holder.id().clone());
        self.collect(holder, ctx, now, true, &mut visited, &mut candidates);

        let map = Arc::new(self.select_winners(&candidates, now));
        trace!(holder = %holder.id(), entries = map.len(), "resolved permission map");

        holder.store_cached(ctx.clone(), map.clone(), generation);
        map
    }

    /// Collect the applicable candidate nodes: the holder's own unexpired,
    /// context-matching nodes first, then — in group-edge order — the
    /// candidates of every inherited group.
    fn collect(
        &self,
        holder: &PermissionHolder,
        ctx: &Context,
        now: DateTime<Utc>,
        direct: bool,
        visited: &mut HashSet<HolderId>,
        out: &mut Vec<Candidate>,
    ) {
        let nodes: Vec<Node> = holder
            .nodes()
            .into_iter()
            .filter(|n| !n.is_expired(now) && n.matches_context(ctx))
            .collect();

        for node in &nodes {
            out.push(Candidate {
                node: node.clone(),
                direct,
            });
        }

        for node in &nodes {
            let group = match node.group_name() {
                Some(group) if node.value() => group,
                _ => continue,
            };
            let id = HolderId::group(group);
            if !visited.insert(id) {
                // Cycle: the revisited group contributes nothing.
                continue;
            }
            if let Some(group) = self.groups.get(group) {
                self.collect(group.holder(), ctx, now, false, visited, out);
            }
        }
    }

    fn select_winners(&self, candidates: &[Candidate], now: DateTime<Utc>) -> HashMap<String, bool> {
        // Literal pass: fold each key group to a winner.
        let mut best: HashMap<String, &Candidate> = HashMap::new();
        for candidate in candidates {
            for key in candidate.node.expanded_keys() {
                let challenger_wins = match best.get(&key) {
                    Some(incumbent) => outranks(candidate, *incumbent, now),
                    None => true,
                };
                if challenger_wins {
                    best.insert(key, candidate);
                }
            }
        }

        let mut map: HashMap<String, bool> = best
            .iter()
            .map(|(key, candidate)| (key.clone(), candidate.node.value()))
            .collect();

        // Wildcard pass: fill undecided keys, most specific wildcard first.
        // Overlapping wildcards always differ in segment count, so this
        // order is total; the key tiebreak only keeps it deterministic.
        let mut wildcards: Vec<(&str, &Candidate)> = best
            .iter()
            .filter(|(_, c)| c.node.is_star_wildcard())
            .map(|(key, c)| (key.as_str(), *c))
            .collect();
        wildcards.sort_by(|(ka, a), (kb, b)| {
            b.node
                .wildcard_level()
                .cmp(&a.node.wildcard_level())
                .then_with(|| ka.cmp(kb))
        });

        if !wildcards.is_empty() {
            let mut universe: Vec<String> = map.keys().cloned().collect();
            universe.extend(self.known.all());

            for (key, candidate) in wildcards {
                let prefix = match candidate.node.wildcard_prefix() {
                    Some(prefix) => prefix,
                    None => continue,
                };
                for literal in &universe {
                    if literal != key && literal.starts_with(prefix) {
                        map.entry(literal.clone())
                            .or_insert(candidate.node.value());
                    }
                }
            }
        }

        map
    }
}

/// Whether `challenger` beats the current `incumbent` for one key.
///
/// Direct nodes outrank inherited ones; otherwise the priority ordering
/// decides, with the fixed full-tie result meaning the later-iterated
/// candidate wins.
fn outranks(challenger: &Candidate, incumbent: &Candidate, now: DateTime<Utc>) -> bool {
    if challenger.direct != incumbent.direct {
        return challenger.direct;
    }
    compare_at(&challenger.node, &incumbent.node, now) != Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup() -> (Arc<GroupRegistry>, PermissionResolver) {
        let groups = Arc::new(GroupRegistry::new());
        let resolver = PermissionResolver::new(groups.clone());
        (groups, resolver)
    }

    fn user() -> PermissionHolder {
        PermissionHolder::new(HolderId::user(uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_direct_nodes_resolve() {
        let (_, resolver) = setup();
        let holder = user();
        holder.set_permission("chat.say", true).unwrap();
        holder.set_permission("chat.shout", false).unwrap();

        let map = resolver.resolve(&holder, &Context::global());
        assert_eq!(map.get("chat.say"), Some(&true));
        assert_eq!(map.get("chat.shout"), Some(&false));
    }

    #[test]
    fn test_idempotent_union() {
        // Two nodes of the same key and value in different holders still
        // produce that value.
        let (groups, resolver) = setup();
        let group = groups.create("default").unwrap();
        group.holder().set_permission("chat.say", true).unwrap();

        let holder = user();
        holder.add_group("default").unwrap();
        holder.set_permission("chat.say", true).unwrap();

        let map = resolver.resolve(&holder, &Context::global());
        assert_eq!(map.get("chat.say"), Some(&true));
    }

    #[test]
    fn test_expired_node_is_absent() {
        let (_, resolver) = setup();
        let holder = user();
        holder
            .set(
                Node::builder("foo.bar")
                    .expiry(Utc::now() - Duration::seconds(100))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let map = resolver.resolve(&holder, &Context::global());
        assert!(map.get("foo.bar").is_none());
        // The node itself is still present and removable.
        assert_eq!(holder.nodes().len(), 1);
        assert!(holder.unset_permission("foo.bar").is_ok());
    }

    #[test]
    fn test_inherited_server_scoped_permission() {
        let (groups, resolver) = setup();
        let group = groups.create("default").unwrap();
        group
            .holder()
            .set(
                Node::builder("chat.say")
                    .server("survival")
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let holder = user();
        holder.add_group("default").unwrap();

        let survival = resolver.resolve(&holder, &Context::server("survival"));
        assert_eq!(survival.get("chat.say"), Some(&true));

        let creative = resolver.resolve(&holder, &Context::server("creative"));
        assert!(creative.get("chat.say").is_none());
    }

    #[test]
    fn test_direct_outranks_inherited() {
        let (groups, resolver) = setup();
        let group = groups.create("default").unwrap();
        // The group grants with a server-specific node, which the plain
        // direct negation still beats: source rank comes first.
        group
            .holder()
            .set(
                Node::builder("chat.say")
                    .server("survival")
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let holder = user();
        holder.add_group("default").unwrap();
        holder.set_permission("chat.say", false).unwrap();

        let map = resolver.resolve(&holder, &Context::server("survival"));
        assert_eq!(map.get("chat.say"), Some(&false));
    }

    #[test]
    fn test_group_cycle_fails_closed() {
        let (groups, resolver) = setup();
        let a = groups.create("a").unwrap();
        let b = groups.create("b").unwrap();
        a.holder().add_group("b").unwrap();
        a.holder().set_permission("from.a", true).unwrap();
        b.holder().add_group("a").unwrap();
        b.holder().set_permission("from.b", true).unwrap();

        let map = resolver.resolve(a.holder(), &Context::global());
        assert_eq!(map.get("from.a"), Some(&true));
        assert_eq!(map.get("from.b"), Some(&true));
    }

    #[test]
    fn test_negated_group_edge_does_not_inherit() {
        let (groups, resolver) = setup();
        let group = groups.create("vip").unwrap();
        group.holder().set_permission("vip.perk", true).unwrap();

        let holder = user();
        holder
            .set(Node::builder("group.vip").value(false).build().unwrap())
            .unwrap();

        let map = resolver.resolve(&holder, &Context::global());
        assert!(map.get("vip.perk").is_none());
        assert_eq!(map.get("group.vip"), Some(&false));
    }

    #[test]
    fn test_exact_literal_stands_against_wildcard() {
        let (_, resolver) = setup();
        let holder = user();
        holder.set_permission("a.b.*", true).unwrap();
        holder.set_permission("a.b.c", false).unwrap();

        let map = resolver.resolve(&holder, &Context::global());
        assert_eq!(map.get("a.b.c"), Some(&false));
        assert_eq!(map.get("a.b.*"), Some(&true));
    }

    #[test]
    fn test_wildcard_fills_known_permissions() {
        let groups = Arc::new(GroupRegistry::new());
        let known = Arc::new(KnownPermissions::new());
        known.register("a.b.c");
        known.register("a.b.d");
        known.register("x.y");
        let resolver = PermissionResolver::with_known(groups, known);

        let holder = user();
        holder.set_permission("a.b.*", true).unwrap();

        let map = resolver.resolve(&holder, &Context::global());
        assert_eq!(map.get("a.b.c"), Some(&true));
        assert_eq!(map.get("a.b.d"), Some(&true));
        assert!(map.get("x.y").is_none());
    }

    #[test]
    fn test_more_specific_wildcard_wins_across_sources() {
        let (groups, resolver) = setup();
        let group = groups.create("default").unwrap();
        // Inherited, but more specific.
        group.holder().set_permission("a.b.*", false).unwrap();

        let holder = user();
        holder.add_group("default").unwrap();
        holder.set_permission("a.*", true).unwrap();

        resolver.known().register("a.b.c");
        resolver.known().register("a.z");

        let map = resolver.resolve(&holder, &Context::global());
        // a.b.* (level 3) fills before a.* (level 2).
        assert_eq!(map.get("a.b.c"), Some(&false));
        assert_eq!(map.get("a.z"), Some(&true));
    }

    #[test]
    fn test_shorthand_expands_to_literals() {
        let (_, resolver) = setup();
        let holder = user();
        holder.set_permission("chat.(say|me)", true).unwrap();

        let map = resolver.resolve(&holder, &Context::global());
        assert_eq!(map.get("chat.say"), Some(&true));
        assert_eq!(map.get("chat.me"), Some(&true));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let (_, resolver) = setup();
        let holder = user();
        holder.set_permission("a.b", true).unwrap();
        holder
            .set(Node::builder("a.b").value(false).build().unwrap())
            .unwrap();

        let first = resolver.resolve(&holder, &Context::global());
        for _ in 0..10 {
            holder.invalidate();
            let next = resolver.resolve(&holder, &Context::global());
            assert_eq!(first.get("a.b"), next.get("a.b"));
        }
        // Full ties go to the later node in the stable collection order.
        assert_eq!(first.get("a.b"), Some(&false));
    }

    #[test]
    fn test_resolution_is_cached_and_invalidated() {
        let (_, resolver) = setup();
        let holder = user();
        holder.set_permission("a.b", true).unwrap();

        let ctx = Context::global();
        let first = resolver.resolve(&holder, &ctx);
        let second = resolver.resolve(&holder, &ctx);
        assert!(Arc::ptr_eq(&first, &second));

        holder.set_permission("c.d", true).unwrap();
        let third = resolver.resolve(&holder, &ctx);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.get("c.d"), Some(&true));
    }

    #[test]
    fn test_override_beats_temporary() {
        let (_, resolver) = setup();
        let holder = user();
        holder
            .set(
                Node::builder("a.b")
                    .expiry(Utc::now() + Duration::hours(1))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        holder
            .set(
                Node::builder("a.b")
                    .value(false)
                    .overriding(true)
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let map = resolver.resolve(&holder, &Context::global());
        assert_eq!(map.get("a.b"), Some(&false));
    }
}
