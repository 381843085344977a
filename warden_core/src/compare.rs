//! Priority ordering over competing nodes.
//!
//! When several nodes would apply to the same permission key, this ordering
//! decides whose value wins. The rule sequence is fixed and must be
//! preserved exactly: resolution outcomes are defined in terms of it.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::node::Node;

/// Compare two competing nodes, `Ordering::Greater` meaning the first node
/// outranks (wins over) the second.
///
/// The rules, evaluated in sequence:
/// 1. equal nodes compare equal;
/// 2. an override node outranks a non-override node;
/// 3. server-specific outranks global;
/// 4. world-specific outranks server-wide;
/// 5. temporary outranks permanent;
/// 6. wildcard outranks exact;
/// 7. of two temporaries, the sooner to expire wins;
/// 8. of two wildcards, the higher segment count wins;
/// 9. otherwise a fixed `Greater`.
///
/// Rule 9 is an arbitrary, documented tie-break: two plain permanent exact
/// nodes that differ only in value do not order meaningfully, and the
/// resolver's stable iteration decides which one lands last. It makes the
/// ordering non-antisymmetric, so this function must never drive a sort;
/// fold pairwise instead.
pub fn compare_at(o1: &Node, o2: &Node, now: DateTime<Utc>) -> Ordering {
    if o1 == o2 {
        return Ordering::Equal;
    }

    if o1.is_override() != o2.is_override() {
        return outranks(o1.is_override());
    }

    if o1.is_server_specific() != o2.is_server_specific() {
        return outranks(o1.is_server_specific());
    }

    if o1.is_world_specific() != o2.is_world_specific() {
        return outranks(o1.is_world_specific());
    }

    if o1.is_temporary() != o2.is_temporary() {
        return outranks(o1.is_temporary());
    }

    if o1.is_wildcard() != o2.is_wildcard() {
        return outranks(o1.is_wildcard());
    }

    if o1.is_temporary() {
        // Soonest to expire takes precedence.
        return outranks(o1.seconds_til_expiry(now) < o2.seconds_til_expiry(now));
    }

    if o1.is_wildcard() {
        return outranks(o1.wildcard_level() > o2.wildcard_level());
    }

    Ordering::Greater
}

/// Compare two competing nodes against the current time.
pub fn compare(o1: &Node, o2: &Node) -> Ordering {
    compare_at(o1, o2, Utc::now())
}

fn outranks(first_wins: bool) -> Ordering {
    if first_wins {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}
