//! # Warden Core
//!
//! `warden_core` holds the value types and pure logic of the Warden
//! permission engine: the [`Node`](node::Node) model, query
//! [`Context`](context::Context)s, the priority ordering that resolves
//! conflicting grants, and the raw [`NodeRecord`](record::NodeRecord) form
//! that storage collaborators persist.
//!
//! Key concepts:
//!
//! 1. **Node**: one permission grant or group-inheritance edge with
//!    context and temporal qualifiers.
//!
//! 2. **Context**: the (server, world, extra key-values) tuple a query or
//!    node is scoped to.
//!
//! 3. **Priority ordering**: the fixed tie-break sequence deciding which
//!    of several applicable nodes wins a permission key.

pub mod compare;
pub mod context;
pub mod error;
pub mod id;
pub mod node;
pub mod patterns;
pub mod record;

// Re-export key types for convenience.
pub use compare::{compare, compare_at};
pub use context::Context;
pub use error::{Error, HolderError, NodeError, Result, StorageError};
pub use id::HolderId;
pub use node::{Node, NodeBuilder};
pub use record::NodeRecord;
