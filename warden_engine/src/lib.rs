//! # Warden Engine
//!
//! `warden_engine` is the live half of the Warden permission engine: the
//! concurrent holders, registries, resolver, and storage plumbing that sit
//! on top of the value types in `warden_core`.
//!
//! Key concepts:
//!
//! 1. **PermissionHolder**: a mutable node set plus a per-context cache of
//!    resolved permissions, safe to share across threads.
//!
//! 2. **PermissionResolver**: computes the effective key -> bool map for a
//!    holder in a context, walking group inheritance and applying the
//!    priority ordering.
//!
//! 3. **Registries**: `UserManager`, `GroupRegistry`, and `TrackRegistry`
//!    own the loaded holders and their load/unload lifecycles.
//!
//! 4. **Storage**: a blocking persistence contract, with an async facade
//!    and callback adapters for hosts that need them.
//!
//! 5. **UpdateCoordinator**: listens for mutations and invalidates every
//!    holder whose resolved state could have changed.

pub mod config;
pub mod group;
pub mod holder;
pub mod manager;
pub mod resolve;
pub mod storage;
pub mod track;
pub mod update;
pub mod user;

// Re-export key types and traits for convenience.
pub use config::EngineConfig;
pub use group::{Group, GroupRegistry};
pub use holder::{ChangeListener, PermissionHolder};
pub use manager::{PlatformAdapter, UserManager};
pub use resolve::{KnownPermissions, PermissionResolver};
pub use storage::{AsyncStorage, MemoryStorage, Storage};
pub use track::{Track, TrackRegistry};
pub use update::UpdateCoordinator;
pub use user::User;
