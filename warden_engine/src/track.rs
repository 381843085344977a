//! Promotion tracks.
//!
//! A track is an ordered sequence of group names used to move a user up or
//! down a ladder of groups. Tracks hold no permissions themselves.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use warden_core::error::{HolderError, NodeError, Result, StorageError};
use warden_core::{patterns, Node};

use crate::group::GroupRegistry;
use crate::holder::PermissionHolder;
use crate::storage::Storage;

/// An ordered sequence of group names.
pub struct Track {
    name: String,
    groups: RwLock<Vec<String>>,
}

impl Track {
    /// Create a track with the given ordered group names.
    pub fn new(name: &str, groups: Vec<String>) -> Result<Self> {
        let name = validate_track_name(name)?;
        let groups = groups
            .into_iter()
            .map(|g| g.to_lowercase())
            .collect::<Vec<_>>();
        Ok(Self {
            name,
            groups: RwLock::new(groups),
        })
    }

    /// The track's lowercase name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the ordered group names.
    pub fn groups(&self) -> Vec<String> {
        self.groups.read().clone()
    }

    /// Whether the group is on this track.
    pub fn contains(&self, group: &str) -> bool {
        let group = group.to_lowercase();
        self.groups.read().iter().any(|g| *g == group)
    }

    /// The group after `current`. `Ok(None)` marks the end of the track;
    /// `Lacks` means `current` is not on the track at all.
    pub fn next(&self, current: &str) -> Result<Option<String>> {
        let groups = self.groups.read();
        let index = position(&groups, current)?;
        Ok(groups.get(index + 1).cloned())
    }

    /// The group before `current`. `Ok(None)` marks the start of the track.
    pub fn previous(&self, current: &str) -> Result<Option<String>> {
        let groups = self.groups.read();
        let index = position(&groups, current)?;
        if index == 0 {
            return Ok(None);
        }
        Ok(groups.get(index - 1).cloned())
    }

    /// Append a group to the end of the track.
    pub fn append(&self, group: &str) -> Result<()> {
        let group = group.to_lowercase();
        let mut groups = self.groups.write();
        if groups.contains(&group) {
            return Err(HolderError::AlreadyHas(group).into());
        }
        groups.push(group);
        Ok(())
    }

    /// Insert a group immediately after another.
    pub fn insert_after(&self, group: &str, after: &str) -> Result<()> {
        let group = group.to_lowercase();
        let mut groups = self.groups.write();
        if groups.contains(&group) {
            return Err(HolderError::AlreadyHas(group).into());
        }
        let index = position(&groups, after)?;
        groups.insert(index + 1, group);
        Ok(())
    }

    /// Remove a group from the track.
    pub fn remove(&self, group: &str) -> Result<()> {
        let mut groups = self.groups.write();
        let index = position(&groups, group)?;
        groups.remove(index);
        Ok(())
    }

    /// Promote a holder along this track: drop the membership edge for the
    /// current group, add one for the next group with the same
    /// server/world/expiry/context qualifiers. Returns the new group name,
    /// or `Ok(None)` (with no mutation) at the end of the track.
    pub fn promote(
        &self,
        holder: &PermissionHolder,
        registry: &GroupRegistry,
    ) -> Result<Option<String>> {
        self.shift(holder, registry, Direction::Up)
    }

    /// Demote a holder along this track. `Ok(None)` at the start.
    pub fn demote(
        &self,
        holder: &PermissionHolder,
        registry: &GroupRegistry,
    ) -> Result<Option<String>> {
        self.shift(holder, registry, Direction::Down)
    }

    fn shift(
        &self,
        holder: &PermissionHolder,
        registry: &GroupRegistry,
        direction: Direction,
    ) -> Result<Option<String>> {
        // The current group is the first of the holder's memberships, in
        // track order.
        let edges = holder.group_edges(chrono::Utc::now());
        let mut found: Option<(String, Node)> = None;
        for group in self.groups() {
            if let Some(edge) = edges
                .iter()
                .find(|e| e.group_name() == Some(group.as_str()))
            {
                found = Some((group, edge.clone()));
                break;
            }
        }
        let (current, edge) = found
            .ok_or_else(|| HolderError::Lacks(format!("not on track {}", self.name)))?;

        let target = match direction {
            Direction::Up => self.next(&current)?,
            Direction::Down => self.previous(&current)?,
        };
        let target = match target {
            Some(target) => target,
            None => return Ok(None),
        };

        if !registry.is_loaded(&target) {
            return Err(StorageError::NotFound(format!("group {}", target)).into());
        }

        // Preserve the qualifiers of the edge being replaced.
        let mut builder = Node::builder(&format!("group.{}", target));
        if let Some(server) = edge.server() {
            builder = builder.server(server);
        }
        if let Some(world) = edge.world() {
            builder = builder.world(world);
        }
        if let Some(expiry) = edge.expiry() {
            builder = builder.expiry(expiry);
        }
        for (key, value) in edge.extra() {
            builder = builder.extra(key, value);
        }
        let replacement = builder.build()?;

        // Validate before applying, so a duplicate target edge leaves the
        // holder untouched.
        if holder.has_exact(&replacement) {
            return Err(HolderError::AlreadyHas(replacement.to_string()).into());
        }
        holder.unset(&edge)?;
        holder.set(replacement)?;

        debug!(holder = %holder.id(), track = %self.name, from = %current, to = %target, "holder moved along track");
        Ok(Some(target))
    }
}

enum Direction {
    Up,
    Down,
}

fn position(groups: &[String], group: &str) -> Result<usize> {
    let group = group.to_lowercase();
    groups
        .iter()
        .position(|g| *g == group)
        .ok_or_else(|| HolderError::Lacks(group).into())
}

fn validate_track_name(name: &str) -> Result<String> {
    let name = name.to_lowercase();
    if name.is_empty() || patterns::INVALID_NAME_CHARS.is_match(&name) {
        return Err(NodeError::InvalidFormat(format!(
            "track name '{}' contains a reserved delimiter",
            name
        ))
        .into());
    }
    Ok(name)
}

/// Case-insensitive, name-keyed registry of loaded tracks.
pub struct TrackRegistry {
    loaded: DashMap<String, Arc<Track>>,
}

impl TrackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            loaded: DashMap::new(),
        }
    }

    /// Create a new track. Fails with `AlreadyHas` if one exists.
    pub fn create(&self, name: &str, groups: Vec<String>) -> Result<Arc<Track>> {
        let track = Arc::new(Track::new(name, groups)?);
        match self.loaded.entry(track.name().to_string()) {
            Entry::Occupied(_) => Err(HolderError::AlreadyHas(track.name().to_string()).into()),
            Entry::Vacant(vacant) => {
                vacant.insert(track.clone());
                Ok(track)
            }
        }
    }

    /// Look up a loaded track.
    pub fn get(&self, name: &str) -> Option<Arc<Track>> {
        self.loaded.get(&name.to_lowercase()).map(|t| t.clone())
    }

    /// Remove a track. Fails with `Lacks` if absent.
    pub fn remove(&self, name: &str) -> Result<Arc<Track>> {
        self.loaded
            .remove(&name.to_lowercase())
            .map(|(_, track)| track)
            .ok_or_else(|| HolderError::Lacks(name.to_lowercase()).into())
    }

    /// Load a track definition from storage, replacing any loaded copy.
    pub fn load(&self, storage: &dyn Storage, name: &str) -> Result<Arc<Track>> {
        let groups = storage.load_track(name)?;
        let track = Arc::new(Track::new(name, groups)?);
        if self.loaded.insert(track.name().to_string(), track.clone()).is_some() {
            warn!(track = %track.name(), "replaced an already-loaded track definition");
        }
        Ok(track)
    }
}

impl Default for TrackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;
    use warden_core::HolderId;

    fn staff_track() -> Track {
        Track::new(
            "staff",
            vec!["default".into(), "mod".into(), "admin".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_navigation() {
        let track = staff_track();
        assert_eq!(track.next("default").unwrap().as_deref(), Some("mod"));
        assert_eq!(track.next("admin").unwrap(), None);
        assert_eq!(track.previous("mod").unwrap().as_deref(), Some("default"));
        assert_eq!(track.previous("default").unwrap(), None);

        // A group not on the track is an error, not an end-of-track.
        assert!(track.next("vip").is_err());
        assert!(track.previous("vip").is_err());
    }

    #[test]
    fn test_editing() {
        let track = staff_track();
        track.append("owner").unwrap();
        assert!(track.append("owner").is_err());
        track.insert_after("helper", "default").unwrap();
        assert_eq!(
            track.groups(),
            vec!["default", "helper", "mod", "admin", "owner"]
        );
        track.remove("helper").unwrap();
        assert!(track.remove("helper").is_err());
    }

    #[test]
    fn test_promote_and_demote() {
        let registry = GroupRegistry::new();
        for name in ["default", "mod", "admin"] {
            registry.create(name).unwrap();
        }
        let track = staff_track();

        let holder = PermissionHolder::new(HolderId::user(Uuid::new_v4()));
        holder.add_group("default").unwrap();

        assert_eq!(
            track.promote(&holder, &registry).unwrap().as_deref(),
            Some("mod")
        );
        let edges = holder.group_edges(Utc::now());
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].group_name(), Some("mod"));

        assert_eq!(
            track.demote(&holder, &registry).unwrap().as_deref(),
            Some("default")
        );
    }

    #[test]
    fn test_promote_preserves_qualifiers() {
        let registry = GroupRegistry::new();
        registry.create("default").unwrap();
        registry.create("mod").unwrap();
        let track = Track::new("staff", vec!["default".into(), "mod".into()]).unwrap();

        let expiry = Utc::now() + Duration::hours(1);
        let holder = PermissionHolder::new(HolderId::user(Uuid::new_v4()));
        holder
            .set(
                Node::builder("group.default")
                    .server("survival")
                    .world("nether")
                    .expiry(expiry)
                    .build()
                    .unwrap(),
            )
            .unwrap();

        track.promote(&holder, &registry).unwrap();
        let edge = &holder.group_edges(Utc::now())[0];
        assert_eq!(edge.group_name(), Some("mod"));
        assert_eq!(edge.server(), Some("survival"));
        assert_eq!(edge.world(), Some("nether"));
        assert_eq!(edge.expiry(), Some(expiry));
    }

    #[test]
    fn test_promote_at_end_is_distinguished() {
        let registry = GroupRegistry::new();
        registry.create("default").unwrap();
        registry.create("mod").unwrap();
        registry.create("admin").unwrap();
        let track = staff_track();

        let holder = PermissionHolder::new(HolderId::user(Uuid::new_v4()));
        holder.add_group("admin").unwrap();

        // End of track: no error, no mutation.
        assert_eq!(track.promote(&holder, &registry).unwrap(), None);
        assert_eq!(holder.group_edges(Utc::now())[0].group_name(), Some("admin"));

        // A holder on none of the track's groups is an error.
        let outsider = PermissionHolder::new(HolderId::user(Uuid::new_v4()));
        outsider.add_group("vip").unwrap();
        assert!(track.promote(&outsider, &registry).is_err());
    }

    #[test]
    fn test_promote_requires_loaded_target() {
        let registry = GroupRegistry::new();
        registry.create("default").unwrap();
        // "mod" is not loaded.
        let track = Track::new("staff", vec!["default".into(), "mod".into()]).unwrap();

        let holder = PermissionHolder::new(HolderId::user(Uuid::new_v4()));
        holder.add_group("default").unwrap();
        assert!(track.promote(&holder, &registry).is_err());
    }

    #[test]
    fn test_registry_load() {
        let storage = crate::storage::MemoryStorage::new();
        storage
            .save_track("staff", &["default".into(), "mod".into()])
            .unwrap();

        let registry = TrackRegistry::new();
        let track = registry.load(&storage, "staff").unwrap();
        assert_eq!(track.groups(), vec!["default", "mod"]);
        assert!(registry.get("STAFF").is_some());
        assert!(registry.load(&storage, "missing").is_err());
    }
}
