//! Async and callback calling conventions over a blocking [`Storage`].
//!
//! Blocking backends run on the tokio blocking pool via `spawn_blocking`;
//! callbacks are delivered on a background task. Neither convention makes
//! any promise about the completion thread, and callbacks must not assume
//! they run on the thread that issued the call.

use std::sync::Arc;

use futures::future::try_join_all;
use uuid::Uuid;

use warden_core::error::{Result, StorageError};
use warden_core::{HolderId, NodeRecord};

use super::Storage;

/// Async and callback facade over a blocking storage collaborator.
#[derive(Clone)]
pub struct AsyncStorage {
    inner: Arc<dyn Storage>,
}

impl AsyncStorage {
    /// Wrap a blocking storage collaborator.
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self { inner }
    }

    /// The wrapped blocking collaborator.
    pub fn blocking(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Storage) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        match tokio::task::spawn_blocking(move || op(inner.as_ref())).await {
            Ok(result) => result,
            Err(err) => Err(StorageError::Backend(format!("storage task failed: {}", err)).into()),
        }
    }

    /// Load the ordered raw node list for a holder.
    pub async fn load_nodes(&self, id: HolderId) -> Result<Vec<NodeRecord>> {
        self.run(move |s| s.load_nodes(&id)).await
    }

    /// Load node lists for several holders concurrently.
    pub async fn load_many_nodes(&self, ids: Vec<HolderId>) -> Result<Vec<Vec<NodeRecord>>> {
        try_join_all(ids.into_iter().map(|id| self.load_nodes(id))).await
    }

    /// Persist the full node list for a holder.
    pub async fn save_nodes(&self, id: HolderId, nodes: Vec<NodeRecord>) -> Result<()> {
        self.run(move |s| s.save_nodes(&id, &nodes)).await
    }

    /// Create an empty backing record for a holder.
    pub async fn create_holder(&self, id: HolderId) -> Result<()> {
        self.run(move |s| s.create_holder(&id)).await
    }

    /// Delete a holder's backing record.
    pub async fn delete_holder(&self, id: HolderId) -> Result<()> {
        self.run(move |s| s.delete_holder(&id)).await
    }

    /// Load a track's ordered group list.
    pub async fn load_track(&self, name: String) -> Result<Vec<String>> {
        self.run(move |s| s.load_track(&name)).await
    }

    /// Persist a track's ordered group list.
    pub async fn save_track(&self, name: String, groups: Vec<String>) -> Result<()> {
        self.run(move |s| s.save_track(&name, &groups)).await
    }

    /// Delete a track.
    pub async fn delete_track(&self, name: String) -> Result<()> {
        self.run(move |s| s.delete_track(&name)).await
    }

    /// Look up the username last seen for a UUID.
    pub async fn resolve_name(&self, uuid: Uuid) -> Result<Option<String>> {
        self.run(move |s| s.resolve_name(uuid)).await
    }

    /// Look up the UUID last seen for a username.
    pub async fn resolve_uuid(&self, name: String) -> Result<Option<Uuid>> {
        self.run(move |s| s.resolve_uuid(&name)).await
    }

    /// Load a holder's node list, delivering the result to `callback` on a
    /// background task.
    pub fn load_nodes_callback<C>(&self, id: HolderId, callback: C)
    where
        C: FnOnce(Result<Vec<NodeRecord>>) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            callback(this.load_nodes(id).await);
        });
    }

    /// Persist a holder's node list, delivering the result to `callback`
    /// on a background task.
    pub fn save_nodes_callback<C>(&self, id: HolderId, nodes: Vec<NodeRecord>, callback: C)
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            callback(this.save_nodes(id, nodes).await);
        });
    }

    /// Delete a holder's backing record, delivering the result to
    /// `callback` on a background task.
    pub fn delete_holder_callback<C>(&self, id: HolderId, callback: C)
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            callback(this.delete_holder(id).await);
        });
    }
}
