use crate::models::{
    CreateNamespaceRequest, Identifier, ListNamespacesRequest, ListResponse, Namespace,
    UnsafeUpdateNamespaceRequest, UpdateNamespaceRequest,
};
use async_trait::async_trait;
use opentdf_db::Result;

/// This repository stores namespaces, the roots of the attribute tree.
///
/// Deactivating a namespace deactivates all its attributes and values. Renaming a namespace
/// updates the FQNs of all its descendants.
#[async_trait]
pub trait NamespacesRepository: Send + Sync + 'static {
    /// Return a namespace, by id, FQN or name, with its grants and keys, whatever its state
    async fn get_namespace(&self, identifier: &Identifier) -> Result<Namespace>;

    /// Return a page of namespaces, most recent first
    async fn list_namespaces(
        &self,
        request: &ListNamespacesRequest,
    ) -> Result<ListResponse<Namespace>>;

    /// Return all the namespaces, whatever their state
    async fn list_all_namespaces(&self) -> Result<Vec<Namespace>>;

    /// Create an active namespace. Its name is lower-cased
    async fn create_namespace(&self, request: &CreateNamespaceRequest) -> Result<Namespace>;

    /// Update the metadata of a namespace
    async fn update_namespace(&self, request: &UpdateNamespaceRequest) -> Result<Namespace>;

    /// Deactivate a namespace with all its attributes and values
    async fn deactivate_namespace(&self, id: &str) -> Result<Namespace>;

    /// Rename a namespace
    async fn unsafe_update_namespace(
        &self,
        request: &UnsafeUpdateNamespaceRequest,
    ) -> Result<Namespace>;

    /// Reactivate a namespace, without reactivating its attributes and values
    async fn unsafe_reactivate_namespace(&self, id: &str) -> Result<Namespace>;

    /// Delete a namespace and everything it contains. `fqn` must be its current FQN
    async fn unsafe_delete_namespace(&self, id: &str, fqn: &str) -> Result<Namespace>;
}
