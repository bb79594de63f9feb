use crate::models::{
    CreateRegisteredResourceRequest, CreateRegisteredResourceValueRequest, Identifier,
    ListRegisteredResourceValuesRequest, ListRegisteredResourcesRequest, ListResponse,
    RegisteredResource, RegisteredResourceValue, UpdateRegisteredResourceRequest,
    UpdateRegisteredResourceValueRequest,
};
use async_trait::async_trait;
use opentdf_db::Result;
use std::collections::BTreeMap;

/// This repository stores registered resources and their values.
/// A value lists the actions that can be performed on data carrying some attribute values.
#[async_trait]
pub trait RegisteredResourcesRepository: Send + Sync + 'static {
    /// Create a resource with its initial values
    async fn create_registered_resource(
        &self,
        request: &CreateRegisteredResourceRequest,
    ) -> Result<RegisteredResource>;

    /// Return a resource by id, name or FQN, with its values
    async fn get_registered_resource(&self, identifier: &Identifier)
        -> Result<RegisteredResource>;

    async fn list_registered_resources(
        &self,
        request: &ListRegisteredResourcesRequest,
    ) -> Result<ListResponse<RegisteredResource>>;

    /// Rename a resource or change its labels.
    /// A rename changes the FQNs of the resource and of its values
    async fn update_registered_resource(
        &self,
        request: &UpdateRegisteredResourceRequest,
    ) -> Result<RegisteredResource>;

    /// Delete a resource with its values
    async fn delete_registered_resource(&self, id: &str) -> Result<RegisteredResource>;

    async fn create_registered_resource_value(
        &self,
        request: &CreateRegisteredResourceValueRequest,
    ) -> Result<RegisteredResourceValue>;

    /// Return a resource value by id or FQN
    async fn get_registered_resource_value(
        &self,
        identifier: &Identifier,
    ) -> Result<RegisteredResourceValue>;

    /// Return resource values keyed by FQN. Unknown FQNs fail with `NotFound`
    async fn get_registered_resource_values_by_fqns(
        &self,
        fqns: &[String],
    ) -> Result<BTreeMap<String, RegisteredResourceValue>>;

    async fn list_registered_resource_values(
        &self,
        request: &ListRegisteredResourceValuesRequest,
    ) -> Result<ListResponse<RegisteredResourceValue>>;

    async fn update_registered_resource_value(
        &self,
        request: &UpdateRegisteredResourceValueRequest,
    ) -> Result<RegisteredResourceValue>;

    async fn delete_registered_resource_value(&self, id: &str)
        -> Result<RegisteredResourceValue>;
}
