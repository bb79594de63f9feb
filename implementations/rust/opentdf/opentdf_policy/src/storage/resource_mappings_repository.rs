use crate::models::{
    CreateResourceMappingGroupRequest, CreateResourceMappingRequest, Identifier,
    ListResourceMappingGroupsRequest, ListResourceMappingsRequest, ListResponse, ResourceMapping,
    ResourceMappingGroup, ResourceMappingsByGroup, UpdateResourceMappingGroupRequest,
    UpdateResourceMappingRequest,
};
use async_trait::async_trait;
use opentdf_db::Result;
use std::collections::BTreeMap;

/// This repository stores the mappings of resource terms to attribute values,
/// and the groups organizing them
#[async_trait]
pub trait ResourceMappingsRepository: Send + Sync + 'static {
    /// Return a group by id or FQN
    async fn get_resource_mapping_group(
        &self,
        identifier: &Identifier,
    ) -> Result<ResourceMappingGroup>;

    async fn list_resource_mapping_groups(
        &self,
        request: &ListResourceMappingGroupsRequest,
    ) -> Result<ListResponse<ResourceMappingGroup>>;

    async fn create_resource_mapping_group(
        &self,
        request: &CreateResourceMappingGroupRequest,
    ) -> Result<ResourceMappingGroup>;

    async fn update_resource_mapping_group(
        &self,
        request: &UpdateResourceMappingGroupRequest,
    ) -> Result<ResourceMappingGroup>;

    /// Delete a group. Its mappings are kept, without a group
    async fn delete_resource_mapping_group(&self, id: &str) -> Result<ResourceMappingGroup>;

    async fn get_resource_mapping(&self, id: &str) -> Result<ResourceMapping>;

    async fn list_resource_mappings(
        &self,
        request: &ListResourceMappingsRequest,
    ) -> Result<ListResponse<ResourceMapping>>;

    async fn create_resource_mapping(
        &self,
        request: &CreateResourceMappingRequest,
    ) -> Result<ResourceMapping>;

    async fn update_resource_mapping(
        &self,
        request: &UpdateResourceMappingRequest,
    ) -> Result<ResourceMapping>;

    async fn delete_resource_mapping(&self, id: &str) -> Result<ResourceMapping>;

    /// Return the groups designated by some FQNs with all their mappings, keyed by FQN
    async fn list_resource_mappings_by_group_fqns(
        &self,
        fqns: &[String],
    ) -> Result<BTreeMap<String, ResourceMappingsByGroup>>;
}
