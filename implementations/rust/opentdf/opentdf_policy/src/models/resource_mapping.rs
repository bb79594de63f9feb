use crate::models::{Metadata, MetadataMutable, MetadataUpdateEnum, PageRequest, Value};

/// A named group of resource mappings in a namespace
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceMappingGroup {
    pub id: String,
    pub namespace_id: String,
    pub name: String,
    pub fqn: String,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateResourceMappingGroupRequest {
    pub namespace_id: String,
    pub name: String,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateResourceMappingGroupRequest {
    pub id: String,
    pub namespace_id: Option<String>,
    pub name: Option<String>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListResourceMappingGroupsRequest {
    pub namespace_id: Option<String>,
    pub pagination: PageRequest,
}

/// Terms found in resources, mapped to an attribute value.
/// Terms are kept verbatim, in their order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceMapping {
    pub id: String,
    pub attribute_value: Value,
    pub terms: Vec<String>,
    pub group: Option<ResourceMappingGroup>,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateResourceMappingRequest {
    pub attribute_value_id: String,
    pub terms: Vec<String>,
    pub group_id: Option<String>,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateResourceMappingRequest {
    pub id: String,
    pub attribute_value_id: Option<String>,
    pub terms: Option<Vec<String>>,
    pub group_id: Option<String>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListResourceMappingsRequest {
    pub group_id: Option<String>,
    pub pagination: PageRequest,
}

/// A group and all its mappings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceMappingsByGroup {
    pub group: ResourceMappingGroup,
    pub mappings: Vec<ResourceMapping>,
}
