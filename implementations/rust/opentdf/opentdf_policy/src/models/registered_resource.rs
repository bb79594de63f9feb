use crate::models::{Action, Identifier, Metadata, MetadataMutable, MetadataUpdateEnum, PageRequest};

/// A resource known to the platform, such as a service or a data store, whose values
/// are entitled through actions on attribute values
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisteredResource {
    pub id: String,
    pub name: String,
    pub fqn: String,
    pub values: Vec<RegisteredResourceValue>,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisteredResourceValue {
    pub id: String,
    pub resource_id: String,
    pub value: String,
    pub fqn: String,
    pub action_attribute_values: Vec<ActionAttributeValue>,
    pub metadata: Metadata,
}

/// An action on data carrying an attribute value, attached to a resource value
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionAttributeValue {
    pub id: String,
    pub action: Action,
    pub attribute_value_id: String,
    pub attribute_value_fqn: String,
}

/// An action given by id or name, and an attribute value given by id or FQN
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionAttributeValueRequest {
    pub action: Identifier,
    pub attribute_value: Identifier,
}

impl ActionAttributeValueRequest {
    pub fn new(action: Identifier, attribute_value: Identifier) -> Self {
        Self {
            action,
            attribute_value,
        }
    }
}

/// Create a resource with its initial values
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateRegisteredResourceRequest {
    pub name: String,
    pub values: Vec<String>,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateRegisteredResourceRequest {
    pub id: String,
    pub name: Option<String>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListRegisteredResourcesRequest {
    pub pagination: PageRequest,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateRegisteredResourceValueRequest {
    pub resource_id: String,
    pub value: String,
    pub action_attribute_values: Vec<ActionAttributeValueRequest>,
    pub metadata: Option<MetadataMutable>,
}

/// Update a resource value. When `action_attribute_values` is given, it replaces
/// the current ones
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateRegisteredResourceValueRequest {
    pub id: String,
    pub value: Option<String>,
    pub action_attribute_values: Option<Vec<ActionAttributeValueRequest>>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

/// List the values of a resource, or of all resources
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListRegisteredResourceValuesRequest {
    pub resource_id: Option<String>,
    pub pagination: PageRequest,
}
