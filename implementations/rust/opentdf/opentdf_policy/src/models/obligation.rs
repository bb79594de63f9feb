use crate::models::{
    Action, Identifier, Metadata, MetadataMutable, MetadataUpdateEnum, Namespace, PageRequest,
};

/// A requirement, such as watermarking, which must be fulfilled to access some data
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Obligation {
    pub id: String,
    /// Parent namespace, without its grants and keys
    pub namespace: Namespace,
    pub name: String,
    pub fqn: String,
    pub values: Vec<ObligationValue>,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObligationValue {
    pub id: String,
    pub obligation_id: String,
    pub value: String,
    pub fqn: String,
    pub triggers: Vec<ObligationTrigger>,
    pub metadata: Metadata,
}

/// Attach an obligation value to an attribute value and an action, optionally for a
/// single client
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObligationTrigger {
    pub id: String,
    pub obligation_value_id: String,
    pub obligation_value_fqn: String,
    pub attribute_value_id: String,
    pub attribute_value_fqn: String,
    pub action: Action,
    pub client_id: Option<String>,
    pub metadata: Metadata,
}

/// Create an obligation in a namespace given by id or FQN
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateObligationRequest {
    pub namespace: Identifier,
    pub name: String,
    pub values: Vec<String>,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateObligationRequest {
    pub id: String,
    pub name: Option<String>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

/// List the obligations of a namespace given by id, FQN or name, or of all namespaces
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListObligationsRequest {
    pub namespace: Identifier,
    pub pagination: PageRequest,
}

/// Create a value for an obligation given by id or FQN
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateObligationValueRequest {
    pub obligation: Identifier,
    pub value: String,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateObligationValueRequest {
    pub id: String,
    pub value: Option<String>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

/// Add a trigger. The obligation value and the attribute value are given by id or FQN,
/// the action by id or name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddObligationTriggerRequest {
    pub obligation_value: Identifier,
    pub attribute_value: Identifier,
    pub action: Identifier,
    pub client_id: Option<String>,
    pub metadata: Option<MetadataMutable>,
}

/// List the triggers of the obligations of a namespace, or of all namespaces
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListObligationTriggersRequest {
    pub namespace: Identifier,
    pub pagination: PageRequest,
}
