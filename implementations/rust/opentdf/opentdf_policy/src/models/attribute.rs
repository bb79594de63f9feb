use crate::models::{
    policy_enum, ActiveStateEnum, KeyAccessServer, Metadata, MetadataMutable, MetadataUpdateEnum,
    Namespace, PageRequest, SimpleKasKey,
};

policy_enum!(
    /// How the values of an attribute are combined in a decision
    AttributeRuleType {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        AllOf = 1 => "ALL_OF",
        AnyOf = 2 => "ANY_OF",
        Hierarchy = 3 => "HIERARCHY",
    }
);

/// An attribute definition, with its values in their authoring order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attribute {
    pub id: String,
    /// Parent namespace, without its grants and keys
    pub namespace: Namespace,
    pub name: String,
    pub rule: AttributeRuleType,
    pub values: Vec<Value>,
    pub fqn: String,
    pub active: bool,
    pub grants: Vec<KeyAccessServer>,
    pub kas_keys: Vec<SimpleKasKey>,
    pub metadata: Metadata,
}

impl Attribute {
    /// Return the value with the given value string, if any
    pub fn value(&self, value: &str) -> Option<&Value> {
        self.values.iter().find(|v| v.value == value)
    }
}

/// A value of an attribute definition
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Value {
    pub id: String,
    pub attribute_id: String,
    pub value: String,
    pub fqn: String,
    pub active: bool,
    pub grants: Vec<KeyAccessServer>,
    pub kas_keys: Vec<SimpleKasKey>,
    pub metadata: Metadata,
}

/// The attribute and value designated by a value FQN
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeAndValue {
    pub attribute: Attribute,
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateAttributeRequest {
    pub namespace_id: String,
    pub name: String,
    pub rule: AttributeRuleType,
    /// Values created with the attribute, in this order
    pub values: Vec<String>,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateAttributeRequest {
    pub id: String,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

/// List attributes, optionally restricted to a namespace given by id or name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListAttributesRequest {
    pub state: ActiveStateEnum,
    pub namespace: Option<String>,
    pub pagination: PageRequest,
}

/// Change the identity of an attribute. `current_fqn` must be the current FQN of the
/// attribute. `values_order` must be a permutation of the current value ids
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsafeUpdateAttributeRequest {
    pub id: String,
    pub current_fqn: String,
    pub name: Option<String>,
    pub rule: Option<AttributeRuleType>,
    pub values_order: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateAttributeValueRequest {
    pub attribute_id: String,
    pub value: String,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateAttributeValueRequest {
    pub id: String,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListAttributeValuesRequest {
    pub attribute_id: String,
    pub state: ActiveStateEnum,
    pub pagination: PageRequest,
}

/// Change the value string of an attribute value. `current_fqn` must be its current FQN
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsafeUpdateAttributeValueRequest {
    pub id: String,
    pub current_fqn: String,
    pub value: String,
}
