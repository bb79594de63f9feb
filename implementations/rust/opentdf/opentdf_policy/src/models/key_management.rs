use crate::models::{Identifier, Metadata, MetadataMutable, MetadataUpdateEnum, PageRequest};
use serde_json::Value as JsonValue;

/// Configuration of a key manager, used by the keys whose private part is held
/// outside of the policy database
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyProviderConfig {
    pub id: String,
    pub name: String,
    pub manager: String,
    pub config: JsonValue,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateProviderConfigRequest {
    pub name: String,
    pub manager: String,
    pub config: JsonValue,
    pub metadata: Option<MetadataMutable>,
}

/// Update a provider config. Fields left to `None` are unchanged
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateProviderConfigRequest {
    pub id: String,
    pub name: Option<String>,
    pub manager: Option<String>,
    pub config: Option<JsonValue>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListProviderConfigsRequest {
    pub pagination: PageRequest,
}

/// A key given by id, or by its key access server and the key id chosen by the operator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KasKeyIdentifier {
    Id(String),
    Key { kas: Identifier, key_id: String },
}

impl KasKeyIdentifier {
    pub fn id(id: impl Into<String>) -> Self {
        KasKeyIdentifier::Id(id.into())
    }

    pub fn key(kas: Identifier, key_id: impl Into<String>) -> Self {
        KasKeyIdentifier::Key {
            kas,
            key_id: key_id.into(),
        }
    }
}
