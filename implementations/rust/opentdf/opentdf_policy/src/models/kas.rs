use crate::models::{
    policy_enum, Identifier, KasKeyIdentifier, KeyProviderConfig, Metadata, MetadataMutable,
    MetadataUpdateEnum, PageRequest,
};
use serde::{Deserialize, Serialize};

policy_enum!(
    /// Whether a key access server is operated by the platform or by a third party
    SourceType {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        Internal = 1 => "INTERNAL",
        External = 2 => "EXTERNAL",
    }
);

policy_enum!(
    KeyAlgorithm {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        Rsa2048 = 1 => "RSA_2048",
        Rsa4096 = 2 => "RSA_4096",
        EcP256 = 3 => "EC_P256",
        EcP384 = 4 => "EC_P384",
        EcP521 = 5 => "EC_P521",
    }
);

policy_enum!(
    /// Where the private part of a key lives and how it is wrapped
    KeyMode {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        ConfigRootKey = 1 => "CONFIG_ROOT_KEY",
        ProviderRootKey = 2 => "PROVIDER_ROOT_KEY",
        Remote = 3 => "REMOTE",
        PublicKeyOnly = 4 => "PUBLIC_KEY_ONLY",
        Local = 5 => "LOCAL",
    }
);

impl KeyMode {
    /// Keys whose wrapped private key is stored in the policy database
    pub fn stores_wrapped_key(&self) -> bool {
        matches!(self, KeyMode::Local | KeyMode::ConfigRootKey)
    }

    /// Keys held by a key manager, which need a provider config
    pub fn uses_provider(&self) -> bool {
        matches!(self, KeyMode::ProviderRootKey | KeyMode::Remote)
    }
}

policy_enum!(
    KeyStatus {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        Active = 1 => "ACTIVE",
        Rotated = 2 => "ROTATED",
        Inactive = 3 => "INACTIVE",
        Compromised = 4 => "COMPROMISED",
    }
);

/// Public key of a key access server: either fetched from a remote URL or
/// referencing locally provisioned key material
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicKey {
    Remote(String),
    Local(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyAccessServer {
    pub id: String,
    pub uri: String,
    pub name: Option<String>,
    pub public_key: Option<PublicKey>,
    pub source_type: SourceType,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateKeyAccessServerRequest {
    pub uri: String,
    pub name: Option<String>,
    pub public_key: Option<PublicKey>,
    pub source_type: SourceType,
    pub metadata: Option<MetadataMutable>,
}

/// Update a key access server. Fields left to `None` are unchanged
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateKeyAccessServerRequest {
    pub id: String,
    pub uri: Option<String>,
    pub name: Option<String>,
    pub public_key: Option<PublicKey>,
    pub source_type: Option<SourceType>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListKeyAccessServersRequest {
    pub pagination: PageRequest,
}

/// Public part of a key, as a base64 encoded PEM
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCtx {
    pub pem: String,
}

/// Wrapped private part of a key, with the id of the key used to wrap it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKeyCtx {
    pub key_id: String,
    pub wrapped_key: String,
}

/// A key of a key access server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KasKey {
    pub id: String,
    pub kas_id: String,
    pub kas_uri: String,
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub mode: KeyMode,
    pub status: KeyStatus,
    pub public_key_ctx: Option<PublicKeyCtx>,
    pub private_key_ctx: Option<PrivateKeyCtx>,
    pub provider_config: Option<KeyProviderConfig>,
    pub metadata: Metadata,
}

/// A key mapped to a namespace, an attribute or a value
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimpleKasKey {
    pub id: String,
    pub kas_id: String,
    pub kas_uri: String,
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub public_key_pem: Option<String>,
}

/// The key material of a new key
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewKey {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub mode: KeyMode,
    pub public_key_ctx: Option<PublicKeyCtx>,
    pub private_key_ctx: Option<PrivateKeyCtx>,
    pub provider_config_id: Option<String>,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateKeyRequest {
    pub kas_id: String,
    pub key: NewKey,
}

/// List the keys of a key access server, given by id, name or uri, or of all the servers
/// when the identifier is unspecified
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListKeysRequest {
    pub kas: Identifier,
    pub algorithm: Option<KeyAlgorithm>,
    pub pagination: PageRequest,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateKeyRequest {
    pub id: String,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

/// Replace the active key `id` with a new key of the same key access server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotateKeyRequest {
    pub id: String,
    pub new_key: NewKey,
}

/// An entity whose key mapping was moved to the new key
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeMappings {
    pub id: String,
    pub fqn: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotatedResources {
    pub rotated_out_key: KasKey,
    pub namespaces: Vec<ChangeMappings>,
    pub attribute_definitions: Vec<ChangeMappings>,
    pub attribute_values: Vec<ChangeMappings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotateKeyResponse {
    pub kas_key: KasKey,
    pub rotated_resources: RotatedResources,
}

/// Delete a key whatever its status. The uri of its key access server and its key id
/// must be repeated
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsafeDeleteKeyRequest {
    pub id: String,
    pub kas_uri: String,
    pub key_id: String,
}

/// A policy entity a key access server or a key can be assigned to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrantSubject {
    Namespace(String),
    Attribute(String),
    Value(String),
}

impl GrantSubject {
    pub fn id(&self) -> &str {
        match self {
            GrantSubject::Namespace(id) | GrantSubject::Attribute(id) | GrantSubject::Value(id) => {
                id
            }
        }
    }
}

/// A namespace, attribute or value granted to a key access server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantedPolicyObject {
    pub id: String,
    pub fqn: String,
}

/// The grants of a key access server, grouped by subject type
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyAccessServerGrants {
    pub key_access_server: KeyAccessServer,
    pub namespace_grants: Vec<GrantedPolicyObject>,
    pub attribute_grants: Vec<GrantedPolicyObject>,
    pub value_grants: Vec<GrantedPolicyObject>,
}

/// Make a key the base key of the platform
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetBaseKeyRequest {
    pub key: KasKeyIdentifier,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetBaseKeyResponse {
    pub new_base_key: SimpleKasKey,
    pub previous_base_key: Option<SimpleKasKey>,
}

/// List the key mappings of a single key, or of all the mapped keys
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListKeyMappingsRequest {
    pub key: Option<KasKeyIdentifier>,
    pub pagination: PageRequest,
}

/// The namespaces, attributes and values mapped to a key
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyMapping {
    pub key_id: String,
    pub kas_uri: String,
    pub namespace_mappings: Vec<GrantedPolicyObject>,
    pub attribute_mappings: Vec<GrantedPolicyObject>,
    pub value_mappings: Vec<GrantedPolicyObject>,
}
