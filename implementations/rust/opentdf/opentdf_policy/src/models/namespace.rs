use crate::models::{
    ActiveStateEnum, KeyAccessServer, Metadata, MetadataMutable, MetadataUpdateEnum, PageRequest,
    SimpleKasKey,
};

/// The root of the attribute tree: a DNS-like name owning attributes, obligations and
/// resource mapping groups
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Namespace {
    pub id: String,
    pub name: String,
    pub fqn: String,
    pub active: bool,
    pub metadata: Metadata,
    /// Key access servers granted to this namespace
    pub grants: Vec<KeyAccessServer>,
    /// Keys mapped to this namespace
    pub kas_keys: Vec<SimpleKasKey>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateNamespaceRequest {
    pub name: String,
    pub metadata: Option<MetadataMutable>,
}

impl CreateNamespaceRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateNamespaceRequest {
    pub id: String,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListNamespacesRequest {
    pub state: ActiveStateEnum,
    pub pagination: PageRequest,
}

/// Rename a namespace. `current_fqn` must be the current FQN of the namespace
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsafeUpdateNamespaceRequest {
    pub id: String,
    pub current_fqn: String,
    pub name: String,
}
