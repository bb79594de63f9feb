use crate::models::{Metadata, MetadataMutable, MetadataUpdateEnum, PageRequest};

/// Names of the actions created with the database
pub const STANDARD_ACTIONS: [&str; 4] = ["create", "read", "update", "delete"];

/// An action which can be performed on data, referenced by obligation triggers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Action {
    pub id: String,
    pub name: String,
    pub is_standard: bool,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateActionRequest {
    pub name: String,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateActionRequest {
    pub id: String,
    pub name: Option<String>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListActionsRequest {
    pub pagination: PageRequest,
}
