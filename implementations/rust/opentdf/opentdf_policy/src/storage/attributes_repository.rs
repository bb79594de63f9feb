use crate::models::{
    Attribute, AttributeAndValue, CreateAttributeRequest, Identifier, ListAttributesRequest,
    ListResponse, UnsafeUpdateAttributeRequest, UpdateAttributeRequest,
};
use async_trait::async_trait;
use opentdf_db::Result;
use std::collections::BTreeMap;

/// This repository stores attribute definitions and gives access to their values
#[async_trait]
pub trait AttributesRepository: Send + Sync + 'static {
    /// Return an attribute by id or FQN, with all its values, whatever their state.
    /// A value FQN designates the attribute of the value.
    async fn get_attribute(&self, identifier: &Identifier) -> Result<Attribute>;

    /// Return a page of attributes, most recent first, optionally for a single namespace
    async fn list_attributes(
        &self,
        request: &ListAttributesRequest,
    ) -> Result<ListResponse<Attribute>>;

    /// Return the value and the attribute designated by each value FQN, keyed by the
    /// lower-cased FQN. Every FQN must be a value FQN, else this fails with `FqnMissingValue`
    async fn get_attributes_by_value_fqns(
        &self,
        fqns: &[String],
    ) -> Result<BTreeMap<String, AttributeAndValue>>;

    /// Create an attribute with some initial values
    async fn create_attribute(&self, request: &CreateAttributeRequest) -> Result<Attribute>;

    /// Update the metadata of an attribute
    async fn update_attribute(&self, request: &UpdateAttributeRequest) -> Result<Attribute>;

    /// Deactivate an attribute and all its values
    async fn deactivate_attribute(&self, id: &str) -> Result<Attribute>;

    /// Rename an attribute, change its rule or the order of its values
    async fn unsafe_update_attribute(
        &self,
        request: &UnsafeUpdateAttributeRequest,
    ) -> Result<Attribute>;

    /// Reactivate an attribute, without reactivating its values
    async fn unsafe_reactivate_attribute(&self, id: &str) -> Result<Attribute>;

    /// Delete an attribute with its values and everything mapped to them.
    /// `fqn` must be its current FQN
    async fn unsafe_delete_attribute(&self, id: &str, fqn: &str) -> Result<Attribute>;
}
