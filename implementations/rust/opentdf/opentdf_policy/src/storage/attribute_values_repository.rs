use crate::models::{
    CreateAttributeValueRequest, Identifier, ListAttributeValuesRequest, ListResponse,
    UnsafeUpdateAttributeValueRequest, UpdateAttributeValueRequest, Value,
};
use async_trait::async_trait;
use opentdf_db::Result;

/// This repository stores the values of attribute definitions
#[async_trait]
pub trait AttributeValuesRepository: Send + Sync + 'static {
    /// Return a value by id or FQN, with its grants and keys, whatever its state
    async fn get_attribute_value(&self, identifier: &Identifier) -> Result<Value>;

    /// Return a page of the values of an attribute, in the order of the attribute values
    async fn list_attribute_values(
        &self,
        request: &ListAttributeValuesRequest,
    ) -> Result<ListResponse<Value>>;

    /// Add a value at the end of the values of an attribute
    async fn create_attribute_value(&self, request: &CreateAttributeValueRequest)
        -> Result<Value>;

    /// Update the metadata of a value
    async fn update_attribute_value(&self, request: &UpdateAttributeValueRequest)
        -> Result<Value>;

    /// Deactivate a value. It keeps its position in the values of its attribute
    async fn deactivate_attribute_value(&self, id: &str) -> Result<Value>;

    /// Change the value string of a value
    async fn unsafe_update_attribute_value(
        &self,
        request: &UnsafeUpdateAttributeValueRequest,
    ) -> Result<Value>;

    async fn unsafe_reactivate_attribute_value(&self, id: &str) -> Result<Value>;

    /// Delete a value and everything mapped to it. `fqn` must be its current FQN
    async fn unsafe_delete_attribute_value(&self, id: &str, fqn: &str) -> Result<Value>;
}
