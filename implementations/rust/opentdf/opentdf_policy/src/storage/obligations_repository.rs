use crate::models::{
    AddObligationTriggerRequest, CreateObligationRequest, CreateObligationValueRequest, Identifier,
    ListObligationTriggersRequest, ListObligationsRequest, ListResponse, Obligation,
    ObligationTrigger, ObligationValue, UpdateObligationRequest, UpdateObligationValueRequest,
};
use async_trait::async_trait;
use opentdf_db::Result;
use std::collections::BTreeMap;

/// This repository stores obligations, their values and the triggers attaching
/// obligation values to attribute values and actions
#[async_trait]
pub trait ObligationsRepository: Send + Sync + 'static {
    /// Create an obligation with its initial values
    async fn create_obligation(&self, request: &CreateObligationRequest) -> Result<Obligation>;

    /// Return an obligation by id or FQN, with its values and their triggers
    async fn get_obligation(&self, identifier: &Identifier) -> Result<Obligation>;

    async fn list_obligations(
        &self,
        request: &ListObligationsRequest,
    ) -> Result<ListResponse<Obligation>>;

    /// Rename an obligation or change its labels.
    /// A rename changes the FQNs of the obligation and of its values
    async fn update_obligation(&self, request: &UpdateObligationRequest) -> Result<Obligation>;

    /// Delete an obligation given by id or FQN, with its values and triggers
    async fn delete_obligation(&self, identifier: &Identifier) -> Result<Obligation>;

    /// Return obligations keyed by FQN. Unknown FQNs fail with `NotFound`
    async fn get_obligations_by_fqns(&self, fqns: &[String])
        -> Result<BTreeMap<String, Obligation>>;

    async fn create_obligation_value(
        &self,
        request: &CreateObligationValueRequest,
    ) -> Result<ObligationValue>;

    async fn get_obligation_value(&self, identifier: &Identifier) -> Result<ObligationValue>;

    async fn update_obligation_value(
        &self,
        request: &UpdateObligationValueRequest,
    ) -> Result<ObligationValue>;

    async fn delete_obligation_value(&self, identifier: &Identifier) -> Result<ObligationValue>;

    /// Return obligation values keyed by FQN. Unknown FQNs fail with `NotFound`
    async fn get_obligation_values_by_fqns(
        &self,
        fqns: &[String],
    ) -> Result<BTreeMap<String, ObligationValue>>;

    async fn add_obligation_trigger(
        &self,
        request: &AddObligationTriggerRequest,
    ) -> Result<ObligationTrigger>;

    async fn remove_obligation_trigger(&self, id: &str) -> Result<ObligationTrigger>;

    async fn list_obligation_triggers(
        &self,
        request: &ListObligationTriggersRequest,
    ) -> Result<ListResponse<ObligationTrigger>>;

    /// Return the FQNs of the obligation values required to perform an action on data
    /// carrying an attribute value.
    /// A trigger without client matches every client, a trigger scoped to a client only
    /// matches that client.
    async fn get_obligations_for_action(
        &self,
        attribute_value: &Identifier,
        action: &str,
        client_id: Option<&str>,
    ) -> Result<Vec<String>>;
}
