use crate::models::{
    Action, CreateActionRequest, Identifier, ListActionsRequest, ListResponse, UpdateActionRequest,
};
use async_trait::async_trait;
use opentdf_db::Result;

/// This repository stores the actions referenced by obligation triggers.
/// The standard actions are created with the database and cannot be modified.
#[async_trait]
pub trait ActionsRepository: Send + Sync + 'static {
    /// Return an action by id or name
    async fn get_action(&self, identifier: &Identifier) -> Result<Action>;

    async fn list_actions(&self, request: &ListActionsRequest) -> Result<ListResponse<Action>>;

    async fn create_action(&self, request: &CreateActionRequest) -> Result<Action>;

    async fn update_action(&self, request: &UpdateActionRequest) -> Result<Action>;

    /// Delete a custom action and the obligation triggers referencing it
    async fn delete_action(&self, id: &str) -> Result<Action>;
}
