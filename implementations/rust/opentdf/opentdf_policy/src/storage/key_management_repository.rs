use crate::models::{
    CreateProviderConfigRequest, Identifier, KeyProviderConfig, ListProviderConfigsRequest,
    ListResponse, UpdateProviderConfigRequest,
};
use async_trait::async_trait;
use opentdf_db::Result;

/// This repository stores the configurations of the key managers holding
/// provider root keys and remote keys
#[async_trait]
pub trait KeyManagementRepository: Send + Sync + 'static {
    /// Create a provider config. Its manager must be registered in the policy configuration
    async fn create_provider_config(
        &self,
        request: &CreateProviderConfigRequest,
    ) -> Result<KeyProviderConfig>;

    /// Return a provider config by id or name
    async fn get_provider_config(&self, identifier: &Identifier) -> Result<KeyProviderConfig>;

    async fn list_provider_configs(
        &self,
        request: &ListProviderConfigsRequest,
    ) -> Result<ListResponse<KeyProviderConfig>>;

    async fn update_provider_config(
        &self,
        request: &UpdateProviderConfigRequest,
    ) -> Result<KeyProviderConfig>;

    /// Delete a provider config. This fails while some keys still use it
    async fn delete_provider_config(&self, id: &str) -> Result<KeyProviderConfig>;
}
