use crate::models::{
    CreateKeyAccessServerRequest, CreateKeyRequest, Identifier, KasKey, KeyAccessServer,
    KeyMapping, ListKeyAccessServersRequest, ListKeyMappingsRequest, ListKeysRequest,
    ListResponse, RotateKeyRequest, RotateKeyResponse, SetBaseKeyRequest, SetBaseKeyResponse,
    SimpleKasKey, UnsafeDeleteKeyRequest, UpdateKeyAccessServerRequest, UpdateKeyRequest,
};
use async_trait::async_trait;
use opentdf_db::Result;

/// This repository stores the registered key access servers and their keys
#[async_trait]
pub trait KasRegistryRepository: Send + Sync + 'static {
    /// Return a key access server by id, uri or name
    async fn get_key_access_server(&self, identifier: &Identifier) -> Result<KeyAccessServer>;

    async fn list_key_access_servers(
        &self,
        request: &ListKeyAccessServersRequest,
    ) -> Result<ListResponse<KeyAccessServer>>;

    async fn create_key_access_server(
        &self,
        request: &CreateKeyAccessServerRequest,
    ) -> Result<KeyAccessServer>;

    async fn update_key_access_server(
        &self,
        request: &UpdateKeyAccessServerRequest,
    ) -> Result<KeyAccessServer>;

    /// Delete a key access server, with its grants and keys
    async fn delete_key_access_server(&self, id: &str) -> Result<KeyAccessServer>;

    /// Create a new active key. There can only be one active key per algorithm
    async fn create_key(&self, request: &CreateKeyRequest) -> Result<KasKey>;

    async fn get_key(&self, id: &str) -> Result<KasKey>;

    /// Return a key given the key access server and the key id chosen by its operator
    async fn get_key_by_kas_key_id(&self, kas: &Identifier, key_id: &str) -> Result<KasKey>;

    async fn list_keys(&self, request: &ListKeysRequest) -> Result<ListResponse<KasKey>>;

    /// Update the metadata of a key
    async fn update_key(&self, request: &UpdateKeyRequest) -> Result<KasKey>;

    /// Replace an active key with a new key and move the entities mapped to the old key
    /// to the new one
    async fn rotate_key(&self, request: &RotateKeyRequest) -> Result<RotateKeyResponse>;

    async fn unsafe_delete_key(&self, request: &UnsafeDeleteKeyRequest) -> Result<KasKey>;

    /// Return the default key of the platform, if one was set
    async fn get_base_key(&self) -> Result<Option<SimpleKasKey>>;

    /// Make an active key with a private part the base key and return the previous one
    async fn set_base_key(&self, request: &SetBaseKeyRequest) -> Result<SetBaseKeyResponse>;

    /// List the keys mapped to namespaces, attributes or values, with their mappings
    async fn list_key_mappings(
        &self,
        request: &ListKeyMappingsRequest,
    ) -> Result<ListResponse<KeyMapping>>;
}
