use crate::models::{GrantSubject, KeyAccessServerGrants};
use async_trait::async_trait;
use opentdf_db::Result;

/// This repository stores the edges between key access servers, or their keys, and the
/// namespaces, attributes and values they protect
#[async_trait]
pub trait GrantsRepository: Send + Sync + 'static {
    /// Grant a key access server to a namespace, an attribute or a value
    async fn assign_kas_grant(&self, kas_id: &str, subject: &GrantSubject) -> Result<()>;

    /// Remove a grant. Fails with NotFound if the grant does not exist
    async fn remove_kas_grant(&self, kas_id: &str, subject: &GrantSubject) -> Result<()>;

    /// Return the grants of a key access server given by id or uri, or the grants
    /// of all the key access servers when none is given
    async fn list_key_access_server_grants(
        &self,
        kas_id: Option<&str>,
        kas_uri: Option<&str>,
    ) -> Result<Vec<KeyAccessServerGrants>>;

    /// Return the grants of every key access server having at least one grant
    async fn list_all_grants(&self) -> Result<Vec<KeyAccessServerGrants>>;

    /// Map a key to a namespace, an attribute or a value
    async fn assign_public_key(&self, key_id: &str, subject: &GrantSubject) -> Result<()>;

    async fn remove_public_key(&self, key_id: &str, subject: &GrantSubject) -> Result<()>;
}
