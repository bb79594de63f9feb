mod actions_repository;
mod actions_repository_sql;
mod attribute_values_repository;
mod attribute_values_repository_sql;
mod attributes_repository;
mod attributes_repository_sql;
mod fqn_index;
mod grants_repository;
mod grants_repository_sql;
mod kas_registry_repository;
mod kas_registry_repository_sql;
mod key_management_repository;
mod key_management_repository_sql;
/// Embedded SQL migrations of the policy database
pub mod migrations;
mod namespaces_repository;
mod namespaces_repository_sql;
mod obligations_repository;
mod obligations_repository_sql;
mod policy_db_client;
mod registered_resources_repository;
mod registered_resources_repository_sql;
mod resource_mappings_repository;
mod resource_mappings_repository_sql;
mod subject_mappings_repository;
mod subject_mappings_repository_sql;

pub use actions_repository::*;
pub use attribute_values_repository::*;
pub use attributes_repository::*;
pub use grants_repository::*;
pub use kas_registry_repository::*;
pub use key_management_repository::*;
pub use migrations::*;
pub use namespaces_repository::*;
pub use obligations_repository::*;
pub use policy_db_client::*;
pub use registered_resources_repository::*;
pub use resource_mappings_repository::*;
pub use subject_mappings_repository::*;

pub(crate) use fqn_index::*;
pub(crate) use grants_repository_sql::*;
pub(crate) use kas_registry_repository_sql::*;
