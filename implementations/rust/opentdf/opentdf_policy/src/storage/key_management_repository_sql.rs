use crate::models::{
    CreateProviderConfigRequest, Identifier, KeyProviderConfig, ListProviderConfigsRequest,
    ListResponse, Metadata, MetadataMutable, UpdateProviderConfigRequest,
};
use crate::storage::{CountRow, KeyManagementRepository, PolicyDbClient};
use crate::validation::{check_not_empty, check_uuid, normalize_name};
use async_trait::async_trait;
use opentdf_db::{now_micros, BigInteger, Error, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use tracing::{info, warn};
use uuid::Uuid;

const PROVIDER_CONFIG_COLUMNS: &str =
    "pc.id, pc.name, pc.manager, pc.config, pc.labels, pc.created_at, pc.updated_at";

#[async_trait]
impl KeyManagementRepository for PolicyDbClient {
    async fn create_provider_config(
        &self,
        request: &CreateProviderConfigRequest,
    ) -> Result<KeyProviderConfig> {
        let name = normalize_name("name", &request.name)?;
        let manager = request.manager.trim();
        check_not_empty("manager", manager)?;
        self.configuration().check_key_manager(manager)?;
        let id = Uuid::new_v4().to_string();
        let now = now_micros();

        let mut transaction = self.begin().await?;
        sqlx::query(
            "INSERT INTO provider_configs (id, name, manager, config, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&id)
        .bind(&name)
        .bind(manager)
        .bind(serde_json::to_string(&request.config)?)
        .bind(MetadataMutable::labels_json(&request.metadata)?)
        .bind(now)
        .bind(now)
        .execute(&mut *transaction)
        .await
        .void()?;
        let provider_config = Self::fetch_provider_config(&mut transaction, &id).await?;
        transaction.commit().await?;
        info!(%name, %manager, "provider config created");
        Ok(provider_config)
    }

    async fn get_provider_config(&self, identifier: &Identifier) -> Result<KeyProviderConfig> {
        let mut connection = self.read_connection().await?;
        match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                Self::fetch_provider_config(&mut connection, id).await
            }
            Identifier::Name(name) => {
                let row: Option<ProviderConfigRow> = sqlx::query_as(&format!(
                    "SELECT {PROVIDER_CONFIG_COLUMNS} FROM provider_configs pc WHERE pc.name = $1"
                ))
                .bind(name.trim().to_lowercase())
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
                row.ok_or(Error::NotFound)?.provider_config()
            }
            _ => Err(Error::UnknownSelectIdentifier),
        }
    }

    async fn list_provider_configs(
        &self,
        request: &ListProviderConfigsRequest,
    ) -> Result<ListResponse<KeyProviderConfig>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let mut connection = self.read_connection().await?;
        let rows: Vec<ProviderConfigRow> = sqlx::query_as(&format!(
            "SELECT {PROVIDER_CONFIG_COLUMNS} FROM provider_configs pc
             ORDER BY pc.created_at LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let count: CountRow = sqlx::query_as("SELECT COUNT(*) AS total FROM provider_configs")
            .fetch_one(&mut *connection)
            .await
            .into_core()?;
        Ok(ListResponse {
            items: rows
                .into_iter()
                .map(|r| r.provider_config())
                .collect::<Result<Vec<_>>>()?,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn update_provider_config(
        &self,
        request: &UpdateProviderConfigRequest,
    ) -> Result<KeyProviderConfig> {
        check_uuid(&request.id)?;
        let name = request
            .name
            .as_ref()
            .map(|n| normalize_name("name", n))
            .transpose()?;
        if let Some(manager) = &request.manager {
            check_not_empty("manager", manager)?;
            self.configuration().check_key_manager(manager.trim())?;
        }

        let mut transaction = self.begin().await?;
        let current = Self::fetch_provider_config(&mut transaction, &request.id).await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata.labels.clone(),
            &request.metadata,
            request.metadata_update_behavior,
        );
        let config = request.config.as_ref().unwrap_or(&current.config);
        sqlx::query(
            "UPDATE provider_configs SET name = $1, manager = $2, config = $3, labels = $4,
             updated_at = $5 WHERE id = $6",
        )
        .bind(name.unwrap_or(current.name.clone()))
        .bind(
            request
                .manager
                .as_deref()
                .map(str::trim)
                .unwrap_or(&current.manager),
        )
        .bind(serde_json::to_string(config)?)
        .bind(serde_json::to_string(&labels)?)
        .bind(now_micros())
        .bind(&request.id)
        .execute(&mut *transaction)
        .await
        .void()?;
        let provider_config = Self::fetch_provider_config(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(provider_config)
    }

    async fn delete_provider_config(&self, id: &str) -> Result<KeyProviderConfig> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let provider_config = Self::fetch_provider_config(&mut transaction, id).await?;
        sqlx::query("DELETE FROM provider_configs WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        warn!(name = %provider_config.name, "provider config deleted");
        Ok(provider_config)
    }
}

impl PolicyDbClient {
    pub(crate) async fn fetch_provider_config(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<KeyProviderConfig> {
        let row: Option<ProviderConfigRow> = sqlx::query_as(&format!(
            "SELECT {PROVIDER_CONFIG_COLUMNS} FROM provider_configs pc WHERE pc.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *connection)
        .await
        .into_core()?;
        row.ok_or(Error::NotFound)?.provider_config()
    }
}

/// Low-level representation of a row in the provider_configs table
#[derive(FromRow)]
struct ProviderConfigRow {
    id: String,
    name: String,
    manager: String,
    config: String,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

impl ProviderConfigRow {
    fn provider_config(self) -> Result<KeyProviderConfig> {
        Ok(KeyProviderConfig {
            metadata: Metadata::from_row(&self.labels, self.created_at, self.updated_at)?,
            config: serde_json::from_str(&self.config)?,
            id: self.id,
            name: self.name,
            manager: self.manager,
        })
    }
}
