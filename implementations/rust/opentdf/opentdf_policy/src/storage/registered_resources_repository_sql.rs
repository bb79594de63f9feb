use crate::fqn;
use crate::models::{
    ActionAttributeValue, ActionAttributeValueRequest, CreateRegisteredResourceRequest,
    CreateRegisteredResourceValueRequest, Identifier, ListRegisteredResourceValuesRequest,
    ListRegisteredResourcesRequest, ListResponse, Metadata, MetadataMutable, RegisteredResource,
    RegisteredResourceValue, UpdateRegisteredResourceRequest, UpdateRegisteredResourceValueRequest,
};
use crate::storage::{CountRow, PolicyDbClient, RegisteredResourcesRepository};
use crate::validation::{check_uuid, normalize_name, normalize_value};
use async_trait::async_trait;
use opentdf_db::{now_micros, BigInteger, Error, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const RESOURCE_SELECT: &str =
    "SELECT r.id, r.name, r.labels, r.created_at, r.updated_at FROM registered_resources r";

const RESOURCE_VALUE_SELECT: &str = "SELECT rv.id, rv.registered_resource_id, rv.value, r.name AS resource_name,
rv.labels, rv.created_at, rv.updated_at
FROM registered_resource_values rv
JOIN registered_resources r ON r.id = rv.registered_resource_id";

#[async_trait]
impl RegisteredResourcesRepository for PolicyDbClient {
    async fn create_registered_resource(
        &self,
        request: &CreateRegisteredResourceRequest,
    ) -> Result<RegisteredResource> {
        let name = normalize_name("name", &request.name)?;
        let values = request
            .values
            .iter()
            .map(|v| normalize_value("value", v))
            .collect::<Result<Vec<_>>>()?;
        let id = Uuid::new_v4().to_string();
        let now = now_micros();

        let mut transaction = self.begin().await?;
        sqlx::query(
            "INSERT INTO registered_resources (id, name, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&id)
        .bind(&name)
        .bind(MetadataMutable::labels_json(&request.metadata)?)
        .bind(now)
        .bind(now)
        .execute(&mut *transaction)
        .await
        .void()?;
        for value in values {
            Self::insert_resource_value(&mut transaction, &id, &value, &[], &None).await?;
        }
        let resource = Self::fetch_registered_resource(&mut transaction, &id).await?;
        transaction.commit().await?;
        debug!(fqn = %resource.fqn, "registered resource created");
        Ok(resource)
    }

    async fn get_registered_resource(
        &self,
        identifier: &Identifier,
    ) -> Result<RegisteredResource> {
        let mut connection = self.read_connection().await?;
        let id = Self::resolve_registered_resource_id(&mut connection, identifier).await?;
        Self::fetch_registered_resource(&mut connection, &id).await
    }

    async fn list_registered_resources(
        &self,
        request: &ListRegisteredResourcesRequest,
    ) -> Result<ListResponse<RegisteredResource>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let mut connection = self.read_connection().await?;
        let rows: Vec<ResourceRow> = sqlx::query_as(&format!(
            "{RESOURCE_SELECT} ORDER BY r.created_at LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let count: CountRow =
            sqlx::query_as("SELECT COUNT(*) AS total FROM registered_resources")
                .fetch_one(&mut *connection)
                .await
                .into_core()?;

        let mut items = vec![];
        for row in rows {
            items.push(Self::registered_resource_from_row(&mut connection, row).await?);
        }
        Ok(ListResponse {
            items,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn update_registered_resource(
        &self,
        request: &UpdateRegisteredResourceRequest,
    ) -> Result<RegisteredResource> {
        check_uuid(&request.id)?;
        let name = request
            .name
            .as_ref()
            .map(|n| normalize_name("name", n))
            .transpose()?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_registered_resource(&mut transaction, &request.id).await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata.labels.clone(),
            &request.metadata,
            request.metadata_update_behavior,
        );
        sqlx::query(
            "UPDATE registered_resources SET name = $1, labels = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(name.unwrap_or(current.name.clone()))
        .bind(serde_json::to_string(&labels)?)
        .bind(now_micros())
        .bind(&request.id)
        .execute(&mut *transaction)
        .await
        .void()?;
        let resource = Self::fetch_registered_resource(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        if resource.fqn != current.fqn {
            debug!(from = %current.fqn, to = %resource.fqn, "registered resource renamed");
        }
        Ok(resource)
    }

    async fn delete_registered_resource(&self, id: &str) -> Result<RegisteredResource> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let resource = Self::fetch_registered_resource(&mut transaction, id).await?;
        sqlx::query("DELETE FROM registered_resources WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        debug!(fqn = %resource.fqn, "registered resource deleted");
        Ok(resource)
    }

    async fn create_registered_resource_value(
        &self,
        request: &CreateRegisteredResourceValueRequest,
    ) -> Result<RegisteredResourceValue> {
        check_uuid(&request.resource_id)?;
        let value = normalize_value("value", &request.value)?;
        let mut transaction = self.begin().await?;
        // fails with NotFound for an unknown resource
        Self::fetch_resource_row(&mut transaction, &request.resource_id).await?;
        let id = Self::insert_resource_value(
            &mut transaction,
            &request.resource_id,
            &value,
            &request.action_attribute_values,
            &request.metadata,
        )
        .await?;
        let resource_value = Self::fetch_registered_resource_value(&mut transaction, &id).await?;
        transaction.commit().await?;
        debug!(fqn = %resource_value.fqn, "registered resource value created");
        Ok(resource_value)
    }

    async fn get_registered_resource_value(
        &self,
        identifier: &Identifier,
    ) -> Result<RegisteredResourceValue> {
        let mut connection = self.read_connection().await?;
        let id = Self::resolve_registered_resource_value_id(&mut connection, identifier).await?;
        Self::fetch_registered_resource_value(&mut connection, &id).await
    }

    async fn get_registered_resource_values_by_fqns(
        &self,
        fqns: &[String],
    ) -> Result<BTreeMap<String, RegisteredResourceValue>> {
        if fqns.is_empty() {
            return Err(Error::MissingValue { field: "fqns" });
        }
        let mut connection = self.read_connection().await?;
        let mut result = BTreeMap::new();
        for fqn in fqns {
            let id = Self::resolve_registered_resource_value_id(
                &mut connection,
                &Identifier::fqn(fqn),
            )
            .await?;
            let value = Self::fetch_registered_resource_value(&mut connection, &id).await?;
            result.insert(value.fqn.clone(), value);
        }
        Ok(result)
    }

    async fn list_registered_resource_values(
        &self,
        request: &ListRegisteredResourceValuesRequest,
    ) -> Result<ListResponse<RegisteredResourceValue>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        if let Some(resource_id) = &request.resource_id {
            check_uuid(resource_id)?;
        }
        let (condition, count_condition) = match &request.resource_id {
            Some(_) => (
                "rv.registered_resource_id = $3",
                "rv.registered_resource_id = $1",
            ),
            None => ("1 = 1", "1 = 1"),
        };
        let mut connection = self.read_connection().await?;

        let sql = format!(
            "{RESOURCE_VALUE_SELECT} WHERE {condition} ORDER BY rv.created_at LIMIT $1 OFFSET $2"
        );
        let mut query = sqlx::query_as::<_, ResourceValueRow>(&sql)
            .bind(limit)
            .bind(offset);
        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM registered_resource_values rv WHERE {count_condition}"
        );
        let mut count_query = sqlx::query_as::<_, CountRow>(&count_sql);
        if let Some(resource_id) = &request.resource_id {
            query = query.bind(resource_id);
            count_query = count_query.bind(resource_id);
        }
        let rows = query.fetch_all(&mut *connection).await.into_core()?;
        let count = count_query.fetch_one(&mut *connection).await.into_core()?;

        let mut items = vec![];
        for row in rows {
            items.push(Self::resource_value_from_row(&mut connection, row).await?);
        }
        Ok(ListResponse {
            items,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn update_registered_resource_value(
        &self,
        request: &UpdateRegisteredResourceValueRequest,
    ) -> Result<RegisteredResourceValue> {
        check_uuid(&request.id)?;
        let value = request
            .value
            .as_ref()
            .map(|v| normalize_value("value", v))
            .transpose()?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_registered_resource_value(&mut transaction, &request.id).await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata.labels.clone(),
            &request.metadata,
            request.metadata_update_behavior,
        );
        sqlx::query(
            "UPDATE registered_resource_values SET value = $1, labels = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(value.unwrap_or(current.value.clone()))
        .bind(serde_json::to_string(&labels)?)
        .bind(now_micros())
        .bind(&request.id)
        .execute(&mut *transaction)
        .await
        .void()?;
        if let Some(action_attribute_values) = &request.action_attribute_values {
            sqlx::query(
                "DELETE FROM registered_resource_action_attribute_values
                 WHERE registered_resource_value_id = $1",
            )
            .bind(&request.id)
            .execute(&mut *transaction)
            .await
            .void()?;
            Self::insert_action_attribute_values(
                &mut transaction,
                &request.id,
                action_attribute_values,
            )
            .await?;
        }
        let resource_value =
            Self::fetch_registered_resource_value(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(resource_value)
    }

    async fn delete_registered_resource_value(
        &self,
        id: &str,
    ) -> Result<RegisteredResourceValue> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let resource_value = Self::fetch_registered_resource_value(&mut transaction, id).await?;
        sqlx::query("DELETE FROM registered_resource_values WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        debug!(fqn = %resource_value.fqn, "registered resource value deleted");
        Ok(resource_value)
    }
}

impl PolicyDbClient {
    async fn fetch_resource_row(connection: &mut AnyConnection, id: &str) -> Result<ResourceRow> {
        let row: Option<ResourceRow> = sqlx::query_as(&format!("{RESOURCE_SELECT} WHERE r.id = $1"))
            .bind(id)
            .fetch_optional(&mut *connection)
            .await
            .into_core()?;
        row.ok_or(Error::NotFound)
    }

    async fn fetch_registered_resource(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<RegisteredResource> {
        let row = Self::fetch_resource_row(connection, id).await?;
        Self::registered_resource_from_row(connection, row).await
    }

    async fn registered_resource_from_row(
        connection: &mut AnyConnection,
        row: ResourceRow,
    ) -> Result<RegisteredResource> {
        let rows: Vec<ResourceValueRow> = sqlx::query_as(&format!(
            "{RESOURCE_VALUE_SELECT} WHERE rv.registered_resource_id = $1 ORDER BY rv.created_at"
        ))
        .bind(&row.id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let mut values = vec![];
        for value_row in rows {
            values.push(Self::resource_value_from_row(connection, value_row).await?);
        }
        Ok(RegisteredResource {
            fqn: fqn::registered_resource_fqn(&row.name),
            metadata: Metadata::from_row(&row.labels, row.created_at, row.updated_at)?,
            id: row.id,
            name: row.name,
            values,
        })
    }

    async fn fetch_registered_resource_value(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<RegisteredResourceValue> {
        let row: Option<ResourceValueRow> =
            sqlx::query_as(&format!("{RESOURCE_VALUE_SELECT} WHERE rv.id = $1"))
                .bind(id)
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
        Self::resource_value_from_row(connection, row.ok_or(Error::NotFound)?).await
    }

    async fn resource_value_from_row(
        connection: &mut AnyConnection,
        row: ResourceValueRow,
    ) -> Result<RegisteredResourceValue> {
        let links: Vec<ActionAttributeValueRow> = sqlx::query_as(
            "SELECT id, action_id, attribute_value_id FROM registered_resource_action_attribute_values
             WHERE registered_resource_value_id = $1 ORDER BY created_at",
        )
        .bind(&row.id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let mut action_attribute_values = vec![];
        for link in links {
            let action = Self::fetch_action(connection, &link.action_id).await?;
            let attribute_value = Self::fetch_value_row(connection, &link.attribute_value_id).await?;
            action_attribute_values.push(ActionAttributeValue {
                id: link.id,
                action,
                attribute_value_fqn: attribute_value.fqn(),
                attribute_value_id: link.attribute_value_id,
            });
        }
        Ok(RegisteredResourceValue {
            fqn: fqn::registered_resource_value_fqn(&row.resource_name, &row.value),
            metadata: Metadata::from_row(&row.labels, row.created_at, row.updated_at)?,
            id: row.id,
            resource_id: row.registered_resource_id,
            value: row.value,
            action_attribute_values,
        })
    }

    /// Return the id of a resource given by id, name or FQN
    async fn resolve_registered_resource_id(
        connection: &mut AnyConnection,
        identifier: &Identifier,
    ) -> Result<String> {
        let name = match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                return Ok(id.clone());
            }
            Identifier::Name(name) => name.trim().to_lowercase(),
            Identifier::Fqn(fqn) => match fqn::parse_registered_resource_fqn(fqn)? {
                (name, None) => name,
                (_, Some(_)) => {
                    return Err(Error::SelectIdentifierInvalid {
                        identifier: fqn.clone(),
                    })
                }
            },
            _ => return Err(Error::UnknownSelectIdentifier),
        };
        let row: Option<IdRow> = sqlx::query_as("SELECT id FROM registered_resources WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *connection)
            .await
            .into_core()?;
        row.map(|r| r.id).ok_or(Error::NotFound)
    }

    /// Return the id of a resource value given by id or FQN
    async fn resolve_registered_resource_value_id(
        connection: &mut AnyConnection,
        identifier: &Identifier,
    ) -> Result<String> {
        let (name, value) = match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                return Ok(id.clone());
            }
            Identifier::Fqn(fqn) => match fqn::parse_registered_resource_fqn(fqn)? {
                (name, Some(value)) => (name, value),
                (_, None) => {
                    return Err(Error::SelectIdentifierInvalid {
                        identifier: fqn.clone(),
                    })
                }
            },
            _ => return Err(Error::UnknownSelectIdentifier),
        };
        let row: Option<IdRow> = sqlx::query_as(
            "SELECT rv.id FROM registered_resource_values rv
             JOIN registered_resources r ON r.id = rv.registered_resource_id
             WHERE r.name = $1 AND rv.value = $2",
        )
        .bind(name)
        .bind(value)
        .fetch_optional(&mut *connection)
        .await
        .into_core()?;
        row.map(|r| r.id).ok_or(Error::NotFound)
    }

    /// Insert a resource value with its actions and attribute values and return its id
    async fn insert_resource_value(
        connection: &mut AnyConnection,
        resource_id: &str,
        value: &str,
        action_attribute_values: &[ActionAttributeValueRequest],
        metadata: &Option<MetadataMutable>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = now_micros();
        sqlx::query(
            "INSERT INTO registered_resource_values (id, registered_resource_id, value, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(resource_id)
        .bind(value)
        .bind(MetadataMutable::labels_json(metadata)?)
        .bind(now)
        .bind(now)
        .execute(&mut *connection)
        .await
        .void()?;
        Self::insert_action_attribute_values(connection, &id, action_attribute_values).await?;
        Ok(id)
    }

    /// Attach actions on attribute values to a resource value.
    /// Unknown actions or attribute values fail with `NotFound`
    async fn insert_action_attribute_values(
        connection: &mut AnyConnection,
        resource_value_id: &str,
        action_attribute_values: &[ActionAttributeValueRequest],
    ) -> Result<()> {
        for request in action_attribute_values {
            let action = Self::resolve_action(connection, &request.action).await?;
            let attribute_value_id =
                Self::resolve_attribute_value_id(connection, &request.attribute_value).await?;
            let attribute_value = Self::fetch_value_row(connection, &attribute_value_id).await?;
            sqlx::query(
                "INSERT INTO registered_resource_action_attribute_values
                 (id, registered_resource_value_id, action_id, attribute_value_id, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(resource_value_id)
            .bind(&action.id)
            .bind(&attribute_value.id)
            .bind(now_micros())
            .execute(&mut *connection)
            .await
            .void()?;
        }
        Ok(())
    }
}

#[derive(FromRow)]
struct IdRow {
    id: String,
}

/// Low-level representation of a row in the registered_resources table
#[derive(FromRow)]
struct ResourceRow {
    id: String,
    name: String,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

/// Low-level representation of a row in the registered_resource_values table,
/// with the name of its resource
#[derive(FromRow)]
struct ResourceValueRow {
    id: String,
    registered_resource_id: String,
    value: String,
    resource_name: String,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

#[derive(FromRow)]
struct ActionAttributeValueRow {
    id: String,
    action_id: String,
    attribute_value_id: String,
}
