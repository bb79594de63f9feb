use crate::fqn::{self, Fqn};
use crate::models::{
    CreateAttributeValueRequest, Identifier, ListAttributeValuesRequest, ListResponse, Metadata,
    MetadataMutable, UnsafeUpdateAttributeValueRequest, UpdateAttributeValueRequest, Value,
};
use crate::storage::{
    AttributeValuesRepository, FqnEntityType, FqnIndex, GrantSubjectType, PolicyDbClient,
};
use crate::validation::{check_uuid, normalize_value};
use async_trait::async_trait;
use opentdf_db::{now_micros, BigInteger, Boolean, Error, ErrorKind, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use tracing::{debug, warn};

const VALUE_SELECT: &str = "SELECT av.id, av.attribute_definition_id, av.value, av.active, av.labels,
       av.created_at, av.updated_at, ad.namespace_id, ad.name AS attribute_name, n.name AS namespace_name
FROM attribute_values av
JOIN attribute_definitions ad ON ad.id = av.attribute_definition_id
JOIN attribute_namespaces n ON n.id = ad.namespace_id";

#[async_trait]
impl AttributeValuesRepository for PolicyDbClient {
    async fn get_attribute_value(&self, identifier: &Identifier) -> Result<Value> {
        let mut connection = self.read_connection().await?;
        let id = match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                id.clone()
            }
            Identifier::Fqn(fqn) => {
                let parsed = fqn.parse::<Fqn>()?;
                if !parsed.is_value() {
                    return Err(Error::FqnMissingValue { fqn: fqn.clone() });
                }
                FqnIndex::lookup(&mut connection, &parsed.to_string(), FqnEntityType::Value)
                    .await?
            }
            _ => return Err(Error::UnknownSelectIdentifier),
        };
        Self::fetch_value(&mut connection, &id).await
    }

    async fn list_attribute_values(
        &self,
        request: &ListAttributeValuesRequest,
    ) -> Result<ListResponse<Value>> {
        check_uuid(&request.attribute_id)?;
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let condition = request
            .state
            .condition(&["n.active", "ad.active", "av.active"]);

        let mut connection = self.read_connection().await?;
        let attribute = Self::fetch_attribute_row(&mut connection, &request.attribute_id).await?;
        let values_order = attribute.values_order()?;
        let mut rows: Vec<ValueRow> = sqlx::query_as(&format!(
            "{VALUE_SELECT} WHERE av.attribute_definition_id = $1 AND {condition}"
        ))
        .bind(&request.attribute_id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;

        // values are paginated in the order of the attribute, not in creation order
        rows.sort_by_key(|r| {
            values_order
                .iter()
                .position(|id| id == &r.id)
                .unwrap_or(usize::MAX)
        });
        let total = rows.len() as i64;
        let items = rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|r| r.value())
            .collect::<Result<Vec<_>>>()?;
        Ok(ListResponse {
            items,
            pagination: Self::page_response(limit, offset, total),
        })
    }

    async fn create_attribute_value(
        &self,
        request: &CreateAttributeValueRequest,
    ) -> Result<Value> {
        check_uuid(&request.attribute_id)?;
        let value = normalize_value("value", &request.value)?;
        let labels = MetadataMutable::labels_json(&request.metadata)?;

        let mut transaction = self.begin().await?;
        let attribute =
            match Self::fetch_attribute_row(&mut transaction, &request.attribute_id).await {
                Err(e) if e.is(ErrorKind::NotFound) => {
                    return Err(Error::ForeignKeyViolation {
                        detail: Some(format!("attribute {} not found", request.attribute_id)),
                    })
                }
                other => other?,
            };
        let id = Self::insert_value(
            &mut transaction,
            &attribute.namespace_id,
            &attribute.namespace_name,
            &attribute.id,
            &attribute.name,
            &value,
            &labels,
        )
        .await?;
        let mut values_order = attribute.values_order()?;
        values_order.push(id.clone());
        Self::set_values_order(&mut transaction, &attribute.id, &values_order).await?;

        let created = Self::fetch_value(&mut transaction, &id).await?;
        transaction.commit().await?;
        debug!(fqn = %created.fqn, "attribute value created");
        Ok(created)
    }

    async fn update_attribute_value(
        &self,
        request: &UpdateAttributeValueRequest,
    ) -> Result<Value> {
        check_uuid(&request.id)?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_value_row(&mut transaction, &request.id).await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata()?.labels,
            &request.metadata,
            request.metadata_update_behavior,
        );
        sqlx::query("UPDATE attribute_values SET labels = $1, updated_at = $2 WHERE id = $3")
            .bind(serde_json::to_string(&labels)?)
            .bind(now_micros())
            .bind(&request.id)
            .execute(&mut *transaction)
            .await
            .void()?;
        let value = Self::fetch_value(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(value)
    }

    async fn deactivate_attribute_value(&self, id: &str) -> Result<Value> {
        self.set_value_active(id, false).await
    }

    async fn unsafe_update_attribute_value(
        &self,
        request: &UnsafeUpdateAttributeValueRequest,
    ) -> Result<Value> {
        check_uuid(&request.id)?;
        let value = normalize_value("value", &request.value)?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_value_row(&mut transaction, &request.id).await?;
        Self::check_current_fqn(&current.fqn(), &request.current_fqn)?;

        sqlx::query("UPDATE attribute_values SET value = $1, updated_at = $2 WHERE id = $3")
            .bind(&value)
            .bind(now_micros())
            .bind(&request.id)
            .execute(&mut *transaction)
            .await
            .void()?;
        FqnIndex::index(
            &mut transaction,
            &current.namespace_id,
            FqnEntityType::Value,
            &request.id,
            &fqn::value_fqn(&current.namespace_name, &current.attribute_name, &value),
        )
        .await?;
        let updated = Self::fetch_value(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        warn!(from = %current.fqn(), to = %updated.fqn, "attribute value changed");
        Ok(updated)
    }

    async fn unsafe_reactivate_attribute_value(&self, id: &str) -> Result<Value> {
        self.set_value_active(id, true).await
    }

    async fn unsafe_delete_attribute_value(&self, id: &str, fqn: &str) -> Result<Value> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let value = Self::fetch_value(&mut transaction, id).await?;
        Self::check_current_fqn(&value.fqn, fqn)?;
        let attribute = Self::fetch_attribute_row(&mut transaction, &value.attribute_id).await?;

        let values_order: Vec<String> = attribute
            .values_order()?
            .into_iter()
            .filter(|v| v != id)
            .collect();
        Self::set_values_order(&mut transaction, &attribute.id, &values_order).await?;
        sqlx::query("DELETE FROM fqn_index WHERE entity_id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        sqlx::query("DELETE FROM attribute_values WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        warn!(fqn = %value.fqn, "attribute value deleted");
        Ok(value)
    }
}

impl PolicyDbClient {
    /// Return a value with its grants and keys
    pub(crate) async fn fetch_value(connection: &mut AnyConnection, id: &str) -> Result<Value> {
        let mut value = Self::fetch_value_row(connection, id).await?.value()?;
        value.grants = Self::fetch_grants(connection, GrantSubjectType::Value, id).await?;
        value.kas_keys = Self::fetch_mapped_keys(connection, GrantSubjectType::Value, id).await?;
        Ok(value)
    }

    pub(crate) async fn fetch_value_row(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<ValueRow> {
        let row: Option<ValueRow> = sqlx::query_as(&format!("{VALUE_SELECT} WHERE av.id = $1"))
            .bind(id)
            .fetch_optional(&mut *connection)
            .await
            .into_core()?;
        row.ok_or(Error::NotFound)
    }

    /// Return the values of an attribute, without grants, in no specific order
    pub(crate) async fn fetch_values_of_attribute(
        connection: &mut AnyConnection,
        attribute_id: &str,
    ) -> Result<Vec<Value>> {
        let rows: Vec<ValueRow> = sqlx::query_as(&format!(
            "{VALUE_SELECT} WHERE av.attribute_definition_id = $1"
        ))
        .bind(attribute_id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        rows.into_iter().map(|r| r.value()).collect()
    }

    async fn set_value_active(&self, id: &str, active: bool) -> Result<Value> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let result = sqlx::query("UPDATE attribute_values SET active = $1, updated_at = $2 WHERE id = $3")
            .bind(active)
            .bind(now_micros())
            .bind(id)
            .execute(&mut *transaction)
            .await
            .into_core()?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        let value = Self::fetch_value(&mut transaction, id).await?;
        transaction.commit().await?;
        debug!(fqn = %value.fqn, active, "attribute value state changed");
        Ok(value)
    }
}

/// Low-level representation of a row in the attribute_values table,
/// with the names needed to compute its FQN
#[derive(FromRow)]
pub(crate) struct ValueRow {
    pub(crate) id: String,
    attribute_definition_id: String,
    pub(crate) value: String,
    active: Boolean,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
    pub(crate) namespace_id: String,
    pub(crate) attribute_name: String,
    pub(crate) namespace_name: String,
}

impl ValueRow {
    pub(crate) fn fqn(&self) -> String {
        fqn::value_fqn(&self.namespace_name, &self.attribute_name, &self.value)
    }

    pub(crate) fn metadata(&self) -> Result<Metadata> {
        Metadata::from_row(&self.labels, self.created_at, self.updated_at)
    }

    pub(crate) fn value(&self) -> Result<Value> {
        Ok(Value {
            id: self.id.clone(),
            attribute_id: self.attribute_definition_id.clone(),
            value: self.value.clone(),
            fqn: self.fqn(),
            active: self.active.to_bool(),
            grants: vec![],
            kas_keys: vec![],
            metadata: self.metadata()?,
        })
    }
}
