use crate::fqn::{self, Fqn};
use crate::models::{
    AddObligationTriggerRequest, CreateObligationRequest, CreateObligationValueRequest, Identifier,
    ListObligationTriggersRequest, ListObligationsRequest, ListResponse, Metadata,
    MetadataMutable, Obligation, ObligationTrigger, ObligationValue, UpdateObligationRequest,
    UpdateObligationValueRequest,
};
use crate::storage::{
    CountRow, FqnEntityType, FqnIndex, ObligationsRepository, PolicyDbClient,
};
use crate::validation::{check_uuid, normalize_name, normalize_value};
use async_trait::async_trait;
use opentdf_db::{now_micros, BigInteger, Error, ErrorKind, FromSqlxError, Nullable, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

const OBLIGATION_SELECT: &str = "SELECT od.id, od.namespace_id, od.name, od.labels, od.created_at, od.updated_at
FROM obligation_definitions od";

const OBLIGATION_VALUE_SELECT: &str = "SELECT ov.id, ov.obligation_definition_id, ov.value, od.name AS obligation_name,
od.namespace_id, n.name AS namespace_name, ov.labels, ov.created_at, ov.updated_at
FROM obligation_values ov
JOIN obligation_definitions od ON od.id = ov.obligation_definition_id
JOIN attribute_namespaces n ON n.id = od.namespace_id";

const TRIGGER_COLUMNS: &str = "t.id, t.obligation_value_id, t.attribute_value_id, t.action_id, t.client_id, t.labels,
t.created_at, t.updated_at";

#[async_trait]
impl ObligationsRepository for PolicyDbClient {
    async fn create_obligation(&self, request: &CreateObligationRequest) -> Result<Obligation> {
        let name = normalize_name("name", &request.name)?;
        let values = request
            .values
            .iter()
            .map(|v| normalize_value("value", v))
            .collect::<Result<Vec<_>>>()?;
        let id = Uuid::new_v4().to_string();
        let now = now_micros();

        let mut transaction = self.begin().await?;
        let namespace_id = Self::resolve_namespace_id(&mut transaction, &request.namespace)
            .await
            .map_err(|e| Self::missing_reference(e, "namespace", &format!("{:?}", request.namespace)))?;
        let namespace = Self::fetch_namespace_row(&mut transaction, &namespace_id).await?;
        sqlx::query(
            "INSERT INTO obligation_definitions (id, namespace_id, name, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(&namespace.id)
        .bind(&name)
        .bind(MetadataMutable::labels_json(&request.metadata)?)
        .bind(now)
        .bind(now)
        .execute(&mut *transaction)
        .await
        .void()?;
        FqnIndex::index(
            &mut transaction,
            &namespace.id,
            FqnEntityType::Obligation,
            &id,
            &fqn::obligation_fqn(&namespace.name, &name),
        )
        .await?;
        for value in values {
            Self::insert_obligation_value(
                &mut transaction,
                &namespace.id,
                &namespace.name,
                &id,
                &name,
                &value,
                &None,
            )
            .await?;
        }
        let obligation = Self::fetch_obligation(&mut transaction, &id).await?;
        transaction.commit().await?;
        debug!(fqn = %obligation.fqn, "obligation created");
        Ok(obligation)
    }

    async fn get_obligation(&self, identifier: &Identifier) -> Result<Obligation> {
        let mut connection = self.read_connection().await?;
        let id = Self::resolve_obligation_id(&mut connection, identifier).await?;
        Self::fetch_obligation(&mut connection, &id).await
    }

    async fn list_obligations(
        &self,
        request: &ListObligationsRequest,
    ) -> Result<ListResponse<Obligation>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let mut connection = self.read_connection().await?;
        let namespace_id = Self::optional_namespace_id(&mut connection, &request.namespace).await?;
        let (condition, count_condition) = match namespace_id {
            Some(_) => ("od.namespace_id = $3", "od.namespace_id = $1"),
            None => ("1 = 1", "1 = 1"),
        };

        let sql = format!(
            "{OBLIGATION_SELECT} WHERE {condition} ORDER BY od.created_at DESC LIMIT $1 OFFSET $2"
        );
        let mut query = sqlx::query_as::<_, ObligationRow>(&sql)
            .bind(limit)
            .bind(offset);
        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM obligation_definitions od WHERE {count_condition}"
        );
        let mut count_query = sqlx::query_as::<_, CountRow>(&count_sql);
        if let Some(namespace_id) = &namespace_id {
            query = query.bind(namespace_id);
            count_query = count_query.bind(namespace_id);
        }
        let rows = query.fetch_all(&mut *connection).await.into_core()?;
        let count = count_query.fetch_one(&mut *connection).await.into_core()?;

        let mut items = vec![];
        for row in rows {
            items.push(Self::obligation_from_row(&mut connection, row).await?);
        }
        Ok(ListResponse {
            items,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn update_obligation(&self, request: &UpdateObligationRequest) -> Result<Obligation> {
        check_uuid(&request.id)?;
        let name = request
            .name
            .as_ref()
            .map(|n| normalize_name("name", n))
            .transpose()?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_obligation(&mut transaction, &request.id).await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata.labels.clone(),
            &request.metadata,
            request.metadata_update_behavior,
        );
        let renamed = name.as_ref().is_some_and(|n| *n != current.name);
        sqlx::query(
            "UPDATE obligation_definitions SET name = $1, labels = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(name.unwrap_or(current.name.clone()))
        .bind(serde_json::to_string(&labels)?)
        .bind(now_micros())
        .bind(&request.id)
        .execute(&mut *transaction)
        .await
        .void()?;
        if renamed {
            FqnIndex::reindex_namespace(&mut transaction, &current.namespace.id).await?;
        }
        let obligation = Self::fetch_obligation(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        if renamed {
            debug!(from = %current.fqn, to = %obligation.fqn, "obligation renamed");
        }
        Ok(obligation)
    }

    async fn delete_obligation(&self, identifier: &Identifier) -> Result<Obligation> {
        let mut transaction = self.begin().await?;
        let id = Self::resolve_obligation_id(&mut transaction, identifier).await?;
        let obligation = Self::fetch_obligation(&mut transaction, &id).await?;
        sqlx::query(
            "DELETE FROM fqn_index WHERE entity_id = $1
             OR entity_id IN (SELECT id FROM obligation_values WHERE obligation_definition_id = $1)",
        )
        .bind(&id)
        .execute(&mut *transaction)
        .await
        .void()?;
        sqlx::query("DELETE FROM obligation_definitions WHERE id = $1")
            .bind(&id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        debug!(fqn = %obligation.fqn, "obligation deleted");
        Ok(obligation)
    }

    async fn get_obligations_by_fqns(
        &self,
        fqns: &[String],
    ) -> Result<BTreeMap<String, Obligation>> {
        let fqns = Self::parse_fqns(fqns, |f| matches!(f, Fqn::Obligation { .. }))?;
        let mut connection = self.read_connection().await?;
        let mut result = BTreeMap::new();
        for fqn in fqns {
            let id = FqnIndex::lookup(&mut connection, &fqn, FqnEntityType::Obligation).await?;
            let obligation = Self::fetch_obligation(&mut connection, &id).await?;
            result.insert(fqn, obligation);
        }
        Ok(result)
    }

    async fn create_obligation_value(
        &self,
        request: &CreateObligationValueRequest,
    ) -> Result<ObligationValue> {
        let value = normalize_value("value", &request.value)?;
        let mut transaction = self.begin().await?;
        let obligation_id = Self::resolve_obligation_id(&mut transaction, &request.obligation)
            .await
            .map_err(|e| Self::missing_reference(e, "obligation", &format!("{:?}", request.obligation)))?;
        let obligation: ObligationRow =
            sqlx::query_as(&format!("{OBLIGATION_SELECT} WHERE od.id = $1"))
                .bind(&obligation_id)
                .fetch_optional(&mut *transaction)
                .await
                .into_core()?
                .ok_or(Error::NotFound)?;
        let namespace = Self::fetch_namespace_row(&mut transaction, &obligation.namespace_id).await?;
        let id = Self::insert_obligation_value(
            &mut transaction,
            &namespace.id,
            &namespace.name,
            &obligation.id,
            &obligation.name,
            &value,
            &request.metadata,
        )
        .await?;
        let obligation_value = Self::fetch_obligation_value(&mut transaction, &id).await?;
        transaction.commit().await?;
        Ok(obligation_value)
    }

    async fn get_obligation_value(&self, identifier: &Identifier) -> Result<ObligationValue> {
        let mut connection = self.read_connection().await?;
        let id = Self::resolve_obligation_value_id(&mut connection, identifier).await?;
        Self::fetch_obligation_value(&mut connection, &id).await
    }

    async fn update_obligation_value(
        &self,
        request: &UpdateObligationValueRequest,
    ) -> Result<ObligationValue> {
        check_uuid(&request.id)?;
        let value = request
            .value
            .as_ref()
            .map(|v| normalize_value("value", v))
            .transpose()?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_obligation_value_row(&mut transaction, &request.id).await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata()?.labels,
            &request.metadata,
            request.metadata_update_behavior,
        );
        let value = value.unwrap_or(current.value.clone());
        sqlx::query("UPDATE obligation_values SET value = $1, labels = $2, updated_at = $3 WHERE id = $4")
            .bind(&value)
            .bind(serde_json::to_string(&labels)?)
            .bind(now_micros())
            .bind(&request.id)
            .execute(&mut *transaction)
            .await
            .void()?;
        FqnIndex::index(
            &mut transaction,
            &current.namespace_id,
            FqnEntityType::ObligationValue,
            &request.id,
            &fqn::obligation_value_fqn(&current.namespace_name, &current.obligation_name, &value),
        )
        .await?;
        let obligation_value = Self::fetch_obligation_value(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(obligation_value)
    }

    async fn delete_obligation_value(&self, identifier: &Identifier) -> Result<ObligationValue> {
        let mut transaction = self.begin().await?;
        let id = Self::resolve_obligation_value_id(&mut transaction, identifier).await?;
        let obligation_value = Self::fetch_obligation_value(&mut transaction, &id).await?;
        sqlx::query("DELETE FROM fqn_index WHERE entity_id = $1")
            .bind(&id)
            .execute(&mut *transaction)
            .await
            .void()?;
        sqlx::query("DELETE FROM obligation_values WHERE id = $1")
            .bind(&id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        Ok(obligation_value)
    }

    async fn get_obligation_values_by_fqns(
        &self,
        fqns: &[String],
    ) -> Result<BTreeMap<String, ObligationValue>> {
        let fqns = Self::parse_fqns(fqns, |f| matches!(f, Fqn::ObligationValue { .. }))?;
        let mut connection = self.read_connection().await?;
        let mut result = BTreeMap::new();
        for fqn in fqns {
            let id =
                FqnIndex::lookup(&mut connection, &fqn, FqnEntityType::ObligationValue).await?;
            let value = Self::fetch_obligation_value(&mut connection, &id).await?;
            result.insert(fqn, value);
        }
        Ok(result)
    }

    async fn add_obligation_trigger(
        &self,
        request: &AddObligationTriggerRequest,
    ) -> Result<ObligationTrigger> {
        let mut transaction = self.begin().await?;
        let obligation_value_id =
            Self::resolve_obligation_value_id(&mut transaction, &request.obligation_value)
                .await
                .map_err(Self::invalid_trigger_parameter)?;
        let obligation_value =
            Self::fetch_obligation_value_row(&mut transaction, &obligation_value_id)
                .await
                .map_err(Self::invalid_trigger_parameter)?;
        let attribute_value_id =
            Self::resolve_attribute_value_id(&mut transaction, &request.attribute_value)
                .await
                .map_err(Self::invalid_trigger_parameter)?;
        let attribute_value = Self::fetch_value_row(&mut transaction, &attribute_value_id)
            .await
            .map_err(Self::invalid_trigger_parameter)?;
        let action = Self::resolve_action(&mut transaction, &request.action)
            .await
            .map_err(Self::invalid_trigger_parameter)?;
        if obligation_value.namespace_id != attribute_value.namespace_id {
            return Err(Error::NamespaceMismatch);
        }

        let id = Uuid::new_v4().to_string();
        let now = now_micros();
        let client_id = request
            .client_id
            .as_ref()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        sqlx::query(
            "INSERT INTO obligation_triggers (id, obligation_value_id, attribute_value_id, action_id, client_id,
             labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&id)
        .bind(&obligation_value.id)
        .bind(&attribute_value.id)
        .bind(&action.id)
        .bind(client_id)
        .bind(MetadataMutable::labels_json(&request.metadata)?)
        .bind(now)
        .bind(now)
        .execute(&mut *transaction)
        .await
        .void()?;
        let trigger = Self::fetch_trigger(&mut transaction, &id).await?;
        transaction.commit().await?;
        debug!(
            obligation_value = %trigger.obligation_value_fqn,
            attribute_value = %trigger.attribute_value_fqn,
            action = %trigger.action.name,
            "obligation trigger added"
        );
        Ok(trigger)
    }

    async fn remove_obligation_trigger(&self, id: &str) -> Result<ObligationTrigger> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let trigger = Self::fetch_trigger(&mut transaction, id).await?;
        sqlx::query("DELETE FROM obligation_triggers WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        Ok(trigger)
    }

    async fn list_obligation_triggers(
        &self,
        request: &ListObligationTriggersRequest,
    ) -> Result<ListResponse<ObligationTrigger>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let mut connection = self.read_connection().await?;
        let namespace_id = Self::optional_namespace_id(&mut connection, &request.namespace).await?;
        let (condition, count_condition) = match namespace_id {
            Some(_) => ("od.namespace_id = $3", "od.namespace_id = $1"),
            None => ("1 = 1", "1 = 1"),
        };
        let from = "FROM obligation_triggers t
             JOIN obligation_values ov ON ov.id = t.obligation_value_id
             JOIN obligation_definitions od ON od.id = ov.obligation_definition_id";

        let sql = format!(
            "SELECT {TRIGGER_COLUMNS} {from} WHERE {condition}
             ORDER BY t.created_at DESC LIMIT $1 OFFSET $2"
        );
        let mut query = sqlx::query_as::<_, TriggerRow>(&sql)
            .bind(limit)
            .bind(offset);
        let count_sql = format!(
            "SELECT COUNT(*) AS total {from} WHERE {count_condition}"
        );
        let mut count_query = sqlx::query_as::<_, CountRow>(&count_sql);
        if let Some(namespace_id) = &namespace_id {
            query = query.bind(namespace_id);
            count_query = count_query.bind(namespace_id);
        }
        let rows = query.fetch_all(&mut *connection).await.into_core()?;
        let count = count_query.fetch_one(&mut *connection).await.into_core()?;

        let mut items = vec![];
        for row in rows {
            items.push(Self::trigger_from_row(&mut connection, row).await?);
        }
        Ok(ListResponse {
            items,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn get_obligations_for_action(
        &self,
        attribute_value: &Identifier,
        action: &str,
        client_id: Option<&str>,
    ) -> Result<Vec<String>> {
        let action = normalize_name("action", action)?;
        let mut connection = self.read_connection().await?;
        let attribute_value_id =
            Self::resolve_attribute_value_id(&mut connection, attribute_value).await?;
        let rows: Vec<FqnRow> = sqlx::query_as(
            "SELECT DISTINCT fi.fqn FROM obligation_triggers t
             JOIN actions a ON a.id = t.action_id
             JOIN fqn_index fi ON fi.entity_id = t.obligation_value_id
             WHERE t.attribute_value_id = $1 AND a.name = $2
             AND (t.client_id IS NULL OR t.client_id = $3)
             ORDER BY fi.fqn",
        )
        .bind(&attribute_value_id)
        .bind(&action)
        .bind(client_id.map(|c| c.trim().to_string()))
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        Ok(rows.into_iter().map(|r| r.fqn).collect())
    }
}

impl PolicyDbClient {
    async fn fetch_obligation(connection: &mut AnyConnection, id: &str) -> Result<Obligation> {
        let row: Option<ObligationRow> =
            sqlx::query_as(&format!("{OBLIGATION_SELECT} WHERE od.id = $1"))
                .bind(id)
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
        Self::obligation_from_row(connection, row.ok_or(Error::NotFound)?).await
    }

    async fn obligation_from_row(
        connection: &mut AnyConnection,
        row: ObligationRow,
    ) -> Result<Obligation> {
        let namespace = Self::fetch_namespace_row(connection, &row.namespace_id)
            .await?
            .namespace()?;
        let value_rows: Vec<ObligationValueRow> = sqlx::query_as(&format!(
            "{OBLIGATION_VALUE_SELECT} WHERE ov.obligation_definition_id = $1 ORDER BY ov.created_at"
        ))
        .bind(&row.id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let mut values = vec![];
        for value_row in value_rows {
            values.push(Self::obligation_value_from_row(connection, value_row).await?);
        }
        Ok(Obligation {
            fqn: fqn::obligation_fqn(&namespace.name, &row.name),
            metadata: Metadata::from_row(&row.labels, row.created_at, row.updated_at)?,
            id: row.id,
            namespace,
            name: row.name,
            values,
        })
    }

    async fn fetch_obligation_value_row(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<ObligationValueRow> {
        let row: Option<ObligationValueRow> =
            sqlx::query_as(&format!("{OBLIGATION_VALUE_SELECT} WHERE ov.id = $1"))
                .bind(id)
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
        row.ok_or(Error::NotFound)
    }

    async fn fetch_obligation_value(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<ObligationValue> {
        let row = Self::fetch_obligation_value_row(connection, id).await?;
        Self::obligation_value_from_row(connection, row).await
    }

    async fn obligation_value_from_row(
        connection: &mut AnyConnection,
        row: ObligationValueRow,
    ) -> Result<ObligationValue> {
        let trigger_rows: Vec<TriggerRow> = sqlx::query_as(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM obligation_triggers t WHERE t.obligation_value_id = $1
             ORDER BY t.created_at"
        ))
        .bind(&row.id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let mut triggers = vec![];
        for trigger_row in trigger_rows {
            triggers.push(Self::trigger_from_row(connection, trigger_row).await?);
        }
        Ok(ObligationValue {
            fqn: row.fqn(),
            metadata: row.metadata()?,
            id: row.id,
            obligation_id: row.obligation_definition_id,
            value: row.value,
            triggers,
        })
    }

    async fn fetch_trigger(connection: &mut AnyConnection, id: &str) -> Result<ObligationTrigger> {
        let row: Option<TriggerRow> = sqlx::query_as(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM obligation_triggers t WHERE t.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *connection)
        .await
        .into_core()?;
        Self::trigger_from_row(connection, row.ok_or(Error::NotFound)?).await
    }

    async fn trigger_from_row(
        connection: &mut AnyConnection,
        row: TriggerRow,
    ) -> Result<ObligationTrigger> {
        Ok(ObligationTrigger {
            obligation_value_fqn: FqnIndex::fqn_of(connection, &row.obligation_value_id).await?,
            attribute_value_fqn: FqnIndex::fqn_of(connection, &row.attribute_value_id).await?,
            action: Self::fetch_action(connection, &row.action_id).await?,
            client_id: row.client_id.to_option(),
            metadata: Metadata::from_row(&row.labels, row.created_at, row.updated_at)?,
            id: row.id,
            obligation_value_id: row.obligation_value_id,
            attribute_value_id: row.attribute_value_id,
        })
    }

    async fn insert_obligation_value(
        connection: &mut AnyConnection,
        namespace_id: &str,
        namespace_name: &str,
        obligation_id: &str,
        obligation_name: &str,
        value: &str,
        metadata: &Option<MetadataMutable>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = now_micros();
        sqlx::query(
            "INSERT INTO obligation_values (id, obligation_definition_id, value, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(obligation_id)
        .bind(value)
        .bind(MetadataMutable::labels_json(metadata)?)
        .bind(now)
        .bind(now)
        .execute(&mut *connection)
        .await
        .void()?;
        FqnIndex::index(
            connection,
            namespace_id,
            FqnEntityType::ObligationValue,
            &id,
            &fqn::obligation_value_fqn(namespace_name, obligation_name, value),
        )
        .await?;
        Ok(id)
    }

    async fn resolve_obligation_id(
        connection: &mut AnyConnection,
        identifier: &Identifier,
    ) -> Result<String> {
        match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                Ok(id.clone())
            }
            Identifier::Fqn(fqn) => {
                FqnIndex::lookup(connection, fqn, FqnEntityType::Obligation).await
            }
            _ => Err(Error::UnknownSelectIdentifier),
        }
    }

    async fn resolve_obligation_value_id(
        connection: &mut AnyConnection,
        identifier: &Identifier,
    ) -> Result<String> {
        match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                Ok(id.clone())
            }
            Identifier::Fqn(fqn) => {
                FqnIndex::lookup(connection, fqn, FqnEntityType::ObligationValue).await
            }
            _ => Err(Error::UnknownSelectIdentifier),
        }
    }

    pub(crate) async fn resolve_attribute_value_id(
        connection: &mut AnyConnection,
        identifier: &Identifier,
    ) -> Result<String> {
        match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                Ok(id.clone())
            }
            Identifier::Fqn(fqn) => FqnIndex::lookup(connection, fqn, FqnEntityType::Value).await,
            _ => Err(Error::UnknownSelectIdentifier),
        }
    }

    /// An unspecified namespace selects all namespaces
    async fn optional_namespace_id(
        connection: &mut AnyConnection,
        identifier: &Identifier,
    ) -> Result<Option<String>> {
        match identifier {
            Identifier::Unspecified => Ok(None),
            other => Ok(Some(Self::resolve_namespace_id(connection, other).await?)),
        }
    }

    /// Parse and deduplicate FQNs of a given kind
    fn parse_fqns(fqns: &[String], expected: impl Fn(&Fqn) -> bool) -> Result<BTreeSet<String>> {
        if fqns.is_empty() {
            return Err(Error::MissingValue { field: "fqns" });
        }
        fqns.iter()
            .map(|f| {
                let parsed = f.parse::<Fqn>()?;
                if expected(&parsed) {
                    Ok(parsed.to_string())
                } else {
                    Err(Error::SelectIdentifierInvalid {
                        identifier: f.clone(),
                    })
                }
            })
            .collect()
    }

    fn invalid_trigger_parameter(error: Error) -> Error {
        if error.is(ErrorKind::NotFound) || error.is(ErrorKind::UuidInvalid) {
            Error::InvalidObligationTriggerParameter
        } else {
            error
        }
    }
}

/// Low-level representation of a row in the obligation_definitions table
#[derive(FromRow)]
struct ObligationRow {
    id: String,
    namespace_id: String,
    name: String,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

/// Low-level representation of a row in the obligation_values table,
/// with the names needed to build its FQN
#[derive(FromRow)]
struct ObligationValueRow {
    id: String,
    obligation_definition_id: String,
    value: String,
    obligation_name: String,
    namespace_id: String,
    namespace_name: String,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

impl ObligationValueRow {
    fn fqn(&self) -> String {
        fqn::obligation_value_fqn(&self.namespace_name, &self.obligation_name, &self.value)
    }

    fn metadata(&self) -> Result<Metadata> {
        Metadata::from_row(&self.labels, self.created_at, self.updated_at)
    }
}

/// Low-level representation of a row in the obligation_triggers table
#[derive(FromRow)]
struct TriggerRow {
    id: String,
    obligation_value_id: String,
    attribute_value_id: String,
    action_id: String,
    client_id: Nullable<String>,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

#[derive(FromRow)]
struct FqnRow {
    fqn: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{
        AttributeRuleType, CreateAttributeRequest, CreateNamespaceRequest, MetadataUpdateEnum,
        Namespace, UnsafeUpdateNamespaceRequest, Value,
    };
    use crate::storage::{AttributesRepository, NamespacesRepository};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_obligations() -> Result<()> {
        let repository = create_repository("obligations").await?;
        let namespace = create_namespace(&repository, "corp").await?;

        let obligation = create_obligation(&repository, "corp", "Watermark").await?;
        assert_eq!(obligation.fqn, "https://corp/obl/watermark");
        assert_eq!(obligation.namespace.id, namespace.id);
        assert_eq!(
            obligation.values.iter().map(|v| v.fqn.as_str()).collect::<Vec<_>>(),
            vec![
                "https://corp/obl/watermark/value/visible",
                "https://corp/obl/watermark/value/invisible"
            ]
        );
        assert_eq!(
            repository
                .get_obligation(&Identifier::fqn("https://CORP/obl/watermark"))
                .await?,
            obligation
        );

        let error = create_obligation(&repository, "corp", "watermark")
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::UniqueConstraintViolation));
        let error = create_obligation(&repository, "unknown.org", "watermark")
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::ForeignKeyViolation));

        let renamed = repository
            .update_obligation(&UpdateObligationRequest {
                id: obligation.id.clone(),
                name: Some("mark".to_string()),
                metadata: Some(MetadataMutable::default().with_label("team", "docs")),
                metadata_update_behavior: MetadataUpdateEnum::Extend,
            })
            .await?;
        assert_eq!(renamed.fqn, "https://corp/obl/mark");
        let by_fqn = repository
            .get_obligation_value(&Identifier::fqn("https://corp/obl/mark/value/visible"))
            .await?;
        assert_eq!(by_fqn.id, obligation.values[0].id);

        let listed = repository
            .list_obligations(&ListObligationsRequest {
                namespace: Identifier::name("corp"),
                ..Default::default()
            })
            .await?;
        assert_eq!(listed.items, vec![renamed.clone()]);

        let by_fqns = repository
            .get_obligations_by_fqns(&["https://corp/obl/mark".to_string()])
            .await?;
        assert_eq!(by_fqns.get("https://corp/obl/mark"), Some(&renamed));
        let error = repository
            .get_obligations_by_fqns(&["https://corp/obl/watermark".to_string()])
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));

        repository
            .delete_obligation(&Identifier::fqn("https://corp/obl/mark"))
            .await?;
        let error = repository
            .get_obligation_value(&Identifier::id(&obligation.values[0].id))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));
        let error = repository
            .get_obligation_values_by_fqns(&["https://corp/obl/mark/value/visible".to_string()])
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn test_obligation_values() -> Result<()> {
        let repository = create_repository("obligation_values").await?;
        create_namespace(&repository, "corp").await?;
        let obligation = create_obligation(&repository, "corp", "watermark").await?;

        let value = repository
            .create_obligation_value(&CreateObligationValueRequest {
                obligation: Identifier::fqn(&obligation.fqn),
                value: "Blurred".to_string(),
                metadata: None,
            })
            .await?;
        assert_eq!(value.fqn, "https://corp/obl/watermark/value/blurred");
        assert_eq!(value.obligation_id, obligation.id);

        let updated = repository
            .update_obligation_value(&UpdateObligationValueRequest {
                id: value.id.clone(),
                value: Some("faded".to_string()),
                ..Default::default()
            })
            .await?;
        assert_eq!(updated.fqn, "https://corp/obl/watermark/value/faded");

        let values = repository
            .get_obligation_values_by_fqns(&[
                updated.fqn.clone(),
                "https://corp/obl/watermark/value/visible".to_string(),
            ])
            .await?;
        assert_eq!(values.len(), 2);
        assert_eq!(values.get(&updated.fqn), Some(&updated));

        repository
            .delete_obligation_value(&Identifier::id(&value.id))
            .await?;
        let obligation = repository
            .get_obligation(&Identifier::id(&obligation.id))
            .await?;
        assert_eq!(obligation.values.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_triggers() -> Result<()> {
        let repository = create_repository("obligation_triggers").await?;
        create_namespace(&repository, "corp").await?;
        let attribute_value = create_attribute_value(&repository, "corp").await?;
        let obligation = create_obligation(&repository, "corp", "watermark").await?;
        let visible = &obligation.values[0];
        let invisible = &obligation.values[1];

        let scoped = repository
            .add_obligation_trigger(&AddObligationTriggerRequest {
                obligation_value: Identifier::fqn(&visible.fqn),
                attribute_value: Identifier::fqn(&attribute_value.fqn),
                action: Identifier::name("READ"),
                client_id: Some("cli-42".to_string()),
                metadata: None,
            })
            .await?;
        assert_eq!(scoped.action.name, "read");
        assert_eq!(scoped.attribute_value_fqn, attribute_value.fqn);
        assert_eq!(scoped.client_id, Some("cli-42".to_string()));

        let unscoped = repository
            .add_obligation_trigger(&AddObligationTriggerRequest {
                obligation_value: Identifier::id(&invisible.id),
                attribute_value: Identifier::id(&attribute_value.id),
                action: Identifier::name("read"),
                ..Default::default()
            })
            .await?;
        assert_eq!(unscoped.client_id, None);

        let for_client = repository
            .get_obligations_for_action(
                &Identifier::fqn(&attribute_value.fqn),
                "READ",
                Some("cli-42"),
            )
            .await?;
        assert_eq!(for_client, vec![invisible.fqn.clone(), visible.fqn.clone()]);
        let for_other = repository
            .get_obligations_for_action(&Identifier::id(&attribute_value.id), "read", Some("other"))
            .await?;
        assert_eq!(for_other, vec![invisible.fqn.clone()]);
        let other_action = repository
            .get_obligations_for_action(&Identifier::id(&attribute_value.id), "create", None)
            .await?;
        assert!(other_action.is_empty());

        let listed = repository
            .list_obligation_triggers(&ListObligationTriggersRequest {
                namespace: Identifier::name("corp"),
                ..Default::default()
            })
            .await?;
        assert_eq!(listed.items, vec![unscoped.clone(), scoped.clone()]);

        let with_triggers = repository
            .get_obligation_value(&Identifier::id(&visible.id))
            .await?;
        assert_eq!(with_triggers.triggers, vec![scoped.clone()]);

        repository.remove_obligation_trigger(&scoped.id).await?;
        let for_client = repository
            .get_obligations_for_action(
                &Identifier::fqn(&attribute_value.fqn),
                "read",
                Some("cli-42"),
            )
            .await?;
        assert_eq!(for_client, vec![invisible.fqn.clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_triggers() -> Result<()> {
        let repository = create_repository("invalid_obligation_triggers").await?;
        create_namespace(&repository, "corp").await?;
        create_namespace(&repository, "other.org").await?;
        let attribute_value = create_attribute_value(&repository, "corp").await?;
        let other_value = create_attribute_value(&repository, "other.org").await?;
        let obligation = create_obligation(&repository, "corp", "watermark").await?;
        let visible = &obligation.values[0];

        let invalid_requests = vec![
            trigger(&visible.fqn, &attribute_value.fqn, "download"),
            trigger(
                "https://corp/obl/watermark/value/unknown",
                &attribute_value.fqn,
                "read",
            ),
            trigger(&visible.fqn, "https://corp/attr/unknown/value/x", "read"),
        ];
        for request in invalid_requests {
            let error = repository
                .add_obligation_trigger(&request)
                .await
                .unwrap_err();
            assert!(error.is(ErrorKind::InvalidObligationTriggerParameter), "{error:?}");
        }

        let error = repository
            .add_obligation_trigger(&trigger(&visible.fqn, &other_value.fqn, "read"))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NamespaceMismatch));
        Ok(())
    }

    #[tokio::test]
    async fn test_namespace_rename_moves_obligations() -> Result<()> {
        let repository = create_repository("obligations_rename").await?;
        let namespace = create_namespace(&repository, "corp").await?;
        let obligation = create_obligation(&repository, "corp", "watermark").await?;

        repository
            .unsafe_update_namespace(&UnsafeUpdateNamespaceRequest {
                id: namespace.id.clone(),
                current_fqn: namespace.fqn.clone(),
                name: "corp.io".to_string(),
            })
            .await?;
        let moved = repository
            .get_obligation(&Identifier::fqn("https://corp.io/obl/watermark"))
            .await?;
        assert_eq!(moved.id, obligation.id);
        assert_eq!(
            moved.values[0].fqn,
            "https://corp.io/obl/watermark/value/visible"
        );
        Ok(())
    }

    /// HELPERS
    async fn create_repository(usage: &str) -> Result<PolicyDbClient> {
        PolicyDbClient::in_memory(usage).await
    }

    async fn create_namespace(repository: &PolicyDbClient, name: &str) -> Result<Namespace> {
        repository
            .create_namespace(&CreateNamespaceRequest::new(name))
            .await
    }

    async fn create_obligation(
        repository: &PolicyDbClient,
        namespace: &str,
        name: &str,
    ) -> Result<Obligation> {
        repository
            .create_obligation(&CreateObligationRequest {
                namespace: Identifier::name(namespace),
                name: name.to_string(),
                values: vec!["visible".to_string(), "invisible".to_string()],
                metadata: None,
            })
            .await
    }

    async fn create_attribute_value(repository: &PolicyDbClient, namespace: &str) -> Result<Value> {
        let namespace = repository
            .get_namespace(&Identifier::name(namespace))
            .await?;
        let attribute = repository
            .create_attribute(&CreateAttributeRequest {
                namespace_id: namespace.id,
                name: "classification".to_string(),
                rule: AttributeRuleType::AnyOf,
                values: vec!["secret".to_string()],
                metadata: None,
            })
            .await?;
        Ok(attribute.values[0].clone())
    }

    fn trigger(obligation_value: &str, attribute_value: &str, action: &str) -> AddObligationTriggerRequest {
        AddObligationTriggerRequest {
            obligation_value: Identifier::fqn(obligation_value),
            attribute_value: Identifier::fqn(attribute_value),
            action: Identifier::name(action),
            ..Default::default()
        }
    }
}
