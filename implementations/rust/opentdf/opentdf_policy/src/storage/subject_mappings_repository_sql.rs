use crate::models::{
    ActiveStateEnum, CreateSubjectMappingRequest, ListResponse, ListSubjectConditionSetsRequest,
    ListSubjectMappingsRequest, Metadata, MetadataMutable, SubjectConditionSet,
    SubjectConditionSetCreate, SubjectMapping, SubjectProperty, SubjectSet,
    UpdateSubjectConditionSetRequest, UpdateSubjectMappingRequest,
};
use crate::storage::{CountRow, PolicyDbClient, SubjectMappingsRepository};
use crate::validation::{check_subject_sets, check_uuid, normalize_actions};
use async_trait::async_trait;
use itertools::Itertools;
use opentdf_db::{now_micros, BigInteger, Error, ErrorKind, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use tracing::{debug, info};
use uuid::Uuid;

const SCS_COLUMNS: &str = "scs.id, scs.subject_sets, scs.labels, scs.created_at, scs.updated_at";

const MAPPING_COLUMNS: &str = "sm.id, sm.attribute_value_id, sm.subject_condition_set_id, sm.actions,
       sm.labels, sm.created_at, sm.updated_at";

#[async_trait]
impl SubjectMappingsRepository for PolicyDbClient {
    async fn get_subject_condition_set(&self, id: &str) -> Result<SubjectConditionSet> {
        check_uuid(id)?;
        let mut connection = self.read_connection().await?;
        Self::fetch_subject_condition_set(&mut connection, id).await
    }

    async fn list_subject_condition_sets(
        &self,
        request: &ListSubjectConditionSetsRequest,
    ) -> Result<ListResponse<SubjectConditionSet>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let mut connection = self.read_connection().await?;
        let rows: Vec<SubjectConditionSetRow> = sqlx::query_as(&format!(
            "SELECT {SCS_COLUMNS} FROM subject_condition_sets scs
             ORDER BY scs.created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let count: CountRow = sqlx::query_as("SELECT COUNT(*) AS total FROM subject_condition_sets")
            .fetch_one(&mut *connection)
            .await
            .into_core()?;
        Ok(ListResponse {
            items: rows
                .iter()
                .map(|r| r.subject_condition_set())
                .collect::<Result<Vec<_>>>()?,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn create_subject_condition_set(
        &self,
        request: &SubjectConditionSetCreate,
    ) -> Result<SubjectConditionSet> {
        check_subject_sets(&request.subject_sets)?;
        let mut transaction = self.begin().await?;
        let id = Self::insert_subject_condition_set(&mut transaction, request).await?;
        let subject_condition_set = Self::fetch_subject_condition_set(&mut transaction, &id).await?;
        transaction.commit().await?;
        Ok(subject_condition_set)
    }

    async fn update_subject_condition_set(
        &self,
        request: &UpdateSubjectConditionSetRequest,
    ) -> Result<SubjectConditionSet> {
        check_uuid(&request.id)?;
        if let Some(subject_sets) = &request.subject_sets {
            check_subject_sets(subject_sets)?;
        }
        let mut transaction = self.begin().await?;
        let current = Self::fetch_subject_condition_set(&mut transaction, &request.id).await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata.labels,
            &request.metadata,
            request.metadata_update_behavior,
        );
        let subject_sets = request.subject_sets.as_ref().unwrap_or(&current.subject_sets);
        sqlx::query(
            "UPDATE subject_condition_sets SET subject_sets = $1, labels = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(serde_json::to_string(subject_sets)?)
        .bind(serde_json::to_string(&labels)?)
        .bind(now_micros())
        .bind(&request.id)
        .execute(&mut *transaction)
        .await
        .void()?;
        Self::write_selectors(&mut transaction, &request.id, subject_sets).await?;
        let subject_condition_set =
            Self::fetch_subject_condition_set(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(subject_condition_set)
    }

    async fn delete_subject_condition_set(&self, id: &str) -> Result<SubjectConditionSet> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let subject_condition_set = Self::fetch_subject_condition_set(&mut transaction, id).await?;
        sqlx::query("DELETE FROM subject_condition_sets WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        Ok(subject_condition_set)
    }

    async fn delete_all_unmapped_subject_condition_sets(&self) -> Result<Vec<SubjectConditionSet>> {
        let mut transaction = self.begin().await?;
        let rows: Vec<SubjectConditionSetRow> = sqlx::query_as(&format!(
            "SELECT {SCS_COLUMNS} FROM subject_condition_sets scs
             WHERE NOT EXISTS (SELECT 1 FROM subject_mappings sm WHERE sm.subject_condition_set_id = scs.id)
             ORDER BY scs.created_at"
        ))
        .fetch_all(&mut *transaction)
        .await
        .into_core()?;
        let deleted = rows
            .iter()
            .map(|r| r.subject_condition_set())
            .collect::<Result<Vec<_>>>()?;
        for subject_condition_set in deleted.iter() {
            sqlx::query("DELETE FROM subject_condition_sets WHERE id = $1")
                .bind(&subject_condition_set.id)
                .execute(&mut *transaction)
                .await
                .void()?;
        }
        transaction.commit().await?;
        info!(count = deleted.len(), "unmapped subject condition sets deleted");
        Ok(deleted)
    }

    async fn get_subject_mapping(&self, id: &str) -> Result<SubjectMapping> {
        check_uuid(id)?;
        let mut connection = self.read_connection().await?;
        Self::fetch_subject_mapping(&mut connection, id).await
    }

    async fn list_subject_mappings(
        &self,
        request: &ListSubjectMappingsRequest,
    ) -> Result<ListResponse<SubjectMapping>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let mut connection = self.read_connection().await?;
        let rows: Vec<SubjectMappingRow> = sqlx::query_as(&format!(
            "SELECT {MAPPING_COLUMNS} FROM subject_mappings sm
             ORDER BY sm.created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let count: CountRow = sqlx::query_as("SELECT COUNT(*) AS total FROM subject_mappings")
            .fetch_one(&mut *connection)
            .await
            .into_core()?;
        let mut items = vec![];
        for row in rows {
            items.push(Self::subject_mapping_from_row(&mut connection, row).await?);
        }
        Ok(ListResponse {
            items,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn create_subject_mapping(
        &self,
        request: &CreateSubjectMappingRequest,
    ) -> Result<SubjectMapping> {
        check_uuid(&request.attribute_value_id)?;
        let actions = normalize_actions(&request.actions)?;
        let labels = MetadataMutable::labels_json(&request.metadata)?;

        let mut transaction = self.begin().await?;
        let value = Self::fetch_value_row(&mut transaction, &request.attribute_value_id)
            .await
            .map_err(|e| Self::missing_reference(e, "attribute value", &request.attribute_value_id))?
            .value()?;
        if !value.active {
            return Err(Error::InactiveAttributeValue);
        }
        let subject_condition_set_id = match (
            &request.existing_subject_condition_set_id,
            &request.new_subject_condition_set,
        ) {
            (Some(id), _) => {
                check_uuid(id)?;
                Self::fetch_subject_condition_set(&mut transaction, id)
                    .await
                    .map_err(|e| Self::missing_reference(e, "subject condition set", id))?
                    .id
            }
            (None, Some(new)) => {
                check_subject_sets(&new.subject_sets)?;
                Self::insert_subject_condition_set(&mut transaction, new).await?
            }
            (None, None) => {
                return Err(Error::MissingValue {
                    field: "subject_condition_set",
                })
            }
        };

        let id = Uuid::new_v4().to_string();
        let now = now_micros();
        sqlx::query(
            "INSERT INTO subject_mappings (id, attribute_value_id, subject_condition_set_id, actions, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&id)
        .bind(&value.id)
        .bind(&subject_condition_set_id)
        .bind(serde_json::to_string(&actions)?)
        .bind(labels)
        .bind(now)
        .bind(now)
        .execute(&mut *transaction)
        .await
        .void()?;
        let subject_mapping = Self::fetch_subject_mapping(&mut transaction, &id).await?;
        transaction.commit().await?;
        debug!(%id, value = %value.fqn, "subject mapping created");
        Ok(subject_mapping)
    }

    async fn update_subject_mapping(
        &self,
        request: &UpdateSubjectMappingRequest,
    ) -> Result<SubjectMapping> {
        check_uuid(&request.id)?;
        let actions = request
            .actions
            .as_ref()
            .map(|a| normalize_actions(a))
            .transpose()?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_subject_mapping(&mut transaction, &request.id).await?;
        let subject_condition_set_id = match &request.subject_condition_set_id {
            Some(id) => {
                check_uuid(id)?;
                Self::fetch_subject_condition_set(&mut transaction, id)
                    .await
                    .map_err(|e| Self::missing_reference(e, "subject condition set", id))?
                    .id
            }
            None => current.subject_condition_set.id.clone(),
        };
        let labels = MetadataMutable::updated_labels(
            current.metadata.labels.clone(),
            &request.metadata,
            request.metadata_update_behavior,
        );
        sqlx::query(
            "UPDATE subject_mappings SET subject_condition_set_id = $1, actions = $2, labels = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(subject_condition_set_id)
        .bind(serde_json::to_string(actions.as_ref().unwrap_or(&current.actions))?)
        .bind(serde_json::to_string(&labels)?)
        .bind(now_micros())
        .bind(&request.id)
        .execute(&mut *transaction)
        .await
        .void()?;
        let subject_mapping = Self::fetch_subject_mapping(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(subject_mapping)
    }

    async fn delete_subject_mapping(&self, id: &str) -> Result<SubjectMapping> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let subject_mapping = Self::fetch_subject_mapping(&mut transaction, id).await?;
        sqlx::query("DELETE FROM subject_mappings WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        Ok(subject_mapping)
    }

    async fn get_matched_subject_mappings(
        &self,
        properties: &[SubjectProperty],
    ) -> Result<Vec<SubjectMapping>> {
        let selectors: Vec<&str> = properties
            .iter()
            .map(|p| p.external_selector_value.as_str())
            .filter(|s| !s.is_empty())
            .unique()
            .collect();
        if selectors.is_empty() {
            return Err(Error::MissingValue {
                field: "subject_properties",
            });
        }

        let parameters = (1..=selectors.len()).map(|i| format!("${i}")).join(", ");
        let active = ActiveStateEnum::Active.condition(&["n.active", "ad.active", "av.active"]);
        let mut connection = self.read_connection().await?;
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM subject_mappings sm
             JOIN attribute_values av ON av.id = sm.attribute_value_id
             JOIN attribute_definitions ad ON ad.id = av.attribute_definition_id
             JOIN attribute_namespaces n ON n.id = ad.namespace_id
             WHERE {active} AND EXISTS (
                SELECT 1 FROM subject_condition_set_selectors s
                WHERE s.subject_condition_set_id = sm.subject_condition_set_id
                AND s.selector IN ({parameters}))
             ORDER BY sm.created_at"
        );
        let mut query = sqlx::query_as::<_, SubjectMappingRow>(&sql);
        for selector in selectors.iter() {
            query = query.bind(*selector);
        }
        let rows = query.fetch_all(&mut *connection).await.into_core()?;

        let mut subject_mappings = vec![];
        for row in rows {
            subject_mappings.push(Self::subject_mapping_from_row(&mut connection, row).await?);
        }
        debug!(
            selectors = selectors.len(),
            matched = subject_mappings.len(),
            "subject mappings matched"
        );
        Ok(subject_mappings)
    }
}

impl PolicyDbClient {
    pub(crate) async fn fetch_subject_condition_set(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<SubjectConditionSet> {
        let row: Option<SubjectConditionSetRow> = sqlx::query_as(&format!(
            "SELECT {SCS_COLUMNS} FROM subject_condition_sets scs WHERE scs.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *connection)
        .await
        .into_core()?;
        row.ok_or(Error::NotFound)?.subject_condition_set()
    }

    async fn fetch_subject_mapping(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<SubjectMapping> {
        let row: Option<SubjectMappingRow> = sqlx::query_as(&format!(
            "SELECT {MAPPING_COLUMNS} FROM subject_mappings sm WHERE sm.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *connection)
        .await
        .into_core()?;
        Self::subject_mapping_from_row(connection, row.ok_or(Error::NotFound)?).await
    }

    async fn subject_mapping_from_row(
        connection: &mut AnyConnection,
        row: SubjectMappingRow,
    ) -> Result<SubjectMapping> {
        let attribute_value = Self::fetch_value_row(connection, &row.attribute_value_id)
            .await?
            .value()?;
        let subject_condition_set =
            Self::fetch_subject_condition_set(connection, &row.subject_condition_set_id).await?;
        Ok(SubjectMapping {
            id: row.id.clone(),
            attribute_value,
            subject_condition_set,
            actions: serde_json::from_str(&row.actions)?,
            metadata: Metadata::from_row(&row.labels, row.created_at, row.updated_at)?,
        })
    }

    async fn insert_subject_condition_set(
        connection: &mut AnyConnection,
        request: &SubjectConditionSetCreate,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = now_micros();
        sqlx::query(
            "INSERT INTO subject_condition_sets (id, subject_sets, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&id)
        .bind(serde_json::to_string(&request.subject_sets)?)
        .bind(MetadataMutable::labels_json(&request.metadata)?)
        .bind(now)
        .bind(now)
        .execute(&mut *connection)
        .await
        .void()?;
        Self::write_selectors(connection, &id, &request.subject_sets).await?;
        Ok(id)
    }

    /// Replace the selectors indexed for a condition set
    async fn write_selectors(
        connection: &mut AnyConnection,
        subject_condition_set_id: &str,
        subject_sets: &[SubjectSet],
    ) -> Result<()> {
        sqlx::query("DELETE FROM subject_condition_set_selectors WHERE subject_condition_set_id = $1")
            .bind(subject_condition_set_id)
            .execute(&mut *connection)
            .await
            .void()?;
        for selector in SubjectSet::selectors(subject_sets) {
            sqlx::query(
                "INSERT INTO subject_condition_set_selectors (subject_condition_set_id, selector) VALUES ($1, $2)",
            )
            .bind(subject_condition_set_id)
            .bind(selector)
            .execute(&mut *connection)
            .await
            .void()?;
        }
        Ok(())
    }

    /// Report a missing referenced entity as a foreign key violation
    pub(crate) fn missing_reference(error: Error, entity: &str, id: &str) -> Error {
        if error.is(ErrorKind::NotFound) {
            Error::ForeignKeyViolation {
                detail: Some(format!("{entity} {id} not found")),
            }
        } else {
            error
        }
    }
}

/// Low-level representation of a row in the subject_condition_sets table
#[derive(FromRow)]
struct SubjectConditionSetRow {
    id: String,
    subject_sets: String,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

impl SubjectConditionSetRow {
    fn subject_condition_set(&self) -> Result<SubjectConditionSet> {
        Ok(SubjectConditionSet {
            id: self.id.clone(),
            subject_sets: serde_json::from_str(&self.subject_sets)?,
            metadata: Metadata::from_row(&self.labels, self.created_at, self.updated_at)?,
        })
    }
}

/// Low-level representation of a row in the subject_mappings table
#[derive(FromRow)]
struct SubjectMappingRow {
    id: String,
    attribute_value_id: String,
    subject_condition_set_id: String,
    actions: String,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}
