use crate::fqn::{self, Fqn};
use crate::models::{
    CreateResourceMappingGroupRequest, CreateResourceMappingRequest, Identifier,
    ListResourceMappingGroupsRequest, ListResourceMappingsRequest, ListResponse, Metadata,
    MetadataMutable, ResourceMapping, ResourceMappingGroup, ResourceMappingsByGroup,
    UpdateResourceMappingGroupRequest, UpdateResourceMappingRequest,
};
use crate::storage::{
    CountRow, FqnEntityType, FqnIndex, PolicyDbClient, ResourceMappingsRepository,
};
use crate::validation::{check_uuid, normalize_name};
use async_trait::async_trait;
use opentdf_db::{now_micros, BigInteger, Error, FromSqlxError, Nullable, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const GROUP_SELECT: &str = "SELECT g.id, g.namespace_id, g.name, n.name AS namespace_name, g.labels, g.created_at, g.updated_at
FROM resource_mapping_groups g
JOIN attribute_namespaces n ON n.id = g.namespace_id";

const MAPPING_COLUMNS: &str =
    "rm.id, rm.attribute_value_id, rm.group_id, rm.terms, rm.labels, rm.created_at, rm.updated_at";

#[async_trait]
impl ResourceMappingsRepository for PolicyDbClient {
    async fn get_resource_mapping_group(
        &self,
        identifier: &Identifier,
    ) -> Result<ResourceMappingGroup> {
        let mut connection = self.read_connection().await?;
        let id = match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                id.clone()
            }
            Identifier::Fqn(fqn) => {
                FqnIndex::lookup(&mut connection, fqn, FqnEntityType::ResourceMappingGroup).await?
            }
            _ => return Err(Error::UnknownSelectIdentifier),
        };
        Self::fetch_resource_mapping_group(&mut connection, &id).await
    }

    async fn list_resource_mapping_groups(
        &self,
        request: &ListResourceMappingGroupsRequest,
    ) -> Result<ListResponse<ResourceMappingGroup>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let namespace_id = request.namespace_id.as_ref().filter(|n| !n.is_empty());
        if let Some(namespace_id) = namespace_id {
            check_uuid(namespace_id)?;
        }
        let (condition, count_condition) = match namespace_id {
            Some(_) => ("g.namespace_id = $3", "g.namespace_id = $1"),
            None => ("1 = 1", "1 = 1"),
        };

        let mut connection = self.read_connection().await?;
        let sql = format!(
            "{GROUP_SELECT} WHERE {condition} ORDER BY g.created_at DESC LIMIT $1 OFFSET $2"
        );
        let mut query = sqlx::query_as::<_, ResourceMappingGroupRow>(&sql)
            .bind(limit)
            .bind(offset);
        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM resource_mapping_groups g WHERE {count_condition}"
        );
        let mut count_query = sqlx::query_as::<_, CountRow>(&count_sql);
        if let Some(namespace_id) = namespace_id {
            query = query.bind(namespace_id);
            count_query = count_query.bind(namespace_id);
        }
        let rows = query.fetch_all(&mut *connection).await.into_core()?;
        let count = count_query.fetch_one(&mut *connection).await.into_core()?;
        Ok(ListResponse {
            items: rows
                .iter()
                .map(|r| r.group())
                .collect::<Result<Vec<_>>>()?,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn create_resource_mapping_group(
        &self,
        request: &CreateResourceMappingGroupRequest,
    ) -> Result<ResourceMappingGroup> {
        check_uuid(&request.namespace_id)?;
        let name = normalize_name("name", &request.name)?;
        let id = Uuid::new_v4().to_string();
        let now = now_micros();

        let mut transaction = self.begin().await?;
        let namespace = Self::fetch_namespace_row(&mut transaction, &request.namespace_id)
            .await
            .map_err(|e| Self::missing_reference(e, "namespace", &request.namespace_id))?;
        sqlx::query(
            "INSERT INTO resource_mapping_groups (id, namespace_id, name, labels, created_at, updated_at)
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
            FqnEntityType::ResourceMappingGroup,
            &id,
            &fqn::resource_mapping_group_fqn(&namespace.name, &name),
        )
        .await?;
        let group = Self::fetch_resource_mapping_group(&mut transaction, &id).await?;
        transaction.commit().await?;
        debug!(fqn = %group.fqn, "resource mapping group created");
        Ok(group)
    }

    async fn update_resource_mapping_group(
        &self,
        request: &UpdateResourceMappingGroupRequest,
    ) -> Result<ResourceMappingGroup> {
        check_uuid(&request.id)?;
        let name = request
            .name
            .as_ref()
            .map(|n| normalize_name("name", n))
            .transpose()?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_resource_mapping_group(&mut transaction, &request.id).await?;
        let namespace = match &request.namespace_id {
            Some(namespace_id) => {
                check_uuid(namespace_id)?;
                Self::fetch_namespace_row(&mut transaction, namespace_id)
                    .await
                    .map_err(|e| Self::missing_reference(e, "namespace", namespace_id))?
            }
            None => Self::fetch_namespace_row(&mut transaction, &current.namespace_id).await?,
        };
        let name = name.unwrap_or(current.name.clone());
        let labels = MetadataMutable::updated_labels(
            current.metadata.labels.clone(),
            &request.metadata,
            request.metadata_update_behavior,
        );
        sqlx::query(
            "UPDATE resource_mapping_groups SET namespace_id = $1, name = $2, labels = $3, updated_at = $4
             WHERE id = $5",
        )
        .bind(&namespace.id)
        .bind(&name)
        .bind(serde_json::to_string(&labels)?)
        .bind(now_micros())
        .bind(&request.id)
        .execute(&mut *transaction)
        .await
        .void()?;
        FqnIndex::index(
            &mut transaction,
            &namespace.id,
            FqnEntityType::ResourceMappingGroup,
            &request.id,
            &fqn::resource_mapping_group_fqn(&namespace.name, &name),
        )
        .await?;
        let group = Self::fetch_resource_mapping_group(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(group)
    }

    async fn delete_resource_mapping_group(&self, id: &str) -> Result<ResourceMappingGroup> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let group = Self::fetch_resource_mapping_group(&mut transaction, id).await?;
        sqlx::query("DELETE FROM fqn_index WHERE entity_id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        sqlx::query("DELETE FROM resource_mapping_groups WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        debug!(fqn = %group.fqn, "resource mapping group deleted");
        Ok(group)
    }

    async fn get_resource_mapping(&self, id: &str) -> Result<ResourceMapping> {
        check_uuid(id)?;
        let mut connection = self.read_connection().await?;
        Self::fetch_resource_mapping(&mut connection, id).await
    }

    async fn list_resource_mappings(
        &self,
        request: &ListResourceMappingsRequest,
    ) -> Result<ListResponse<ResourceMapping>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let group_id = request.group_id.as_ref().filter(|g| !g.is_empty());
        if let Some(group_id) = group_id {
            check_uuid(group_id)?;
        }
        let (condition, count_condition) = match group_id {
            Some(_) => ("rm.group_id = $3", "rm.group_id = $1"),
            None => ("1 = 1", "1 = 1"),
        };

        let mut connection = self.read_connection().await?;
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM resource_mappings rm WHERE {condition}
             ORDER BY rm.created_at DESC LIMIT $1 OFFSET $2"
        );
        let mut query = sqlx::query_as::<_, ResourceMappingRow>(&sql)
            .bind(limit)
            .bind(offset);
        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM resource_mappings rm WHERE {count_condition}"
        );
        let mut count_query = sqlx::query_as::<_, CountRow>(&count_sql);
        if let Some(group_id) = group_id {
            query = query.bind(group_id);
            count_query = count_query.bind(group_id);
        }
        let rows = query.fetch_all(&mut *connection).await.into_core()?;
        let count = count_query.fetch_one(&mut *connection).await.into_core()?;

        let mut items = vec![];
        for row in rows {
            items.push(Self::resource_mapping_from_row(&mut connection, row).await?);
        }
        Ok(ListResponse {
            items,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn create_resource_mapping(
        &self,
        request: &CreateResourceMappingRequest,
    ) -> Result<ResourceMapping> {
        check_uuid(&request.attribute_value_id)?;
        if request.terms.iter().all(|t| t.trim().is_empty()) {
            return Err(Error::MissingValue { field: "terms" });
        }
        let id = Uuid::new_v4().to_string();
        let now = now_micros();

        let mut transaction = self.begin().await?;
        Self::check_resource_mapping_references(
            &mut transaction,
            &request.attribute_value_id,
            request.group_id.as_deref(),
        )
        .await?;
        sqlx::query(
            "INSERT INTO resource_mappings (id, attribute_value_id, group_id, terms, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&id)
        .bind(&request.attribute_value_id)
        .bind(request.group_id.clone().filter(|g| !g.is_empty()))
        .bind(serde_json::to_string(&request.terms)?)
        .bind(MetadataMutable::labels_json(&request.metadata)?)
        .bind(now)
        .bind(now)
        .execute(&mut *transaction)
        .await
        .void()?;
        let mapping = Self::fetch_resource_mapping(&mut transaction, &id).await?;
        transaction.commit().await?;
        Ok(mapping)
    }

    async fn update_resource_mapping(
        &self,
        request: &UpdateResourceMappingRequest,
    ) -> Result<ResourceMapping> {
        check_uuid(&request.id)?;
        if let Some(terms) = &request.terms {
            if terms.iter().all(|t| t.trim().is_empty()) {
                return Err(Error::MissingValue { field: "terms" });
            }
        }
        let mut transaction = self.begin().await?;
        let current = Self::fetch_resource_mapping(&mut transaction, &request.id).await?;
        let attribute_value_id = request
            .attribute_value_id
            .clone()
            .unwrap_or(current.attribute_value.id.clone());
        let group_id = match &request.group_id {
            // an empty group id removes the mapping from its group
            Some(group_id) => Some(group_id.clone()).filter(|g| !g.is_empty()),
            None => current.group.as_ref().map(|g| g.id.clone()),
        };
        Self::check_resource_mapping_references(
            &mut transaction,
            &attribute_value_id,
            group_id.as_deref(),
        )
        .await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata.labels.clone(),
            &request.metadata,
            request.metadata_update_behavior,
        );
        sqlx::query(
            "UPDATE resource_mappings SET attribute_value_id = $1, group_id = $2, terms = $3, labels = $4,
             updated_at = $5 WHERE id = $6",
        )
        .bind(&attribute_value_id)
        .bind(group_id)
        .bind(serde_json::to_string(request.terms.as_ref().unwrap_or(&current.terms))?)
        .bind(serde_json::to_string(&labels)?)
        .bind(now_micros())
        .bind(&request.id)
        .execute(&mut *transaction)
        .await
        .void()?;
        let mapping = Self::fetch_resource_mapping(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(mapping)
    }

    async fn delete_resource_mapping(&self, id: &str) -> Result<ResourceMapping> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let mapping = Self::fetch_resource_mapping(&mut transaction, id).await?;
        sqlx::query("DELETE FROM resource_mappings WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        Ok(mapping)
    }

    async fn list_resource_mappings_by_group_fqns(
        &self,
        fqns: &[String],
    ) -> Result<BTreeMap<String, ResourceMappingsByGroup>> {
        if fqns.is_empty() {
            return Err(Error::MissingValue { field: "fqns" });
        }
        let parsed = fqns
            .iter()
            .map(|f| match f.parse::<Fqn>()? {
                fqn @ Fqn::ResourceMappingGroup { .. } => Ok(fqn.to_string()),
                _ => Err(Error::SelectIdentifierInvalid {
                    identifier: f.clone(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut connection = self.read_connection().await?;
        let mut result = BTreeMap::new();
        for fqn in parsed {
            let group_id =
                FqnIndex::lookup(&mut connection, &fqn, FqnEntityType::ResourceMappingGroup)
                    .await?;
            let group = Self::fetch_resource_mapping_group(&mut connection, &group_id).await?;
            let rows: Vec<ResourceMappingRow> = sqlx::query_as(&format!(
                "SELECT {MAPPING_COLUMNS} FROM resource_mappings rm WHERE rm.group_id = $1
                 ORDER BY rm.created_at"
            ))
            .bind(&group_id)
            .fetch_all(&mut *connection)
            .await
            .into_core()?;
            let mut mappings = vec![];
            for row in rows {
                mappings.push(Self::resource_mapping_from_row(&mut connection, row).await?);
            }
            result.insert(fqn, ResourceMappingsByGroup { group, mappings });
        }
        Ok(result)
    }
}

impl PolicyDbClient {
    async fn fetch_resource_mapping_group(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<ResourceMappingGroup> {
        let row: Option<ResourceMappingGroupRow> =
            sqlx::query_as(&format!("{GROUP_SELECT} WHERE g.id = $1"))
                .bind(id)
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
        row.ok_or(Error::NotFound)?.group()
    }

    async fn fetch_resource_mapping(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<ResourceMapping> {
        let row: Option<ResourceMappingRow> = sqlx::query_as(&format!(
            "SELECT {MAPPING_COLUMNS} FROM resource_mappings rm WHERE rm.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *connection)
        .await
        .into_core()?;
        Self::resource_mapping_from_row(connection, row.ok_or(Error::NotFound)?).await
    }

    async fn resource_mapping_from_row(
        connection: &mut AnyConnection,
        row: ResourceMappingRow,
    ) -> Result<ResourceMapping> {
        let attribute_value = Self::fetch_value_row(connection, &row.attribute_value_id)
            .await?
            .value()?;
        let group = match row.group_id.to_option() {
            Some(group_id) => Some(Self::fetch_resource_mapping_group(connection, &group_id).await?),
            None => None,
        };
        Ok(ResourceMapping {
            id: row.id,
            attribute_value,
            terms: serde_json::from_str(&row.terms)?,
            group,
            metadata: Metadata::from_row(&row.labels, row.created_at, row.updated_at)?,
        })
    }

    async fn check_resource_mapping_references(
        connection: &mut AnyConnection,
        attribute_value_id: &str,
        group_id: Option<&str>,
    ) -> Result<()> {
        check_uuid(attribute_value_id)?;
        Self::fetch_value_row(connection, attribute_value_id)
            .await
            .map_err(|e| Self::missing_reference(e, "attribute value", attribute_value_id))?;
        if let Some(group_id) = group_id.filter(|g| !g.is_empty()) {
            check_uuid(group_id)?;
            Self::fetch_resource_mapping_group(connection, group_id)
                .await
                .map_err(|e| Self::missing_reference(e, "resource mapping group", group_id))?;
        }
        Ok(())
    }
}

/// Low-level representation of a row in the resource_mapping_groups table
#[derive(FromRow)]
struct ResourceMappingGroupRow {
    id: String,
    namespace_id: String,
    name: String,
    namespace_name: String,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

impl ResourceMappingGroupRow {
    fn group(&self) -> Result<ResourceMappingGroup> {
        Ok(ResourceMappingGroup {
            id: self.id.clone(),
            namespace_id: self.namespace_id.clone(),
            name: self.name.clone(),
            fqn: fqn::resource_mapping_group_fqn(&self.namespace_name, &self.name),
            metadata: Metadata::from_row(&self.labels, self.created_at, self.updated_at)?,
        })
    }
}

/// Low-level representation of a row in the resource_mappings table
#[derive(FromRow)]
struct ResourceMappingRow {
    id: String,
    attribute_value_id: String,
    group_id: Nullable<String>,
    terms: String,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}
