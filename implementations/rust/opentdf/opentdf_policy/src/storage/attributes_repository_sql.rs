use crate::fqn::{self, Fqn};
use crate::models::{
    Attribute, AttributeAndValue, AttributeRuleType, CreateAttributeRequest, Identifier,
    ListAttributesRequest, ListResponse, Metadata, MetadataMutable, Namespace,
    UnsafeUpdateAttributeRequest, UpdateAttributeRequest,
};
use crate::storage::{
    AttributesRepository, CountRow, FqnEntityType, FqnIndex, GrantSubjectType, PolicyDbClient,
};
use crate::validation::{check_uuid, normalize_name, normalize_value};
use async_trait::async_trait;
use itertools::Itertools;
use opentdf_db::{now_micros, BigInteger, Boolean, Error, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use uuid::Uuid;

const ATTRIBUTE_SELECT: &str = "SELECT ad.id, ad.namespace_id, ad.name, ad.rule, ad.values_order, ad.active,
       ad.labels, ad.created_at, ad.updated_at, n.name AS namespace_name, n.active AS namespace_active
FROM attribute_definitions ad
JOIN attribute_namespaces n ON n.id = ad.namespace_id";

#[async_trait]
impl AttributesRepository for PolicyDbClient {
    async fn get_attribute(&self, identifier: &Identifier) -> Result<Attribute> {
        let mut connection = self.read_connection().await?;
        let id = match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                id.clone()
            }
            Identifier::Fqn(fqn) => {
                let attribute_fqn = fqn.parse::<Fqn>()?.attribute_fqn().ok_or(Error::NotFound)?;
                FqnIndex::lookup(&mut connection, &attribute_fqn, FqnEntityType::Attribute).await?
            }
            _ => return Err(Error::UnknownSelectIdentifier),
        };
        Self::fetch_attribute(&mut connection, &id).await
    }

    async fn list_attributes(
        &self,
        request: &ListAttributesRequest,
    ) -> Result<ListResponse<Attribute>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let mut condition = request.state.condition(&["n.active", "ad.active"]);
        let namespace = request
            .namespace
            .as_ref()
            .filter(|n| !n.trim().is_empty())
            .map(|n| n.trim().to_lowercase());
        if namespace.is_some() {
            condition.push_str(" AND (n.id = $3 OR n.name = $3)");
        }

        let mut connection = self.read_connection().await?;
        let sql = format!(
            "{ATTRIBUTE_SELECT} WHERE {condition} ORDER BY ad.created_at DESC LIMIT $1 OFFSET $2"
        );
        let mut query = sqlx::query_as::<_, AttributeRow>(&sql)
            .bind(limit)
            .bind(offset);
        if let Some(namespace) = &namespace {
            query = query.bind(namespace);
        }
        let rows = query.fetch_all(&mut *connection).await.into_core()?;

        // the count query binds the namespace as its first parameter
        let count_condition = condition.replace("$3", "$1");
        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM attribute_definitions ad
             JOIN attribute_namespaces n ON n.id = ad.namespace_id WHERE {count_condition}"
        );
        let mut count_query = sqlx::query_as::<_, CountRow>(&count_sql);
        if let Some(namespace) = &namespace {
            count_query = count_query.bind(namespace);
        }
        let count = count_query.fetch_one(&mut *connection).await.into_core()?;

        let mut items = vec![];
        for row in rows {
            items.push(Self::attribute_from_row(&mut connection, row, false).await?);
        }
        Ok(ListResponse {
            items,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn get_attributes_by_value_fqns(
        &self,
        fqns: &[String],
    ) -> Result<BTreeMap<String, AttributeAndValue>> {
        if fqns.is_empty() {
            return Err(Error::MissingValue { field: "fqns" });
        }
        // all the FQNs are checked before reading anything
        let parsed = fqns
            .iter()
            .map(|f| {
                let parsed = f.parse::<Fqn>()?;
                if parsed.is_value() {
                    Ok(parsed.to_string())
                } else {
                    Err(Error::FqnMissingValue { fqn: f.clone() })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut connection = self.read_connection().await?;
        let mut result = BTreeMap::new();
        for fqn in parsed.into_iter().unique() {
            let value_id = FqnIndex::lookup(&mut connection, &fqn, FqnEntityType::Value).await?;
            let value = Self::fetch_value(&mut connection, &value_id).await?;
            let attribute = Self::fetch_attribute(&mut connection, &value.attribute_id).await?;
            result.insert(fqn, AttributeAndValue { attribute, value });
        }
        Ok(result)
    }

    async fn create_attribute(&self, request: &CreateAttributeRequest) -> Result<Attribute> {
        check_uuid(&request.namespace_id)?;
        let name = normalize_name("name", &request.name)?;
        let values = request
            .values
            .iter()
            .map(|v| normalize_value("value", v))
            .collect::<Result<Vec<_>>>()?;
        let labels = MetadataMutable::labels_json(&request.metadata)?;
        let id = Uuid::new_v4().to_string();
        let now = now_micros();

        let mut transaction = self.begin().await?;
        let namespace = match Self::fetch_namespace_row(&mut transaction, &request.namespace_id).await
        {
            Err(e) if e.is(opentdf_db::ErrorKind::NotFound) => {
                return Err(Error::ForeignKeyViolation {
                    detail: Some(format!("namespace {} not found", request.namespace_id)),
                })
            }
            other => other?,
        };
        sqlx::query(
            "INSERT INTO attribute_definitions (id, namespace_id, name, rule, values_order, active, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&id)
        .bind(&namespace.id)
        .bind(&name)
        .bind(request.rule.as_str())
        .bind("[]")
        .bind(true)
        .bind(labels)
        .bind(now)
        .bind(now)
        .execute(&mut *transaction)
        .await
        .void()?;
        FqnIndex::index(
            &mut transaction,
            &namespace.id,
            FqnEntityType::Attribute,
            &id,
            &fqn::attribute_fqn(&namespace.name, &name),
        )
        .await?;

        let mut values_order = vec![];
        for value in values {
            let value_id =
                Self::insert_value(&mut transaction, &namespace.id, &namespace.name, &id, &name, &value, "{}")
                    .await?;
            values_order.push(value_id);
        }
        Self::set_values_order(&mut transaction, &id, &values_order).await?;

        let attribute = Self::fetch_attribute(&mut transaction, &id).await?;
        transaction.commit().await?;
        debug!(fqn = %attribute.fqn, "attribute created");
        Ok(attribute)
    }

    async fn update_attribute(&self, request: &UpdateAttributeRequest) -> Result<Attribute> {
        check_uuid(&request.id)?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_attribute_row(&mut transaction, &request.id).await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata()?.labels,
            &request.metadata,
            request.metadata_update_behavior,
        );
        sqlx::query("UPDATE attribute_definitions SET labels = $1, updated_at = $2 WHERE id = $3")
            .bind(serde_json::to_string(&labels)?)
            .bind(now_micros())
            .bind(&request.id)
            .execute(&mut *transaction)
            .await
            .void()?;
        let attribute = Self::fetch_attribute(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(attribute)
    }

    async fn deactivate_attribute(&self, id: &str) -> Result<Attribute> {
        check_uuid(id)?;
        let now = now_micros();
        let mut transaction = self.begin().await?;
        let result = sqlx::query(
            "UPDATE attribute_definitions SET active = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(false)
        .bind(now)
        .bind(id)
        .execute(&mut *transaction)
        .await
        .into_core()?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        sqlx::query(
            "UPDATE attribute_values SET active = $1, updated_at = $2 WHERE attribute_definition_id = $3",
        )
        .bind(false)
        .bind(now)
        .bind(id)
        .execute(&mut *transaction)
        .await
        .void()?;
        let attribute = Self::fetch_attribute(&mut transaction, id).await?;
        transaction.commit().await?;
        Ok(attribute)
    }

    async fn unsafe_update_attribute(
        &self,
        request: &UnsafeUpdateAttributeRequest,
    ) -> Result<Attribute> {
        check_uuid(&request.id)?;
        let name = request
            .name
            .as_ref()
            .map(|n| normalize_name("name", n))
            .transpose()?;

        let mut transaction = self.begin().await?;
        let current = Self::fetch_attribute_row(&mut transaction, &request.id).await?;
        Self::check_current_fqn(
            &fqn::attribute_fqn(&current.namespace_name, &current.name),
            &request.current_fqn,
        )?;

        let values_order = match &request.values_order {
            Some(order) => {
                let current_order = current.values_order()?;
                let expected: BTreeSet<&String> = current_order.iter().collect();
                let provided: BTreeSet<&String> = order.iter().collect();
                if order.len() != current_order.len() || expected != provided {
                    return Err(Error::ForeignKeyViolation {
                        detail: Some(
                            "values_order must contain each value of the attribute once"
                                .to_string(),
                        ),
                    });
                }
                order.clone()
            }
            None => current.values_order()?,
        };
        let rule = request.rule.unwrap_or(current.rule()?);

        sqlx::query(
            "UPDATE attribute_definitions SET name = $1, rule = $2, values_order = $3, updated_at = $4 WHERE id = $5",
        )
        .bind(name.as_ref().unwrap_or(&current.name))
        .bind(rule.as_str())
        .bind(serde_json::to_string(&values_order)?)
        .bind(now_micros())
        .bind(&request.id)
        .execute(&mut *transaction)
        .await
        .void()?;
        if name.is_some() {
            FqnIndex::reindex_namespace(&mut transaction, &current.namespace_id).await?;
        }
        let attribute = Self::fetch_attribute(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        warn!(from = %current.name, fqn = %attribute.fqn, "attribute changed");
        Ok(attribute)
    }

    async fn unsafe_reactivate_attribute(&self, id: &str) -> Result<Attribute> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let result = sqlx::query(
            "UPDATE attribute_definitions SET active = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(true)
        .bind(now_micros())
        .bind(id)
        .execute(&mut *transaction)
        .await
        .into_core()?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        let attribute = Self::fetch_attribute(&mut transaction, id).await?;
        transaction.commit().await?;
        Ok(attribute)
    }

    async fn unsafe_delete_attribute(&self, id: &str, fqn: &str) -> Result<Attribute> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let attribute = Self::fetch_attribute(&mut transaction, id).await?;
        Self::check_current_fqn(&attribute.fqn, fqn)?;
        sqlx::query(
            "DELETE FROM fqn_index WHERE entity_id = $1
             OR entity_id IN (SELECT id FROM attribute_values WHERE attribute_definition_id = $1)",
        )
        .bind(id)
        .execute(&mut *transaction)
        .await
        .void()?;
        sqlx::query("DELETE FROM attribute_definitions WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        warn!(fqn = %attribute.fqn, "attribute deleted with its values");
        Ok(attribute)
    }
}

impl PolicyDbClient {
    /// Return an attribute with its values, grants and keys
    pub(crate) async fn fetch_attribute(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<Attribute> {
        let row = Self::fetch_attribute_row(connection, id).await?;
        Self::attribute_from_row(connection, row, true).await
    }

    pub(crate) async fn fetch_attribute_row(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<AttributeRow> {
        let row: Option<AttributeRow> =
            sqlx::query_as(&format!("{ATTRIBUTE_SELECT} WHERE ad.id = $1"))
                .bind(id)
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
        row.ok_or(Error::NotFound)
    }

    async fn attribute_from_row(
        connection: &mut AnyConnection,
        row: AttributeRow,
        with_grants: bool,
    ) -> Result<Attribute> {
        let values_order = row.values_order()?;
        let mut values = Self::fetch_values_of_attribute(connection, &row.id).await?;
        values.sort_by_key(|v| {
            values_order
                .iter()
                .position(|id| id == &v.id)
                .unwrap_or(usize::MAX)
        });
        let mut attribute = Attribute {
            id: row.id.clone(),
            namespace: Namespace {
                id: row.namespace_id.clone(),
                fqn: fqn::namespace_fqn(&row.namespace_name),
                name: row.namespace_name.clone(),
                active: row.namespace_active.to_bool(),
                ..Default::default()
            },
            fqn: fqn::attribute_fqn(&row.namespace_name, &row.name),
            rule: row.rule()?,
            active: row.active.to_bool(),
            metadata: row.metadata()?,
            name: row.name,
            values,
            grants: vec![],
            kas_keys: vec![],
        };
        if with_grants {
            attribute.grants =
                Self::fetch_grants(connection, GrantSubjectType::Attribute, &attribute.id).await?;
            attribute.kas_keys =
                Self::fetch_mapped_keys(connection, GrantSubjectType::Attribute, &attribute.id)
                    .await?;
            for value in attribute.values.iter_mut() {
                value.grants =
                    Self::fetch_grants(connection, GrantSubjectType::Value, &value.id).await?;
                value.kas_keys =
                    Self::fetch_mapped_keys(connection, GrantSubjectType::Value, &value.id).await?;
            }
        }
        Ok(attribute)
    }

    /// Insert a value and index its FQN. Return the id of the new value
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn insert_value(
        connection: &mut AnyConnection,
        namespace_id: &str,
        namespace_name: &str,
        attribute_id: &str,
        attribute_name: &str,
        value: &str,
        labels: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = now_micros();
        sqlx::query(
            "INSERT INTO attribute_values (id, attribute_definition_id, value, active, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&id)
        .bind(attribute_id)
        .bind(value)
        .bind(true)
        .bind(labels)
        .bind(now)
        .bind(now)
        .execute(&mut *connection)
        .await
        .void()?;
        FqnIndex::index(
            connection,
            namespace_id,
            FqnEntityType::Value,
            &id,
            &fqn::value_fqn(namespace_name, attribute_name, value),
        )
        .await?;
        Ok(id)
    }

    pub(crate) async fn set_values_order(
        connection: &mut AnyConnection,
        attribute_id: &str,
        values_order: &[String],
    ) -> Result<()> {
        sqlx::query("UPDATE attribute_definitions SET values_order = $1 WHERE id = $2")
            .bind(serde_json::to_string(values_order)?)
            .bind(attribute_id)
            .execute(&mut *connection)
            .await
            .void()
    }
}

/// Low-level representation of a row in the attribute_definitions table, joined with its namespace
#[derive(FromRow)]
pub(crate) struct AttributeRow {
    pub(crate) id: String,
    pub(crate) namespace_id: String,
    pub(crate) name: String,
    rule: String,
    values_order: String,
    active: Boolean,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
    pub(crate) namespace_name: String,
    namespace_active: Boolean,
}

impl AttributeRow {
    pub(crate) fn rule(&self) -> Result<AttributeRuleType> {
        self.rule.parse()
    }

    pub(crate) fn values_order(&self) -> Result<Vec<String>> {
        Ok(serde_json::from_str(&self.values_order)?)
    }

    pub(crate) fn metadata(&self) -> Result<Metadata> {
        Metadata::from_row(&self.labels, self.created_at, self.updated_at)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{
        ActiveStateEnum, CreateAttributeValueRequest, CreateNamespaceRequest, PageRequest,
    };
    use crate::storage::{AttributeValuesRepository, NamespacesRepository};
    use opentdf_db::ErrorKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_repository() -> Result<()> {
        let repository = create_repository("attributes").await?;
        let namespace = create_namespace(&repository, "testing.org").await?;

        let attribute = repository
            .create_attribute(&CreateAttributeRequest {
                namespace_id: namespace.id.clone(),
                name: "A1".to_string(),
                rule: AttributeRuleType::Hierarchy,
                values: vec!["FIRST".into(), "SECOND".into(), "THIRD".into()],
                metadata: None,
            })
            .await?;
        assert_eq!(attribute.name, "a1");
        assert_eq!(attribute.fqn, "https://testing.org/attr/a1");
        assert_eq!(attribute.rule, AttributeRuleType::Hierarchy);
        assert_eq!(attribute.namespace.name, "testing.org");
        assert_eq!(values(&attribute), vec!["first", "second", "third"]);
        assert_eq!(
            attribute.values[0].fqn,
            "https://testing.org/attr/a1/value/first"
        );

        // the attribute can be retrieved by its FQN or the FQN of one of its values
        let by_fqn = repository
            .get_attribute(&Identifier::fqn("https://testing.org/attr/A1"))
            .await?;
        assert_eq!(by_fqn, attribute);
        let by_value_fqn = repository
            .get_attribute(&Identifier::fqn("https://testing.org/attr/a1/value/second"))
            .await?;
        assert_eq!(by_value_fqn.id, attribute.id);

        // names are unique in a namespace
        let error = repository
            .create_attribute(&CreateAttributeRequest {
                namespace_id: namespace.id.clone(),
                name: "a1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::UniqueConstraintViolation));

        // the namespace must exist
        let error = repository
            .create_attribute(&CreateAttributeRequest {
                namespace_id: Uuid::new_v4().to_string(),
                name: "a2".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::ForeignKeyViolation));
        Ok(())
    }

    #[tokio::test]
    async fn test_values_order_is_preserved() -> Result<()> {
        let repository = create_repository("attributes_order").await?;
        let namespace = create_namespace(&repository, "testing.org").await?;
        let attribute = create_attribute(&repository, &namespace.id, "a1").await?;

        repository
            .create_attribute_value(&CreateAttributeValueRequest {
                attribute_id: attribute.id.clone(),
                value: "FOURTH".to_string(),
                metadata: None,
            })
            .await?;
        let second = attribute.value("second").unwrap();
        repository.deactivate_attribute_value(&second.id).await?;

        let attribute = repository.get_attribute(&Identifier::id(&attribute.id)).await?;
        assert_eq!(values(&attribute), vec!["first", "second", "third", "fourth"]);
        assert!(!attribute.value("second").unwrap().active);

        // the attribute stays in the active list, the value is listed as inactive
        let page = repository
            .list_attributes(&ListAttributesRequest {
                state: ActiveStateEnum::Active,
                namespace: Some("testing.org".to_string()),
                pagination: PageRequest::default(),
            })
            .await?;
        assert_eq!(page.items.len(), 1);
        assert_eq!(values(&page.items[0]), vec!["first", "second", "third", "fourth"]);

        // the order can be changed, as long as it contains every value
        let ids: Vec<String> = attribute.values.iter().rev().map(|v| v.id.clone()).collect();
        let reordered = repository
            .unsafe_update_attribute(&UnsafeUpdateAttributeRequest {
                id: attribute.id.clone(),
                current_fqn: attribute.fqn.clone(),
                values_order: Some(ids.clone()),
                ..Default::default()
            })
            .await?;
        assert_eq!(values(&reordered), vec!["fourth", "third", "second", "first"]);
        let error = repository
            .unsafe_update_attribute(&UnsafeUpdateAttributeRequest {
                id: attribute.id.clone(),
                current_fqn: attribute.fqn.clone(),
                values_order: Some(ids[1..].to_vec()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::ForeignKeyViolation));
        Ok(())
    }

    #[tokio::test]
    async fn test_get_attributes_by_value_fqns() -> Result<()> {
        let repository = create_repository("attributes_by_value_fqns").await?;
        let namespace = create_namespace(&repository, "testing.org").await?;
        let attribute = create_attribute(&repository, &namespace.id, "a1").await?;

        let fqn = "https://testing.org/attr/a1/value/first".to_string();
        let result = repository
            .get_attributes_by_value_fqns(&[fqn.to_uppercase()])
            .await?;
        let found = result.get(&fqn).unwrap();
        assert_eq!(found.value.value, "first");
        assert_eq!(found.attribute.id, attribute.id);
        assert_eq!(found.attribute.values.len(), 3);

        // only value FQNs are accepted
        let error = repository
            .get_attributes_by_value_fqns(&["https://testing.org/attr/a1".to_string()])
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::FqnMissingValue));
        let error = repository
            .get_attributes_by_value_fqns(&["https://testing.org/attr/a1/value/unknown".to_string()])
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn test_unsafe_changes() -> Result<()> {
        let repository = create_repository("attributes_unsafe").await?;
        let namespace = create_namespace(&repository, "testing.org").await?;
        let attribute = create_attribute(&repository, &namespace.id, "a1").await?;

        let renamed = repository
            .unsafe_update_attribute(&UnsafeUpdateAttributeRequest {
                id: attribute.id.clone(),
                current_fqn: attribute.fqn.clone(),
                name: Some("renamed".to_string()),
                rule: Some(AttributeRuleType::AllOf),
                values_order: None,
            })
            .await?;
        assert_eq!(renamed.fqn, "https://testing.org/attr/renamed");
        assert_eq!(renamed.rule, AttributeRuleType::AllOf);
        assert_eq!(
            renamed.values[0].fqn,
            "https://testing.org/attr/renamed/value/first"
        );
        let value = repository
            .get_attribute_value(&Identifier::fqn("https://testing.org/attr/renamed/value/third"))
            .await?;
        assert_eq!(value.value, "third");

        // deactivation cascades to the values, reactivation does not
        repository.deactivate_attribute(&attribute.id).await?;
        let reactivated = repository.unsafe_reactivate_attribute(&attribute.id).await?;
        assert!(reactivated.active);
        assert!(reactivated.values.iter().all(|v| !v.active));

        // deletion removes the values and their FQNs
        repository
            .unsafe_delete_attribute(&attribute.id, "https://testing.org/attr/renamed")
            .await?;
        let error = repository
            .get_attribute_value(&Identifier::fqn("https://testing.org/attr/renamed/value/third"))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));
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

    async fn create_attribute(
        repository: &PolicyDbClient,
        namespace_id: &str,
        name: &str,
    ) -> Result<Attribute> {
        repository
            .create_attribute(&CreateAttributeRequest {
                namespace_id: namespace_id.to_string(),
                name: name.to_string(),
                rule: AttributeRuleType::Hierarchy,
                values: vec!["first".into(), "second".into(), "third".into()],
                metadata: None,
            })
            .await
    }

    fn values(attribute: &Attribute) -> Vec<&str> {
        attribute.values.iter().map(|v| v.value.as_str()).collect()
    }
}
