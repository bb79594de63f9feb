use crate::fqn;
use crate::models::{
    CreateNamespaceRequest, Identifier, ListNamespacesRequest, ListResponse, MetadataMutable,
    Metadata, Namespace, PageRequest, UnsafeUpdateNamespaceRequest, UpdateNamespaceRequest,
    ActiveStateEnum,
};
use crate::storage::{
    CountRow, FqnEntityType, FqnIndex, GrantSubjectType, NamespacesRepository, PolicyDbClient,
};
use crate::validation::{check_uuid, normalize_name};
use async_trait::async_trait;
use opentdf_db::{now_micros, BigInteger, Boolean, Error, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use tracing::{debug, warn};
use uuid::Uuid;

const NAMESPACE_COLUMNS: &str = "n.id, n.name, n.active, n.labels, n.created_at, n.updated_at";

#[async_trait]
impl NamespacesRepository for PolicyDbClient {
    async fn get_namespace(&self, identifier: &Identifier) -> Result<Namespace> {
        let mut connection = self.read_connection().await?;
        let id = Self::resolve_namespace_id(&mut connection, identifier).await?;
        Self::fetch_namespace(&mut connection, &id).await
    }

    async fn list_namespaces(
        &self,
        request: &ListNamespacesRequest,
    ) -> Result<ListResponse<Namespace>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let condition = request.state.condition(&["n.active"]);
        let mut connection = self.read_connection().await?;

        let rows: Vec<NamespaceRow> = sqlx::query_as(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM attribute_namespaces n WHERE {condition}
             ORDER BY n.created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let count: CountRow = sqlx::query_as(&format!(
            "SELECT COUNT(*) AS total FROM attribute_namespaces n WHERE {condition}"
        ))
        .fetch_one(&mut *connection)
        .await
        .into_core()?;

        Ok(ListResponse {
            items: rows
                .into_iter()
                .map(|r| r.namespace())
                .collect::<Result<Vec<_>>>()?,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn list_all_namespaces(&self) -> Result<Vec<Namespace>> {
        let limit = self.configuration().list_request_limit_max;
        let mut namespaces = vec![];
        let mut offset = 0;
        loop {
            let page = self
                .list_namespaces(&ListNamespacesRequest {
                    state: ActiveStateEnum::Any,
                    pagination: PageRequest::new(limit, offset),
                })
                .await?;
            namespaces.extend(page.items);
            if page.pagination.next_offset == 0 {
                return Ok(namespaces);
            }
            offset = page.pagination.next_offset;
        }
    }

    async fn create_namespace(&self, request: &CreateNamespaceRequest) -> Result<Namespace> {
        let name = normalize_name("name", &request.name)?;
        let labels = MetadataMutable::labels_json(&request.metadata)?;
        let id = Uuid::new_v4().to_string();
        let now = now_micros();

        let mut transaction = self.begin().await?;
        sqlx::query(
            "INSERT INTO attribute_namespaces (id, name, active, labels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(&name)
        .bind(true)
        .bind(labels)
        .bind(now)
        .bind(now)
        .execute(&mut *transaction)
        .await
        .void()?;
        FqnIndex::index(
            &mut transaction,
            &id,
            FqnEntityType::Namespace,
            &id,
            &fqn::namespace_fqn(&name),
        )
        .await?;
        let namespace = Self::fetch_namespace(&mut transaction, &id).await?;
        transaction.commit().await?;
        debug!(%name, %id, "namespace created");
        Ok(namespace)
    }

    async fn update_namespace(&self, request: &UpdateNamespaceRequest) -> Result<Namespace> {
        check_uuid(&request.id)?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_namespace_row(&mut transaction, &request.id).await?;
        let labels = MetadataMutable::updated_labels(
            current.metadata()?.labels,
            &request.metadata,
            request.metadata_update_behavior,
        );
        sqlx::query("UPDATE attribute_namespaces SET labels = $1, updated_at = $2 WHERE id = $3")
            .bind(serde_json::to_string(&labels)?)
            .bind(now_micros())
            .bind(&request.id)
            .execute(&mut *transaction)
            .await
            .void()?;
        let namespace = Self::fetch_namespace(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(namespace)
    }

    async fn deactivate_namespace(&self, id: &str) -> Result<Namespace> {
        check_uuid(id)?;
        let now = now_micros();
        let mut transaction = self.begin().await?;
        let result =
            sqlx::query("UPDATE attribute_namespaces SET active = $1, updated_at = $2 WHERE id = $3")
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
            "UPDATE attribute_definitions SET active = $1, updated_at = $2 WHERE namespace_id = $3",
        )
        .bind(false)
        .bind(now)
        .bind(id)
        .execute(&mut *transaction)
        .await
        .void()?;
        sqlx::query(
            "UPDATE attribute_values SET active = $1, updated_at = $2
             WHERE attribute_definition_id IN (SELECT id FROM attribute_definitions WHERE namespace_id = $3)",
        )
        .bind(false)
        .bind(now)
        .bind(id)
        .execute(&mut *transaction)
        .await
        .void()?;
        let namespace = Self::fetch_namespace(&mut transaction, id).await?;
        transaction.commit().await?;
        debug!(%id, "namespace deactivated with its attributes and values");
        Ok(namespace)
    }

    async fn unsafe_update_namespace(
        &self,
        request: &UnsafeUpdateNamespaceRequest,
    ) -> Result<Namespace> {
        check_uuid(&request.id)?;
        let name = normalize_name("name", &request.name)?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_namespace_row(&mut transaction, &request.id).await?;
        Self::check_current_fqn(&fqn::namespace_fqn(&current.name), &request.current_fqn)?;

        sqlx::query("UPDATE attribute_namespaces SET name = $1, updated_at = $2 WHERE id = $3")
            .bind(&name)
            .bind(now_micros())
            .bind(&request.id)
            .execute(&mut *transaction)
            .await
            .void()?;
        FqnIndex::reindex_namespace(&mut transaction, &request.id).await?;
        let namespace = Self::fetch_namespace(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        warn!(from = %current.name, to = %name, "namespace renamed");
        Ok(namespace)
    }

    async fn unsafe_reactivate_namespace(&self, id: &str) -> Result<Namespace> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let result =
            sqlx::query("UPDATE attribute_namespaces SET active = $1, updated_at = $2 WHERE id = $3")
                .bind(true)
                .bind(now_micros())
                .bind(id)
                .execute(&mut *transaction)
                .await
                .into_core()?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        let namespace = Self::fetch_namespace(&mut transaction, id).await?;
        transaction.commit().await?;
        Ok(namespace)
    }

    async fn unsafe_delete_namespace(&self, id: &str, fqn: &str) -> Result<Namespace> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let namespace = Self::fetch_namespace(&mut transaction, id).await?;
        Self::check_current_fqn(&namespace.fqn, fqn)?;
        sqlx::query("DELETE FROM attribute_namespaces WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        warn!(name = %namespace.name, "namespace deleted with all its content");
        Ok(namespace)
    }
}

impl PolicyDbClient {
    /// Return a namespace with its grants and keys
    pub(crate) async fn fetch_namespace(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<Namespace> {
        let mut namespace = Self::fetch_namespace_row(connection, id).await?.namespace()?;
        namespace.grants =
            Self::fetch_grants(connection, GrantSubjectType::Namespace, id).await?;
        namespace.kas_keys =
            Self::fetch_mapped_keys(connection, GrantSubjectType::Namespace, id).await?;
        Ok(namespace)
    }

    /// Return the id of a namespace given by id, FQN or name
    pub(crate) async fn resolve_namespace_id(
        connection: &mut AnyConnection,
        identifier: &Identifier,
    ) -> Result<String> {
        match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                Ok(id.clone())
            }
            Identifier::Fqn(fqn) => {
                FqnIndex::lookup(connection, fqn, FqnEntityType::Namespace).await
            }
            Identifier::Name(name) => {
                FqnIndex::lookup(connection, &fqn::namespace_fqn(name), FqnEntityType::Namespace)
                    .await
            }
            _ => Err(Error::UnknownSelectIdentifier),
        }
    }

    pub(crate) async fn fetch_namespace_row(
        connection: &mut AnyConnection,
        id: &str,
    ) -> Result<NamespaceRow> {
        let row: Option<NamespaceRow> = sqlx::query_as(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM attribute_namespaces n WHERE n.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *connection)
        .await
        .into_core()?;
        row.ok_or(Error::NotFound)
    }

    /// Check the FQN provided by a client for an unsafe change.
    /// A different FQN means that the client does not target the expected entity.
    pub(crate) fn check_current_fqn(actual: &str, provided: &str) -> Result<()> {
        if actual == provided.trim().to_lowercase() {
            Ok(())
        } else {
            debug!(%actual, %provided, "the provided FQN does not match the current FQN");
            Err(Error::NotFound)
        }
    }
}

/// Low-level representation of a row in the attribute_namespaces table
#[derive(FromRow)]
pub(crate) struct NamespaceRow {
    pub(crate) id: String,
    pub(crate) name: String,
    active: Boolean,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

impl NamespaceRow {
    pub(crate) fn metadata(&self) -> Result<Metadata> {
        Metadata::from_row(&self.labels, self.created_at, self.updated_at)
    }

    /// Return the namespace without its grants and keys
    pub(crate) fn namespace(self) -> Result<Namespace> {
        Ok(Namespace {
            metadata: self.metadata()?,
            fqn: fqn::namespace_fqn(&self.name),
            active: self.active.to_bool(),
            id: self.id,
            name: self.name,
            grants: vec![],
            kas_keys: vec![],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{
        CreateAttributeRequest, AttributeRuleType, ListAttributesRequest, MetadataUpdateEnum,
    };
    use crate::storage::AttributesRepository;
    use opentdf_db::ErrorKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_repository() -> Result<()> {
        let repository = create_repository("namespaces").await?;

        // a namespace name is normalized to lower-case
        let created = repository
            .create_namespace(&CreateNamespaceRequest {
                name: "TeStInG.org".to_string(),
                metadata: Some(MetadataMutable::default().with_label("owner", "alice")),
            })
            .await?;
        assert_eq!(created.name, "testing.org");
        assert_eq!(created.fqn, "https://testing.org");
        assert!(created.active);

        // it can be retrieved by id, FQN or name
        let by_id = repository.get_namespace(&Identifier::id(&created.id)).await?;
        assert_eq!(by_id, created);

        // timestamps are read back as microseconds
        let metadata = &by_id.metadata;
        assert!(metadata.created_at > 1_600_000_000_000_000, "{metadata:?}");
        assert!(metadata.updated_at >= metadata.created_at);
        let by_fqn = repository
            .get_namespace(&Identifier::fqn("HTTPS://TESTING.ORG"))
            .await?;
        assert_eq!(by_fqn.id, created.id);
        let by_name = repository.get_namespace(&Identifier::name("testing.org")).await?;
        assert_eq!(by_name.id, created.id);

        // names are unique
        let error = repository
            .create_namespace(&CreateNamespaceRequest::new("testing.org"))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::UniqueConstraintViolation));

        // metadata labels can be extended or replaced
        let updated = repository
            .update_namespace(&UpdateNamespaceRequest {
                id: created.id.clone(),
                metadata: Some(MetadataMutable::default().with_label("team", "blue")),
                metadata_update_behavior: MetadataUpdateEnum::Extend,
            })
            .await?;
        assert_eq!(updated.metadata.labels.len(), 2);
        assert!(updated.metadata.updated_at > created.metadata.updated_at);
        let replaced = repository
            .update_namespace(&UpdateNamespaceRequest {
                id: created.id.clone(),
                metadata: Some(MetadataMutable::default().with_label("team", "red")),
                metadata_update_behavior: MetadataUpdateEnum::Replace,
            })
            .await?;
        assert_eq!(
            replaced.metadata.labels.into_iter().collect::<Vec<_>>(),
            vec![("team".to_string(), "red".to_string())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_requests() -> Result<()> {
        let repository = create_repository("namespaces_invalid").await?;

        let error = repository.get_namespace(&Identifier::Unspecified).await.unwrap_err();
        assert!(error.is(ErrorKind::UnknownSelectIdentifier));
        let error = repository.get_namespace(&Identifier::id("not-a-uuid")).await.unwrap_err();
        assert!(error.is(ErrorKind::UuidInvalid));
        let error = repository
            .get_namespace(&Identifier::id(Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));
        let error = repository
            .create_namespace(&CreateNamespaceRequest::new("no spaces.org"))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::InvalidName));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_pagination() -> Result<()> {
        let repository = create_repository("namespaces_pagination").await?.with_configuration(
            crate::PolicyConfiguration::new(2, 3)?,
        );
        for i in 0..5 {
            repository
                .create_namespace(&CreateNamespaceRequest::new(format!("ns{i}.org")))
                .await?;
        }

        // the default limit is used when no limit is given, most recent first
        let page = repository
            .list_namespaces(&ListNamespacesRequest::default())
            .await?;
        assert_eq!(
            page.items.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
            vec!["ns4.org", "ns3.org"]
        );
        assert_eq!(page.pagination.total, 5);
        assert_eq!(page.pagination.next_offset, 2);

        // the maximum limit is accepted, a larger one is not
        let page = repository
            .list_namespaces(&ListNamespacesRequest {
                pagination: PageRequest::new(3, 3),
                ..Default::default()
            })
            .await?;
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.pagination.next_offset, 0);
        let error = repository
            .list_namespaces(&ListNamespacesRequest {
                pagination: PageRequest::new(4, 0),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::ListLimitTooLarge));

        // an offset past the end returns an empty page
        let page = repository
            .list_namespaces(&ListNamespacesRequest {
                pagination: PageRequest::new(3, 10),
                ..Default::default()
            })
            .await?;
        assert!(page.items.is_empty());

        assert_eq!(repository.list_all_namespaces().await?.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_deactivation_cascades_to_listings() -> Result<()> {
        let repository = create_repository("namespaces_deactivation").await?;
        let namespace = repository
            .create_namespace(&CreateNamespaceRequest::new("deactivated.org"))
            .await?;
        let attribute = create_attribute(&repository, &namespace.id, "level").await?;

        let deactivated = repository.deactivate_namespace(&namespace.id).await?;
        assert!(!deactivated.active);

        // get still returns the deactivated descendants
        let attribute = repository.get_attribute(&Identifier::id(&attribute.id)).await?;
        assert!(!attribute.active);
        assert!(attribute.values.iter().all(|v| !v.active));

        let listed = |state| {
            let repository = repository.clone();
            async move {
                repository
                    .list_attributes(&ListAttributesRequest {
                        state,
                        ..Default::default()
                    })
                    .await
                    .map(|page| page.items.len())
            }
        };
        assert_eq!(listed(ActiveStateEnum::Active).await?, 0);
        assert_eq!(listed(ActiveStateEnum::Inactive).await?, 1);
        assert_eq!(listed(ActiveStateEnum::Any).await?, 1);

        // reactivating the namespace does not reactivate its attributes
        let reactivated = repository.unsafe_reactivate_namespace(&namespace.id).await?;
        assert!(reactivated.active);
        let attribute = repository.get_attribute(&Identifier::id(&attribute.id)).await?;
        assert!(!attribute.active);
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_and_delete() -> Result<()> {
        let repository = create_repository("namespaces_rename").await?;
        let namespace = repository
            .create_namespace(&CreateNamespaceRequest::new("x.org"))
            .await?;
        let attribute = create_attribute(&repository, &namespace.id, "a1").await?;
        let fqns = |attribute: &crate::models::Attribute| {
            attribute.values.iter().map(|v| v.fqn.clone()).collect::<Vec<_>>()
        };
        let original_fqns = fqns(&attribute);

        // the current FQN must be provided to rename
        let error = repository
            .unsafe_update_namespace(&UnsafeUpdateNamespaceRequest {
                id: namespace.id.clone(),
                current_fqn: "https://wrong.org".to_string(),
                name: "y.org".to_string(),
            })
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));

        let renamed = repository
            .unsafe_update_namespace(&UnsafeUpdateNamespaceRequest {
                id: namespace.id.clone(),
                current_fqn: "https://x.org".to_string(),
                name: "Y.org".to_string(),
            })
            .await?;
        assert_eq!(renamed.fqn, "https://y.org");
        let moved = repository
            .get_attribute(&Identifier::fqn("https://y.org/attr/a1"))
            .await?;
        assert_eq!(moved.fqn, "https://y.org/attr/a1");
        assert_eq!(
            fqns(&moved),
            vec!["https://y.org/attr/a1/value/v1", "https://y.org/attr/a1/value/v2"]
        );
        let error = repository
            .get_attribute(&Identifier::fqn("https://x.org/attr/a1"))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));

        // renaming back restores all the FQNs
        repository
            .unsafe_update_namespace(&UnsafeUpdateNamespaceRequest {
                id: namespace.id.clone(),
                current_fqn: "https://y.org".to_string(),
                name: "x.org".to_string(),
            })
            .await?;
        let restored = repository
            .get_attribute(&Identifier::fqn("https://x.org/attr/a1"))
            .await?;
        assert_eq!(fqns(&restored), original_fqns);

        // a deleted namespace name can be reused
        repository
            .unsafe_delete_namespace(&namespace.id, "https://x.org")
            .await?;
        let error = repository
            .get_attribute(&Identifier::id(&attribute.id))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));
        repository
            .create_namespace(&CreateNamespaceRequest::new("x.org"))
            .await?;
        Ok(())
    }

    /// HELPERS
    async fn create_repository(usage: &str) -> Result<PolicyDbClient> {
        PolicyDbClient::in_memory(usage).await
    }

    async fn create_attribute(
        repository: &PolicyDbClient,
        namespace_id: &str,
        name: &str,
    ) -> Result<crate::models::Attribute> {
        repository
            .create_attribute(&CreateAttributeRequest {
                namespace_id: namespace_id.to_string(),
                name: name.to_string(),
                rule: AttributeRuleType::AnyOf,
                values: vec!["v1".to_string(), "v2".to_string()],
                metadata: None,
            })
            .await
    }
}
