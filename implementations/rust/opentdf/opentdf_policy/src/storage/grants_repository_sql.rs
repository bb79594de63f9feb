use crate::models::{
    GrantSubject, GrantedPolicyObject, KeyAccessServer, KeyAccessServerGrants, SimpleKasKey,
};
use crate::storage::{
    CountRow, GrantsRepository, KasKeyRow, KasRow, PolicyDbClient, KAS_COLUMNS, KAS_KEY_SELECT,
};
use crate::validation::check_uuid;
use async_trait::async_trait;
use opentdf_db::{now_micros, Error, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use tracing::debug;

/// Types of the entities which can be granted to a key access server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GrantSubjectType {
    Namespace,
    Attribute,
    Value,
}

impl GrantSubjectType {
    pub(crate) fn grants_table(&self) -> &'static str {
        match self {
            GrantSubjectType::Namespace => "attribute_namespace_key_access_grants",
            GrantSubjectType::Attribute => "attribute_definition_key_access_grants",
            GrantSubjectType::Value => "attribute_value_key_access_grants",
        }
    }

    pub(crate) fn keys_table(&self) -> &'static str {
        match self {
            GrantSubjectType::Namespace => "attribute_namespace_public_key_map",
            GrantSubjectType::Attribute => "attribute_definition_public_key_map",
            GrantSubjectType::Value => "attribute_value_public_key_map",
        }
    }

    pub(crate) fn subject_column(&self) -> &'static str {
        match self {
            GrantSubjectType::Namespace => "namespace_id",
            GrantSubjectType::Attribute => "attribute_definition_id",
            GrantSubjectType::Value => "attribute_value_id",
        }
    }

    fn entity_table(&self) -> &'static str {
        match self {
            GrantSubjectType::Namespace => "attribute_namespaces",
            GrantSubjectType::Attribute => "attribute_definitions",
            GrantSubjectType::Value => "attribute_values",
        }
    }
}

impl From<&GrantSubject> for GrantSubjectType {
    fn from(subject: &GrantSubject) -> Self {
        match subject {
            GrantSubject::Namespace(_) => GrantSubjectType::Namespace,
            GrantSubject::Attribute(_) => GrantSubjectType::Attribute,
            GrantSubject::Value(_) => GrantSubjectType::Value,
        }
    }
}

#[async_trait]
impl GrantsRepository for PolicyDbClient {
    async fn assign_kas_grant(&self, kas_id: &str, subject: &GrantSubject) -> Result<()> {
        check_uuid(kas_id)?;
        check_uuid(subject.id())?;
        let subject_type = GrantSubjectType::from(subject);
        let mut transaction = self.begin().await?;
        Self::check_grant_ends(
            &mut transaction,
            subject_type,
            subject.id(),
            "key_access_servers",
            kas_id,
        )
        .await?;
        sqlx::query(&format!(
            "INSERT INTO {} ({}, key_access_server_id, created_at) VALUES ($1, $2, $3)",
            subject_type.grants_table(),
            subject_type.subject_column()
        ))
        .bind(subject.id())
        .bind(kas_id)
        .bind(now_micros())
        .execute(&mut *transaction)
        .await
        .void()?;
        transaction.commit().await?;
        debug!(%kas_id, ?subject, "key access server granted");
        Ok(())
    }

    async fn remove_kas_grant(&self, kas_id: &str, subject: &GrantSubject) -> Result<()> {
        check_uuid(kas_id)?;
        check_uuid(subject.id())?;
        let subject_type = GrantSubjectType::from(subject);
        let mut connection = self.write_connection().await?;
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = $1 AND key_access_server_id = $2",
            subject_type.grants_table(),
            subject_type.subject_column()
        ))
        .bind(subject.id())
        .bind(kas_id)
        .execute(&mut *connection)
        .await
        .into_core()?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn list_key_access_server_grants(
        &self,
        kas_id: Option<&str>,
        kas_uri: Option<&str>,
    ) -> Result<Vec<KeyAccessServerGrants>> {
        let mut connection = self.read_connection().await?;
        let rows: Vec<KasRow> = match (kas_id, kas_uri) {
            (Some(id), _) => {
                check_uuid(id)?;
                sqlx::query_as(&format!(
                    "SELECT {KAS_COLUMNS} FROM key_access_servers k WHERE k.id = $1"
                ))
                .bind(id)
                .fetch_all(&mut *connection)
                .await
                .into_core()?
            }
            (None, Some(uri)) => sqlx::query_as(&format!(
                "SELECT {KAS_COLUMNS} FROM key_access_servers k WHERE k.uri = $1"
            ))
            .bind(uri.trim())
            .fetch_all(&mut *connection)
            .await
            .into_core()?,
            (None, None) => {
                drop(connection);
                return self.list_all_grants().await;
            }
        };
        if rows.is_empty() {
            return Err(Error::NotFound);
        }
        let mut result = vec![];
        for row in rows {
            result.push(Self::fetch_kas_grants(&mut connection, row.key_access_server()?).await?);
        }
        Ok(result)
    }

    async fn list_all_grants(&self) -> Result<Vec<KeyAccessServerGrants>> {
        let mut connection = self.read_connection().await?;
        let rows: Vec<KasRow> = sqlx::query_as(&format!(
            "SELECT {KAS_COLUMNS} FROM key_access_servers k
             WHERE EXISTS (SELECT 1 FROM attribute_namespace_key_access_grants g WHERE g.key_access_server_id = k.id)
                OR EXISTS (SELECT 1 FROM attribute_definition_key_access_grants g WHERE g.key_access_server_id = k.id)
                OR EXISTS (SELECT 1 FROM attribute_value_key_access_grants g WHERE g.key_access_server_id = k.id)
             ORDER BY k.created_at"
        ))
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let mut result = vec![];
        for row in rows {
            result.push(Self::fetch_kas_grants(&mut connection, row.key_access_server()?).await?);
        }
        Ok(result)
    }

    async fn assign_public_key(&self, key_id: &str, subject: &GrantSubject) -> Result<()> {
        check_uuid(key_id)?;
        check_uuid(subject.id())?;
        let subject_type = GrantSubjectType::from(subject);
        let mut transaction = self.begin().await?;
        Self::check_grant_ends(&mut transaction, subject_type, subject.id(), "kas_keys", key_id)
            .await?;
        sqlx::query(&format!(
            "INSERT INTO {} ({}, key_id) VALUES ($1, $2)",
            subject_type.keys_table(),
            subject_type.subject_column()
        ))
        .bind(subject.id())
        .bind(key_id)
        .execute(&mut *transaction)
        .await
        .void()?;
        transaction.commit().await?;
        debug!(%key_id, ?subject, "key mapped");
        Ok(())
    }

    async fn remove_public_key(&self, key_id: &str, subject: &GrantSubject) -> Result<()> {
        check_uuid(key_id)?;
        check_uuid(subject.id())?;
        let subject_type = GrantSubjectType::from(subject);
        let mut connection = self.write_connection().await?;
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = $1 AND key_id = $2",
            subject_type.keys_table(),
            subject_type.subject_column()
        ))
        .bind(subject.id())
        .bind(key_id)
        .execute(&mut *connection)
        .await
        .into_core()?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}

impl PolicyDbClient {
    /// Return the key access servers granted to an entity
    pub(crate) async fn fetch_grants(
        connection: &mut AnyConnection,
        subject_type: GrantSubjectType,
        subject_id: &str,
    ) -> Result<Vec<KeyAccessServer>> {
        let rows: Vec<KasRow> = sqlx::query_as(&format!(
            "SELECT {KAS_COLUMNS} FROM key_access_servers k
             JOIN {} g ON g.key_access_server_id = k.id
             WHERE g.{} = $1 ORDER BY g.created_at",
            subject_type.grants_table(),
            subject_type.subject_column()
        ))
        .bind(subject_id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        rows.iter().map(|r| r.key_access_server()).collect()
    }

    /// Return the keys mapped to an entity
    pub(crate) async fn fetch_mapped_keys(
        connection: &mut AnyConnection,
        subject_type: GrantSubjectType,
        subject_id: &str,
    ) -> Result<Vec<SimpleKasKey>> {
        let rows: Vec<KasKeyRow> = sqlx::query_as(&format!(
            "{KAS_KEY_SELECT} JOIN {} m ON m.key_id = kk.id WHERE m.{} = $1 ORDER BY kk.created_at",
            subject_type.keys_table(),
            subject_type.subject_column()
        ))
        .bind(subject_id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        rows.iter().map(|r| r.simple_kas_key()).collect()
    }

    async fn fetch_kas_grants(
        connection: &mut AnyConnection,
        key_access_server: KeyAccessServer,
    ) -> Result<KeyAccessServerGrants> {
        let mut grants = KeyAccessServerGrants {
            key_access_server,
            ..Default::default()
        };
        for subject_type in [
            GrantSubjectType::Namespace,
            GrantSubjectType::Attribute,
            GrantSubjectType::Value,
        ] {
            let rows: Vec<GrantedRow> = sqlx::query_as(&format!(
                "SELECT g.{column} AS id, f.fqn FROM {table} g
                 JOIN fqn_index f ON f.entity_id = g.{column}
                 WHERE g.key_access_server_id = $1 ORDER BY f.fqn",
                column = subject_type.subject_column(),
                table = subject_type.grants_table()
            ))
            .bind(&grants.key_access_server.id)
            .fetch_all(&mut *connection)
            .await
            .into_core()?;
            let objects = rows
                .into_iter()
                .map(|r| GrantedPolicyObject { id: r.id, fqn: r.fqn })
                .collect();
            match subject_type {
                GrantSubjectType::Namespace => grants.namespace_grants = objects,
                GrantSubjectType::Attribute => grants.attribute_grants = objects,
                GrantSubjectType::Value => grants.value_grants = objects,
            }
        }
        Ok(grants)
    }

    /// Check that both ends of a grant exist, reported as a foreign key violation
    async fn check_grant_ends(
        connection: &mut AnyConnection,
        subject_type: GrantSubjectType,
        subject_id: &str,
        target_table: &'static str,
        target_id: &str,
    ) -> Result<()> {
        for (table, id) in [(subject_type.entity_table(), subject_id), (target_table, target_id)] {
            let count: CountRow =
                sqlx::query_as(&format!("SELECT COUNT(*) AS total FROM {table} WHERE id = $1"))
                    .bind(id)
                    .fetch_one(&mut *connection)
                    .await
                    .into_core()?;
            if count.total == 0 {
                return Err(Error::ForeignKeyViolation {
                    detail: Some(format!("{id} not found in {table}")),
                });
            }
        }
        Ok(())
    }
}

#[derive(FromRow)]
struct GrantedRow {
    id: String,
    fqn: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{
        AttributeRuleType, CreateAttributeRequest, CreateKeyAccessServerRequest,
        CreateKeyRequest, CreateNamespaceRequest, Identifier, KeyAlgorithm, KeyMode, NewKey,
        PublicKeyCtx, RotateKeyRequest,
    };
    use crate::storage::{
        AttributeValuesRepository, AttributesRepository, KasRegistryRepository,
        NamespacesRepository,
    };
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use opentdf_db::ErrorKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_repository() -> Result<()> {
        let repository = create_repository("grants").await?;
        let (namespace_id, attribute_id, value_id) = create_attribute(&repository).await?;
        let kas = create_kas(&repository, "https://kas1.example.com").await?;

        repository
            .assign_kas_grant(&kas.id, &GrantSubject::Namespace(namespace_id.clone()))
            .await?;
        repository
            .assign_kas_grant(&kas.id, &GrantSubject::Value(value_id.clone()))
            .await?;

        // duplicate grants are rejected
        let error = repository
            .assign_kas_grant(&kas.id, &GrantSubject::Value(value_id.clone()))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::UniqueConstraintViolation));

        // both ends must exist
        let error = repository
            .assign_kas_grant(&kas.id, &GrantSubject::Attribute(value_id.clone()))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::ForeignKeyViolation));

        let grants = repository
            .list_key_access_server_grants(None, Some("https://kas1.example.com"))
            .await?;
        assert_eq!(grants.len(), 1);
        assert_eq!(
            grants[0].namespace_grants,
            vec![GrantedPolicyObject {
                id: namespace_id.clone(),
                fqn: "https://testing.org".to_string()
            }]
        );
        assert!(grants[0].attribute_grants.is_empty());
        assert_eq!(
            grants[0].value_grants[0].fqn,
            "https://testing.org/attr/a1/value/first"
        );

        // the grants are returned with the granted entities
        let value = repository.get_attribute_value(&Identifier::id(&value_id)).await?;
        assert_eq!(value.grants, vec![kas.clone()]);
        let attribute = repository.get_attribute(&Identifier::id(&attribute_id)).await?;
        assert!(attribute.grants.is_empty());
        assert_eq!(attribute.namespace.id, namespace_id);

        repository
            .remove_kas_grant(&kas.id, &GrantSubject::Value(value_id.clone()))
            .await?;
        let error = repository
            .remove_kas_grant(&kas.id, &GrantSubject::Value(value_id.clone()))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));

        // a server without grants is not listed
        create_kas(&repository, "https://kas2.example.com").await?;
        let all = repository.list_all_grants().await?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key_access_server.id, kas.id);
        assert_eq!(repository.list_key_access_server_grants(None, None).await?, all);
        Ok(())
    }

    #[tokio::test]
    async fn test_key_mappings_follow_rotation() -> Result<()> {
        let repository = create_repository("grants_keys").await?;
        let (namespace_id, attribute_id, value_id) = create_attribute(&repository).await?;
        let kas = create_kas(&repository, "https://kas1.example.com").await?;
        let key = repository
            .create_key(&CreateKeyRequest {
                kas_id: kas.id.clone(),
                key: new_key("k1"),
            })
            .await?;

        repository
            .assign_public_key(&key.id, &GrantSubject::Namespace(namespace_id.clone()))
            .await?;
        repository
            .assign_public_key(&key.id, &GrantSubject::Value(value_id.clone()))
            .await?;
        let namespace = repository.get_namespace(&Identifier::id(&namespace_id)).await?;
        assert_eq!(namespace.kas_keys.len(), 1);
        assert_eq!(namespace.kas_keys[0].key_id, "k1");

        let rotated = repository
            .rotate_key(&RotateKeyRequest {
                id: key.id.clone(),
                new_key: new_key("k2"),
            })
            .await?;
        let resources = rotated.rotated_resources;
        assert_eq!(resources.namespaces.len(), 1);
        assert_eq!(resources.namespaces[0].fqn, "https://testing.org");
        assert!(resources.attribute_definitions.is_empty());
        assert_eq!(resources.attribute_values[0].id, value_id);

        let value = repository.get_attribute_value(&Identifier::id(&value_id)).await?;
        assert_eq!(value.kas_keys.len(), 1);
        assert_eq!(value.kas_keys[0].key_id, "k2");

        repository
            .remove_public_key(&rotated.kas_key.id, &GrantSubject::Value(value_id.clone()))
            .await?;
        let error = repository
            .remove_public_key(&rotated.kas_key.id, &GrantSubject::Attribute(attribute_id))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));
        Ok(())
    }

    /// HELPERS
    async fn create_repository(usage: &str) -> Result<PolicyDbClient> {
        PolicyDbClient::in_memory(usage).await
    }

    /// Create an attribute and return the ids of its namespace, itself and its first value
    async fn create_attribute(repository: &PolicyDbClient) -> Result<(String, String, String)> {
        let namespace = repository
            .create_namespace(&CreateNamespaceRequest::new("testing.org"))
            .await?;
        let attribute = repository
            .create_attribute(&CreateAttributeRequest {
                namespace_id: namespace.id.clone(),
                name: "a1".to_string(),
                rule: AttributeRuleType::AnyOf,
                values: vec!["first".into()],
                metadata: None,
            })
            .await?;
        let value_id = attribute.values[0].id.clone();
        Ok((namespace.id, attribute.id, value_id))
    }

    async fn create_kas(repository: &PolicyDbClient, uri: &str) -> Result<KeyAccessServer> {
        repository
            .create_key_access_server(&CreateKeyAccessServerRequest {
                uri: uri.to_string(),
                ..Default::default()
            })
            .await
    }

    fn new_key(key_id: &str) -> NewKey {
        NewKey {
            key_id: key_id.to_string(),
            algorithm: KeyAlgorithm::EcP256,
            mode: KeyMode::PublicKeyOnly,
            public_key_ctx: Some(PublicKeyCtx {
                pem: STANDARD.encode("-----BEGIN PUBLIC KEY-----"),
            }),
            ..Default::default()
        }
    }
}
