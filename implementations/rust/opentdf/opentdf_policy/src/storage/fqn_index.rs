use crate::fqn;
use opentdf_db::{Error, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use tracing::debug;

/// Types of the entities referenced by the FQN index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FqnEntityType {
    Namespace,
    Attribute,
    Value,
    Obligation,
    ObligationValue,
    ResourceMappingGroup,
}

impl FqnEntityType {
    fn as_str(&self) -> &'static str {
        match self {
            FqnEntityType::Namespace => "namespace",
            FqnEntityType::Attribute => "attribute",
            FqnEntityType::Value => "value",
            FqnEntityType::Obligation => "obligation",
            FqnEntityType::ObligationValue => "obligation_value",
            FqnEntityType::ResourceMappingGroup => "resource_mapping_group",
        }
    }
}

/// Write-through index from FQNs to entity ids.
///
/// All functions take the connection of the enclosing transaction so that the index is
/// always updated atomically with the entities.
pub(crate) struct FqnIndex;

impl FqnIndex {
    /// Set the FQN of an entity
    pub(crate) async fn index(
        connection: &mut AnyConnection,
        namespace_id: &str,
        entity_type: FqnEntityType,
        entity_id: &str,
        fqn: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM fqn_index WHERE entity_id = $1")
            .bind(entity_id)
            .execute(&mut *connection)
            .await
            .void()?;
        sqlx::query(
            "INSERT INTO fqn_index (fqn, entity_type, entity_id, namespace_id) VALUES ($1, $2, $3, $4)",
        )
        .bind(fqn.to_lowercase())
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(namespace_id)
        .execute(&mut *connection)
        .await
        .void()
    }

    /// Rebuild the FQNs of a namespace and all its descendants.
    /// This is used after an entity was renamed or deleted.
    pub(crate) async fn reindex_namespace(
        connection: &mut AnyConnection,
        namespace_id: &str,
    ) -> Result<usize> {
        sqlx::query("DELETE FROM fqn_index WHERE namespace_id = $1")
            .bind(namespace_id)
            .execute(&mut *connection)
            .await
            .void()?;

        let namespace: Option<NamedRow> =
            sqlx::query_as("SELECT id, name FROM attribute_namespaces WHERE id = $1")
                .bind(namespace_id)
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
        let Some(namespace) = namespace else {
            return Ok(0);
        };

        let mut entries = vec![(
            FqnEntityType::Namespace,
            namespace.id.clone(),
            fqn::namespace_fqn(&namespace.name),
        )];

        let attributes: Vec<NamedRow> =
            sqlx::query_as("SELECT id, name FROM attribute_definitions WHERE namespace_id = $1")
                .bind(namespace_id)
                .fetch_all(&mut *connection)
                .await
                .into_core()?;
        entries.extend(attributes.into_iter().map(|a| {
            (
                FqnEntityType::Attribute,
                a.id,
                fqn::attribute_fqn(&namespace.name, &a.name),
            )
        }));

        let values: Vec<ChildRow> = sqlx::query_as(
            "SELECT av.id, ad.name AS parent_name, av.value AS name
             FROM attribute_values av
             JOIN attribute_definitions ad ON ad.id = av.attribute_definition_id
             WHERE ad.namespace_id = $1",
        )
        .bind(namespace_id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        entries.extend(values.into_iter().map(|v| {
            (
                FqnEntityType::Value,
                v.id,
                fqn::value_fqn(&namespace.name, &v.parent_name, &v.name),
            )
        }));

        let obligations: Vec<NamedRow> =
            sqlx::query_as("SELECT id, name FROM obligation_definitions WHERE namespace_id = $1")
                .bind(namespace_id)
                .fetch_all(&mut *connection)
                .await
                .into_core()?;
        entries.extend(obligations.into_iter().map(|o| {
            (
                FqnEntityType::Obligation,
                o.id,
                fqn::obligation_fqn(&namespace.name, &o.name),
            )
        }));

        let obligation_values: Vec<ChildRow> = sqlx::query_as(
            "SELECT ov.id, od.name AS parent_name, ov.value AS name
             FROM obligation_values ov
             JOIN obligation_definitions od ON od.id = ov.obligation_definition_id
             WHERE od.namespace_id = $1",
        )
        .bind(namespace_id)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        entries.extend(obligation_values.into_iter().map(|v| {
            (
                FqnEntityType::ObligationValue,
                v.id,
                fqn::obligation_value_fqn(&namespace.name, &v.parent_name, &v.name),
            )
        }));

        let groups: Vec<NamedRow> =
            sqlx::query_as("SELECT id, name FROM resource_mapping_groups WHERE namespace_id = $1")
                .bind(namespace_id)
                .fetch_all(&mut *connection)
                .await
                .into_core()?;
        entries.extend(groups.into_iter().map(|g| {
            (
                FqnEntityType::ResourceMappingGroup,
                g.id,
                fqn::resource_mapping_group_fqn(&namespace.name, &g.name),
            )
        }));

        let count = entries.len();
        for (entity_type, entity_id, fqn) in entries {
            sqlx::query(
                "INSERT INTO fqn_index (fqn, entity_type, entity_id, namespace_id) VALUES ($1, $2, $3, $4)",
            )
            .bind(fqn)
            .bind(entity_type.as_str())
            .bind(entity_id)
            .bind(namespace_id)
            .execute(&mut *connection)
            .await
            .void()?;
        }
        debug!(namespace = %namespace.name, count, "FQNs reindexed");
        Ok(count)
    }

    /// Return the id of the entity of a given type designated by an FQN.
    /// The lookup is case-insensitive.
    pub(crate) async fn lookup(
        connection: &mut AnyConnection,
        fqn: &str,
        entity_type: FqnEntityType,
    ) -> Result<String> {
        let row: Option<EntityIdRow> = sqlx::query_as(
            "SELECT entity_id FROM fqn_index WHERE fqn = $1 AND entity_type = $2",
        )
        .bind(fqn.trim().to_lowercase())
        .bind(entity_type.as_str())
        .fetch_optional(&mut *connection)
        .await
        .into_core()?;
        row.map(|r| r.entity_id).ok_or(Error::NotFound)
    }

    /// Return the FQN of an entity
    pub(crate) async fn fqn_of(connection: &mut AnyConnection, entity_id: &str) -> Result<String> {
        let row: Option<FqnRow> =
            sqlx::query_as("SELECT fqn FROM fqn_index WHERE entity_id = $1")
                .bind(entity_id)
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
        row.map(|r| r.fqn).ok_or(Error::NotFound)
    }
}

#[derive(FromRow)]
struct NamedRow {
    id: String,
    name: String,
}

#[derive(FromRow)]
struct ChildRow {
    id: String,
    parent_name: String,
    name: String,
}

#[derive(FromRow)]
struct EntityIdRow {
    entity_id: String,
}

#[derive(FromRow)]
struct FqnRow {
    fqn: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PolicyDbClient;
    use opentdf_db::{now_micros, ErrorKind};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_index_and_lookup() -> Result<()> {
        let client = PolicyDbClient::in_memory("fqn_index").await?;
        let mut connection = client.write_connection().await?;
        insert_namespace(&mut connection, "ns-1", "example.org").await?;
        FqnIndex::index(
            &mut connection,
            "ns-1",
            FqnEntityType::Namespace,
            "ns-1",
            "https://Example.org",
        )
        .await?;

        // lookups are case-insensitive and typed
        let id = FqnIndex::lookup(&mut connection, "HTTPS://EXAMPLE.ORG", FqnEntityType::Namespace).await?;
        assert_eq!(id, "ns-1");
        let error = FqnIndex::lookup(&mut connection, "https://example.org", FqnEntityType::Attribute)
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));

        // the index can be rebuilt from the entities
        sqlx::query("UPDATE attribute_namespaces SET name = 'renamed.org' WHERE id = 'ns-1'")
            .execute(&mut *connection)
            .await
            .void()?;
        assert_eq!(FqnIndex::reindex_namespace(&mut connection, "ns-1").await?, 1);
        assert_eq!(FqnIndex::fqn_of(&mut connection, "ns-1").await?, "https://renamed.org");
        Ok(())
    }

    /// HELPERS
    async fn insert_namespace(connection: &mut AnyConnection, id: &str, name: &str) -> Result<()> {
        let now = now_micros();
        sqlx::query(
            "INSERT INTO attribute_namespaces (id, name, active, labels, created_at, updated_at) VALUES ($1, $2, $3, '{}', $4, $5)",
        )
        .bind(id)
        .bind(name)
        .bind(true)
        .bind(now)
        .bind(now)
        .execute(&mut *connection)
        .await
        .void()
    }
}
