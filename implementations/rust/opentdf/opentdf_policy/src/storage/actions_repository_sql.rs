use crate::models::{
    Action, CreateActionRequest, Identifier, ListActionsRequest, ListResponse, Metadata,
    MetadataMutable, UpdateActionRequest,
};
use crate::storage::{ActionsRepository, CountRow, PolicyDbClient};
use crate::validation::{check_uuid, normalize_name};
use async_trait::async_trait;
use opentdf_db::{now_micros, BigInteger, Boolean, Error, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, FromRow};
use tracing::debug;
use uuid::Uuid;

const ACTION_COLUMNS: &str =
    "a.id, a.name, a.is_standard, a.labels, a.created_at, a.updated_at";

#[async_trait]
impl ActionsRepository for PolicyDbClient {
    async fn get_action(&self, identifier: &Identifier) -> Result<Action> {
        let mut connection = self.read_connection().await?;
        Self::resolve_action(&mut connection, identifier).await
    }

    async fn list_actions(&self, request: &ListActionsRequest) -> Result<ListResponse<Action>> {
        let (limit, offset) = self.page_limits(&request.pagination)?;
        let mut connection = self.read_connection().await?;
        // standard actions first, then custom actions by creation date
        let rows: Vec<ActionRow> = sqlx::query_as(&format!(
            "SELECT {ACTION_COLUMNS} FROM actions a
             ORDER BY a.is_standard DESC, a.created_at, a.name LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let count: CountRow = sqlx::query_as("SELECT COUNT(*) AS total FROM actions")
            .fetch_one(&mut *connection)
            .await
            .into_core()?;
        Ok(ListResponse {
            items: rows
                .into_iter()
                .map(|r| r.action())
                .collect::<Result<Vec<_>>>()?,
            pagination: Self::page_response(limit, offset, count.total),
        })
    }

    async fn create_action(&self, request: &CreateActionRequest) -> Result<Action> {
        let name = normalize_name("name", &request.name)?;
        let id = Uuid::new_v4().to_string();
        let now = now_micros();
        let mut connection = self.write_connection().await?;
        sqlx::query(
            "INSERT INTO actions (id, name, is_standard, labels, created_at, updated_at)
             VALUES ($1, $2, FALSE, $3, $4, $5)",
        )
        .bind(&id)
        .bind(&name)
        .bind(MetadataMutable::labels_json(&request.metadata)?)
        .bind(now)
        .bind(now)
        .execute(&mut *connection)
        .await
        .void()?;
        debug!(%name, "custom action created");
        Self::fetch_action(&mut connection, &id).await
    }

    async fn update_action(&self, request: &UpdateActionRequest) -> Result<Action> {
        check_uuid(&request.id)?;
        let name = request
            .name
            .as_ref()
            .map(|n| normalize_name("name", n))
            .transpose()?;
        let mut transaction = self.begin().await?;
        let current = Self::fetch_action(&mut transaction, &request.id).await?;
        if current.is_standard {
            return Err(Self::standard_action_violation(&current));
        }
        let labels = MetadataMutable::updated_labels(
            current.metadata.labels.clone(),
            &request.metadata,
            request.metadata_update_behavior,
        );
        sqlx::query("UPDATE actions SET name = $1, labels = $2, updated_at = $3 WHERE id = $4")
            .bind(name.unwrap_or(current.name))
            .bind(serde_json::to_string(&labels)?)
            .bind(now_micros())
            .bind(&request.id)
            .execute(&mut *transaction)
            .await
            .void()?;
        let action = Self::fetch_action(&mut transaction, &request.id).await?;
        transaction.commit().await?;
        Ok(action)
    }

    async fn delete_action(&self, id: &str) -> Result<Action> {
        check_uuid(id)?;
        let mut transaction = self.begin().await?;
        let action = Self::fetch_action(&mut transaction, id).await?;
        if action.is_standard {
            return Err(Self::standard_action_violation(&action));
        }
        sqlx::query("DELETE FROM actions WHERE id = $1")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .void()?;
        transaction.commit().await?;
        debug!(name = %action.name, "custom action deleted");
        Ok(action)
    }
}

impl PolicyDbClient {
    pub(crate) async fn fetch_action(connection: &mut AnyConnection, id: &str) -> Result<Action> {
        let row: Option<ActionRow> =
            sqlx::query_as(&format!("SELECT {ACTION_COLUMNS} FROM actions a WHERE a.id = $1"))
                .bind(id)
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
        row.ok_or(Error::NotFound)?.action()
    }

    /// Return an action given by id or name. Names are case-insensitive
    pub(crate) async fn resolve_action(
        connection: &mut AnyConnection,
        identifier: &Identifier,
    ) -> Result<Action> {
        match identifier.check()? {
            Identifier::Id(id) => {
                check_uuid(id)?;
                Self::fetch_action(connection, id).await
            }
            Identifier::Name(name) => {
                let row: Option<ActionRow> = sqlx::query_as(&format!(
                    "SELECT {ACTION_COLUMNS} FROM actions a WHERE a.name = $1"
                ))
                .bind(name.trim().to_lowercase())
                .fetch_optional(&mut *connection)
                .await
                .into_core()?;
                row.ok_or(Error::NotFound)?.action()
            }
            _ => Err(Error::UnknownSelectIdentifier),
        }
    }

    fn standard_action_violation(action: &Action) -> Error {
        Error::ReadOnlyViolation {
            message: format!("the standard action '{}' cannot be modified", action.name),
        }
    }
}

/// Low-level representation of a row in the actions table
#[derive(FromRow)]
struct ActionRow {
    id: String,
    name: String,
    is_standard: Boolean,
    labels: String,
    created_at: BigInteger,
    updated_at: BigInteger,
}

impl ActionRow {
    fn action(self) -> Result<Action> {
        Ok(Action {
            metadata: Metadata::from_row(&self.labels, self.created_at, self.updated_at)?,
            id: self.id,
            name: self.name,
            is_standard: self.is_standard.to_bool(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{MetadataUpdateEnum, PageRequest, STANDARD_ACTIONS};
    use opentdf_db::ErrorKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_standard_actions() -> Result<()> {
        let repository = PolicyDbClient::in_memory("standard_actions").await?;
        let actions = repository.list_actions(&Default::default()).await?;
        let mut names: Vec<&str> = actions.items.iter().map(|a| a.name.as_str()).collect();
        names.sort();
        let mut expected = STANDARD_ACTIONS.to_vec();
        expected.sort();
        assert_eq!(names, expected);
        assert!(actions.items.iter().all(|a| a.is_standard));

        let read = repository.get_action(&Identifier::name("READ")).await?;
        assert_eq!(read.name, "read");

        let error = repository
            .update_action(&UpdateActionRequest {
                id: read.id.clone(),
                name: Some("view".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::ReadOnlyViolation));
        let error = repository.delete_action(&read.id).await.unwrap_err();
        assert!(error.is(ErrorKind::ReadOnlyViolation));
        Ok(())
    }

    #[tokio::test]
    async fn test_custom_actions() -> Result<()> {
        let repository = PolicyDbClient::in_memory("custom_actions").await?;
        let action = repository
            .create_action(&CreateActionRequest {
                name: "Download".to_string(),
                metadata: Some(MetadataMutable::default().with_label("owner", "docs")),
            })
            .await?;
        assert_eq!(action.name, "download");
        assert!(!action.is_standard);
        assert_eq!(
            repository.get_action(&Identifier::id(&action.id)).await?,
            action
        );

        let error = repository
            .create_action(&CreateActionRequest {
                name: "download".to_string(),
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::UniqueConstraintViolation));
        // the rejected action left no row behind
        assert_eq!(custom_actions(&repository).await?, vec![action.clone()]);

        let error = repository
            .create_action(&CreateActionRequest {
                name: "not valid!".to_string(),
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::InvalidName));

        let updated = repository
            .update_action(&UpdateActionRequest {
                id: action.id.clone(),
                name: Some("export".to_string()),
                metadata: Some(MetadataMutable::default().with_label("team", "a")),
                metadata_update_behavior: MetadataUpdateEnum::Replace,
            })
            .await?;
        assert_eq!(updated.name, "export");
        assert_eq!(updated.metadata.labels.len(), 1);
        assert_eq!(custom_actions(&repository).await?, vec![updated.clone()]);
        let error = repository
            .get_action(&Identifier::name("download"))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));

        // custom actions come after the standard ones
        let page = repository
            .list_actions(&ListActionsRequest {
                pagination: PageRequest::new(10, 4),
            })
            .await?;
        assert_eq!(page.items, vec![updated.clone()]);
        assert_eq!(page.pagination.total, 5);

        repository.delete_action(&action.id).await?;
        let error = repository
            .get_action(&Identifier::name("export"))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));
        assert!(custom_actions(&repository).await?.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_actions_are_rejected_under_load() -> Result<()> {
        let repository = PolicyDbClient::in_memory("duplicate_actions").await?;

        let mut handles = vec![];
        for _ in 0..8 {
            let repository = repository.clone();
            handles.push(tokio::spawn(async move {
                repository
                    .create_action(&CreateActionRequest {
                        name: "Download".to_string(),
                        metadata: None,
                    })
                    .await
            }));
        }
        let mut created = vec![];
        for handle in handles {
            match handle.await.unwrap() {
                Ok(action) => created.push(action),
                Err(e) => assert!(e.is(ErrorKind::UniqueConstraintViolation), "{e:?}"),
            }
        }
        assert_eq!(created.len(), 1);
        assert_eq!(custom_actions(&repository).await?, created);

        let page = repository.list_actions(&Default::default()).await?;
        assert_eq!(page.pagination.total, 5);
        Ok(())
    }

    /// HELPERS
    async fn custom_actions(repository: &PolicyDbClient) -> Result<Vec<Action>> {
        let page = repository.list_actions(&Default::default()).await?;
        Ok(page.items.into_iter().filter(|a| !a.is_standard).collect())
    }
}
