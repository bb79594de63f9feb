use crate::storage::database::{now_micros, BigInteger, DatabaseType, Migration, MigrationSet};
use crate::{Error, FromSqlxError, Result, ToVoid};
use sqlx::{AnyConnection, AnyPool, Connection, Executor, FromRow};
use tracing::{debug, info};

const MIGRATIONS_TABLE: &str = "schema_migrations";

/// Arbitrary key for the Postgres advisory lock taken while migrating
const MIGRATION_LOCK_KEY: i64 = 7_431_902_118;

/// Apply the migrations of a [`MigrationSet`] in ascending version order.
///
/// Each migration runs in its own transaction and is recorded in the `schema_migrations` table
/// so that running the migrator again only applies the missing migrations.
/// With Postgres, the migrations run in the configured schema, which is created if necessary.
pub struct Migrator {
    database_type: DatabaseType,
    schema: String,
}

impl Migrator {
    pub fn new(database_type: DatabaseType, schema: &str) -> Self {
        Self {
            database_type,
            schema: schema.to_string(),
        }
    }

    /// Run the missing migrations and return their versions
    pub async fn migrate(&self, pool: &AnyPool, set: &dyn MigrationSet) -> Result<Vec<i64>> {
        let migrations = set.migrations(self.database_type);
        Self::check_versions(&migrations)?;

        let mut connection = pool.acquire().await.into_core()?;
        if self.database_type == DatabaseType::Postgres {
            let statement = format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", self.schema);
            Executor::execute(&mut *connection, statement.as_str())
                .await
                .void()?;
            sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(MIGRATION_LOCK_KEY)
                .execute(&mut *connection)
                .await
                .void()?;
        }

        let result = self.apply(&mut connection, set, migrations).await;

        if self.database_type == DatabaseType::Postgres {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(MIGRATION_LOCK_KEY)
                .execute(&mut *connection)
                .await
                .void()?;
        }
        result
    }

    /// Return the versions of the applied migrations
    pub async fn applied_versions(connection: &mut AnyConnection) -> Result<Vec<i64>> {
        let rows: Vec<MigrationRow> = sqlx::query_as(&format!(
            "SELECT version FROM {MIGRATIONS_TABLE} ORDER BY version"
        ))
        .fetch_all(&mut *connection)
        .await
        .into_core()?;
        let mut versions: Vec<i64> = rows.into_iter().map(|r| r.version.to_i64()).collect();
        versions.sort();
        Ok(versions)
    }

    async fn apply(
        &self,
        connection: &mut AnyConnection,
        set: &dyn MigrationSet,
        migrations: Vec<Migration>,
    ) -> Result<Vec<i64>> {
        // SQLite integers larger than 32 bits are stored as text
        let integer_type = match self.database_type {
            DatabaseType::Postgres => "BIGINT",
            DatabaseType::Sqlite => "TEXT",
        };
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (version {integer_type} PRIMARY KEY, name TEXT NOT NULL, applied_at {integer_type} NOT NULL)"
        );
        Executor::execute(&mut *connection, create_table.as_str())
            .await
            .void()?;

        let applied = Self::applied_versions(connection).await?;
        let mut newly_applied = vec![];
        for migration in migrations
            .into_iter()
            .filter(|m| !applied.contains(&m.version()))
        {
            debug!(
                set = set.name(),
                version = migration.version(),
                "applying migration {}",
                migration.name()
            );
            Self::apply_one(connection, &migration)
                .await
                .map_err(|e| Error::MigrationFailed {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    message: e.to_string(),
                })?;
            newly_applied.push(migration.version());
        }
        info!(
            set = set.name(),
            applied = newly_applied.len(),
            "database migrations done"
        );
        Ok(newly_applied)
    }

    async fn apply_one(connection: &mut AnyConnection, migration: &Migration) -> Result<()> {
        let mut transaction = connection.begin().await.into_core()?;
        for statement in migration.statements() {
            Executor::execute(&mut *transaction, statement.as_str())
                .await
                .void()?;
        }
        sqlx::query(&format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at) VALUES ($1, $2, $3)"
        ))
        .bind(migration.version())
        .bind(migration.name())
        .bind(now_micros())
        .execute(&mut *transaction)
        .await
        .void()?;
        transaction.commit().await.void()
    }

    fn check_versions(migrations: &[Migration]) -> Result<()> {
        for pair in migrations.windows(2) {
            if pair[0].version() >= pair[1].version() {
                return Err(Error::MigrationFailed {
                    version: pair[1].version(),
                    name: pair[1].name().to_string(),
                    message: "migrations must be listed in ascending version order".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(FromRow)]
struct MigrationRow {
    version: BigInteger,
}
