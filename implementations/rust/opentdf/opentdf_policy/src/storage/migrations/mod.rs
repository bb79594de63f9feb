use opentdf_db::{DatabaseType, Migration, MigrationSet};

/// Migrations of the policy database.
///
/// Postgres and SQLite share the same schema, but SQLite stores booleans as integers
/// and timestamps as text.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyMigrations;

macro_rules! policy_migrations {
    ($database_type:expr, $( $version:literal => $name:literal ),+ $(,)?) => {
        match $database_type {
            DatabaseType::Postgres => vec![
                $( Migration::new(
                    $version,
                    $name,
                    include_str!(concat!("sql/postgres/", stringify!($version), "_", $name, ".sql")),
                ), )+
            ],
            DatabaseType::Sqlite => vec![
                $( Migration::new(
                    $version,
                    $name,
                    include_str!(concat!("sql/sqlite/", stringify!($version), "_", $name, ".sql")),
                ), )+
            ],
        }
    };
}

impl MigrationSet for PolicyMigrations {
    fn name(&self) -> &str {
        "policy"
    }

    fn migrations(&self, database_type: DatabaseType) -> Vec<Migration> {
        policy_migrations!(
            database_type,
            20250101000000 => "attributes",
            20250101000100 => "key_access_servers",
            20250101000200 => "subject_mappings",
            20250101000300 => "obligations",
            20250101000400 => "registered_resources",
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_both_engines_have_the_same_migrations() {
        let versions = |database_type| {
            PolicyMigrations
                .migrations(database_type)
                .iter()
                .map(|m| (m.version(), m.name()))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            versions(DatabaseType::Postgres),
            versions(DatabaseType::Sqlite)
        );
    }

    #[test]
    fn test_sqlite_columns_are_decodable() {
        for migration in PolicyMigrations.migrations(DatabaseType::Sqlite) {
            for statement in migration.statements() {
                assert!(!statement.contains("BOOLEAN"), "{statement}");
                assert!(!statement.contains("BIGINT"), "{statement}");
            }
        }
    }
}
