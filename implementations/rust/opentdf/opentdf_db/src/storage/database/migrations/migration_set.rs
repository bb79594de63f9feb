use crate::storage::database::DatabaseType;

/// A schema migration: a version, a name and the SQL statements to run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

impl Migration {
    pub fn new(version: i64, name: &'static str, sql: &'static str) -> Self {
        Self { version, name, sql }
    }

    /// Migration version
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Migration name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the statements of this migration.
    /// Statements are separated by `;`, comment lines are removed.
    pub fn statements(&self) -> Vec<String> {
        let without_comments = self
            .sql
            .lines()
            .filter(|l| !l.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        without_comments
            .split(';')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// This trait lists the migrations of a database for a given engine
pub trait MigrationSet: Send + Sync {
    /// Name of the migration set, used in logs
    fn name(&self) -> &str;

    /// Migrations for the given database type
    fn migrations(&self, database_type: DatabaseType) -> Vec<Migration>;
}
