use crate::env::{get_env, get_env_with_default, FromString};
use crate::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Database host environment variable
pub const OPENTDF_DB_HOST: &str = "OPENTDF_DB_HOST";
/// Database port environment variable
pub const OPENTDF_DB_PORT: &str = "OPENTDF_DB_PORT";
/// Comma-separated list of `host:port` primaries
pub const OPENTDF_DB_PRIMARY_HOSTS: &str = "OPENTDF_DB_PRIMARY_HOSTS";
/// Comma-separated list of `host:port` read replicas
pub const OPENTDF_DB_READ_REPLICAS: &str = "OPENTDF_DB_READ_REPLICAS";
/// Database name environment variable
pub const OPENTDF_DB_DATABASE: &str = "OPENTDF_DB_DATABASE";
/// Database user environment variable
pub const OPENTDF_DB_USER: &str = "OPENTDF_DB_USER";
/// Database password environment variable
pub const OPENTDF_DB_PASSWORD: &str = "OPENTDF_DB_PASSWORD";
/// Database schema environment variable
pub const OPENTDF_DB_SCHEMA: &str = "OPENTDF_DB_SCHEMA";
/// Selects the backing engine used by tests: `postgres` or `sqlite`
pub const OPENTDF_TEST_DB: &str = "OPENTDF_TEST_DB";

/// Type of database
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Type for Postgres
    Postgres,
    /// Type for SQLite
    Sqlite,
}

impl FromString for DatabaseType {
    fn from_string(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            "sqlite" => Ok(DatabaseType::Sqlite),
            other => Err(Error::configuration(format!(
                "unknown database type {other}, expected 'postgres' or 'sqlite'"
            ))),
        }
    }
}

/// A `host:port` pair used for primaries and replicas
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromString for HostPort {
    fn from_string(s: &str) -> Result<Self> {
        match s.rsplit_once(':') {
            Some((host, port)) => Ok(HostPort::new(host, u16::from_string(port)?)),
            None => Ok(HostPort::new(s, DEFAULT_PORT)),
        }
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection pool bounds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfiguration {
    pub max_connection_count: u32,
    pub min_connection_count: u32,
    pub max_connection_lifetime_seconds: u64,
    pub max_connection_idle_seconds: u64,
    pub health_check_period_seconds: u64,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_connection_count: 4,
            min_connection_count: 0,
            max_connection_lifetime_seconds: 3600,
            max_connection_idle_seconds: 1800,
            health_check_period_seconds: 60,
        }
    }
}

/// Settings of the per-replica circuit breakers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfiguration {
    /// Minimum number of requests before the failure ratio is considered
    pub min_requests: u32,
    /// Failure ratio above which the breaker opens
    pub failure_ratio: f64,
    /// Time spent in the open state before probing the replica again
    pub open_timeout_seconds: u64,
}

impl Default for CircuitBreakerConfiguration {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            open_timeout_seconds: 30,
        }
    }
}

impl CircuitBreakerConfiguration {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_seconds)
    }
}

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const IN_MEMORY_PREFIX: &str = ":memory:";

/// Configuration for the database.
///
/// With Postgres, the primaries are either given with `host` and `port`,
/// or as a list of `primary_hosts` tried in order.
/// With SQLite, `database` is a file path, or an in-memory database name
/// created with [`DatabaseConfiguration::sqlite_in_memory`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfiguration {
    pub database_type: DatabaseType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub primary_hosts: Vec<HostPort>,
    pub read_replicas: Vec<HostPort>,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub sslmode: String,
    pub schema: String,
    pub connect_timeout_seconds: u64,
    pub pool: PoolConfiguration,
    pub circuit_breaker: CircuitBreakerConfiguration,
    pub run_migrations: bool,
    pub verify_connection: bool,
    /// SQLite files opened read-only and used as read replicas
    pub sqlite_replicas: Vec<String>,
}

impl Default for DatabaseConfiguration {
    fn default() -> Self {
        Self {
            database_type: DatabaseType::Postgres,
            host: None,
            port: None,
            primary_hosts: vec![],
            read_replicas: vec![],
            database: "opentdf".to_string(),
            user: Some("postgres".to_string()),
            password: None,
            sslmode: "prefer".to_string(),
            schema: "opentdf".to_string(),
            connect_timeout_seconds: 15,
            pool: PoolConfiguration::default(),
            circuit_breaker: CircuitBreakerConfiguration::default(),
            run_migrations: true,
            verify_connection: true,
            sqlite_replicas: vec![],
        }
    }
}

impl Debug for DatabaseConfiguration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfiguration")
            .field("database_type", &self.database_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("primary_hosts", &self.primary_hosts)
            .field("read_replicas", &self.read_replicas)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("sslmode", &self.sslmode)
            .field("schema", &self.schema)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("pool", &self.pool)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("run_migrations", &self.run_migrations)
            .field("verify_connection", &self.verify_connection)
            .field("sqlite_replicas", &self.sqlite_replicas)
            .finish()
    }
}

impl DatabaseConfiguration {
    /// Create a postgres configuration for a single host
    pub fn postgres(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Create a local sqlite configuration
    pub fn sqlite(path: &Path) -> Self {
        Self {
            database_type: DatabaseType::Sqlite,
            database: path.to_string_lossy().to_string(),
            user: None,
            ..Default::default()
        }
    }

    /// Create an in-memory sqlite configuration with a unique name
    pub fn sqlite_in_memory() -> Self {
        let name: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self {
            database_type: DatabaseType::Sqlite,
            database: format!("{IN_MEMORY_PREFIX}{name}"),
            user: None,
            ..Default::default()
        }
    }

    /// Create a configuration from environment variables.
    /// `OPENTDF_TEST_DB=sqlite` selects an in-memory SQLite database.
    pub fn from_env() -> Result<Self> {
        let database_type = get_env_with_default(OPENTDF_TEST_DB, DatabaseType::Postgres)?;
        if database_type == DatabaseType::Sqlite {
            return Ok(Self::sqlite_in_memory());
        }
        let defaults = Self::default();
        let configuration = Self {
            host: get_env(OPENTDF_DB_HOST)?,
            port: get_env(OPENTDF_DB_PORT)?,
            primary_hosts: get_env_with_default(OPENTDF_DB_PRIMARY_HOSTS, vec![])?,
            read_replicas: get_env_with_default(OPENTDF_DB_READ_REPLICAS, vec![])?,
            database: get_env_with_default(OPENTDF_DB_DATABASE, defaults.database.clone())?,
            user: get_env::<String>(OPENTDF_DB_USER)?.or(defaults.user.clone()),
            password: get_env(OPENTDF_DB_PASSWORD)?,
            schema: get_env_with_default(OPENTDF_DB_SCHEMA, defaults.schema.clone())?,
            ..defaults
        };
        configuration.validate()?;
        Ok(configuration)
    }

    /// Return a copy of this configuration using another schema
    pub fn with_schema(self, schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            ..self
        }
    }

    /// Check that the configuration is consistent
    pub fn validate(&self) -> Result<()> {
        if self.host.is_some() && !self.primary_hosts.is_empty() {
            return Err(Error::configuration(
                "cannot specify both 'host' and 'primary_hosts'",
            ));
        }
        if self.pool.max_connection_count == 0 {
            return Err(Error::configuration(
                "max_connection_count must be greater than 0",
            ));
        }
        if self.pool.min_connection_count > self.pool.max_connection_count {
            return Err(Error::configuration(
                "min_connection_count must not exceed max_connection_count",
            ));
        }
        if !(0.0..=1.0).contains(&self.circuit_breaker.failure_ratio) {
            return Err(Error::configuration(
                "failure_ratio must be between 0 and 1",
            ));
        }
        if !is_valid_schema_name(&self.schema) {
            return Err(Error::configuration(format!(
                "invalid schema name {}",
                self.schema
            )));
        }
        if self.database_type == DatabaseType::Sqlite
            && self.is_in_memory()
            && !self.sqlite_replicas.is_empty()
        {
            return Err(Error::configuration(
                "read replicas require an on-disk sqlite database",
            ));
        }
        Ok(())
    }

    /// Return the type of database that has been configured
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Return the connect timeout, also used as the pool acquire timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Return true for an in-memory sqlite database
    pub fn is_in_memory(&self) -> bool {
        self.database.starts_with(IN_MEMORY_PREFIX)
    }

    /// Return the primary hosts in the order they must be tried.
    /// A single `host` / `port` is the compatibility path.
    pub fn primaries(&self) -> Vec<HostPort> {
        if !self.primary_hosts.is_empty() {
            return self.primary_hosts.clone();
        }
        vec![HostPort::new(
            self.host.clone().unwrap_or(DEFAULT_HOST.to_string()),
            self.port.unwrap_or(DEFAULT_PORT),
        )]
    }

    /// Return the connection strings of the primaries, in order
    pub fn primary_connection_strings(&self) -> Result<Vec<String>> {
        match self.database_type {
            DatabaseType::Sqlite => Ok(vec![self.sqlite_connection_string()]),
            DatabaseType::Postgres => self
                .primaries()
                .iter()
                .map(|host| self.postgres_connection_string(host))
                .collect(),
        }
    }

    /// Return the connection strings of the read replicas
    pub fn replica_connection_strings(&self) -> Result<Vec<String>> {
        match self.database_type {
            DatabaseType::Sqlite => Ok(self
                .sqlite_replicas
                .iter()
                .map(|path| format!("sqlite://{path}?mode=ro"))
                .collect()),
            DatabaseType::Postgres => self
                .read_replicas
                .iter()
                .map(|host| self.postgres_connection_string(host))
                .collect(),
        }
    }

    fn sqlite_connection_string(&self) -> String {
        match self.database.strip_prefix(IN_MEMORY_PREFIX) {
            Some(name) => format!("sqlite:file:{name}?mode=memory&cache=shared"),
            None => format!("sqlite://{}?mode=rwc", self.database),
        }
    }

    fn postgres_connection_string(&self, host: &HostPort) -> Result<String> {
        let mut url = Url::parse(&format!("postgres://{}:{}", host.host, host.port))
            .map_err(|e| Error::configuration(format!("invalid host {host}: {e}")))?;
        url.set_path(&self.database);
        if let Some(user) = &self.user {
            url.set_username(user)
                .map_err(|_| Error::configuration("invalid database user"))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| Error::configuration("invalid database password"))?;
        }
        url.query_pairs_mut().append_pair("sslmode", &self.sslmode);
        Ok(url.to_string())
    }
}

/// Schemas are interpolated in `SET search_path` statements
fn is_valid_schema_name(schema: &str) -> bool {
    !schema.is_empty()
        && schema
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !schema.starts_with(|c: char| c.is_ascii_digit())
}

/// Remove the credentials from a connection string before logging it
pub fn redact_connection_string(connection_string: &str) -> String {
    match Url::parse(connection_string) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("REDACTED"));
            url.to_string()
        }
        _ => connection_string.to_string(),
    }
}
