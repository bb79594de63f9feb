use core::fmt::{Debug, Formatter};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Connection, Executor, Row, Transaction};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, FixedInterval};
use tokio_retry::Retry;
use tracing::{debug, info, warn};

use crate::storage::database::{
    redact_connection_string, BreakerState, CircuitBreaker, DatabaseConfiguration,
    DatabaseConnection, DatabaseType, MigrationSet, Migrator, ReadPreference,
};
use crate::{Error, FromSqlxError, Result};

static INSTALL_DRIVERS: Once = Once::new();

/// The SqlxDatabase struct is the single handle used to access the policy database:
///
///   - writes and transactions always go to the current primary
///   - reads are spread over the read replicas, each one guarded by a circuit breaker,
///     and fall back to the primary when no replica can serve them
///   - when the primary becomes unreachable, the next configured primary is used
///
/// We use sqlx as our primary interface for interacting with the database.
/// The database driver is either Postgres or SQLite.
#[derive(Clone)]
pub struct SqlxDatabase {
    configuration: Arc<DatabaseConfiguration>,
    primary: Arc<PrimaryPool>,
    replicas: Arc<Vec<Replica>>,
    next_replica: Arc<AtomicUsize>,
    health_checks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Debug for SqlxDatabase {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SqlxDatabase")
            .field("configuration", &self.configuration)
            .field("replicas", &self.replicas.len())
            .finish()
    }
}

/// A read replica and its circuit breaker
pub struct Replica {
    name: String,
    pool: AnyPool,
    breaker: CircuitBreaker,
}

impl Replica {
    /// Name of the replica, used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool of connections to the replica
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Circuit breaker guarding this replica
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

/// Counts of replicas by health
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicaStatistics {
    pub total_replicas: usize,
    pub healthy_replicas: usize,
    pub open_circuit_breakers: usize,
}

/// The primaries, in the order they must be tried, and the pool of the one in use
struct PrimaryPool {
    connection_strings: Vec<String>,
    current: RwLock<ActivePrimary>,
}

struct ActivePrimary {
    index: usize,
    pool: AnyPool,
}

impl SqlxDatabase {
    /// Connect to the configured database and run the given migrations
    /// if the configuration requires it
    pub async fn create(
        configuration: &DatabaseConfiguration,
        migrations: &dyn MigrationSet,
    ) -> Result<Self> {
        let database = Self::create_no_migration(configuration).await?;
        if configuration.run_migrations {
            database.migrate(migrations).await?;
        }
        Ok(database)
    }

    /// Connect to the configured database without running migrations
    pub async fn create_no_migration(configuration: &DatabaseConfiguration) -> Result<Self> {
        INSTALL_DRIVERS.call_once(install_default_drivers);
        configuration.validate()?;

        let connection_strings = configuration.primary_connection_strings()?;

        // the primaries might still be starting, in that case we retry a few times
        let retry_strategy = FixedInterval::from_millis(500).map(jitter).take(2);
        let active = Retry::spawn(retry_strategy, || {
            Self::connect_first_writable(configuration, &connection_strings, None)
        })
        .await?;

        let mut replicas = vec![];
        for (index, connection_string) in configuration
            .replica_connection_strings()?
            .into_iter()
            .enumerate()
        {
            let name = format!("replica-{index}");
            info!(replica = %name, url = %redact_connection_string(&connection_string), "adding a read replica");
            let pool = Self::pool_options(configuration, false)
                .connect_lazy(&connection_string)
                .into_core()?;
            replicas.push(Replica {
                breaker: CircuitBreaker::new(name.clone(), &configuration.circuit_breaker),
                name,
                pool,
            });
        }

        let database = SqlxDatabase {
            configuration: Arc::new(configuration.clone()),
            primary: Arc::new(PrimaryPool {
                connection_strings,
                current: RwLock::new(active),
            }),
            replicas: Arc::new(replicas),
            next_replica: Arc::new(AtomicUsize::new(0)),
            health_checks: Arc::new(Mutex::new(vec![])),
        };

        if configuration.verify_connection {
            database.verify_connection().await?;
        }
        database.spawn_health_checks();
        Ok(database)
    }

    /// Create an in-memory SQLite database with the given migrations
    pub async fn in_memory(usage: &str, migrations: &dyn MigrationSet) -> Result<Self> {
        debug!("create an in memory database for {usage}");
        Self::create(&DatabaseConfiguration::sqlite_in_memory(), migrations).await
    }

    /// Run the migrations on the primary
    pub async fn migrate(&self, migrations: &dyn MigrationSet) -> Result<Vec<i64>> {
        let pool = self.primary_pool().await;
        Migrator::new(self.database_type(), &self.configuration.schema)
            .migrate(&pool, migrations)
            .await
    }

    /// Return the configuration used to create this database
    pub fn configuration(&self) -> &DatabaseConfiguration {
        &self.configuration
    }

    /// Return the type of database
    pub fn database_type(&self) -> DatabaseType {
        self.configuration.database_type()
    }

    /// Return the pool of the primary currently in use
    pub async fn primary_pool(&self) -> AnyPool {
        self.primary.current.read().await.pool.clone()
    }

    /// Return the index, in the configured primaries, of the primary currently in use
    pub async fn primary_index(&self) -> usize {
        self.primary.current.read().await.index
    }

    /// Return the read replicas
    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    /// Acquire a connection for writing. It always comes from the primary.
    pub async fn write_connection(&self) -> Result<DatabaseConnection> {
        self.acquire_primary().await.map(DatabaseConnection::from)
    }

    /// Acquire a connection for reading
    pub async fn read_connection(&self, preference: ReadPreference) -> Result<DatabaseConnection> {
        if preference == ReadPreference::Primary || self.replicas.is_empty() {
            return self.write_connection().await;
        }

        let count = self.replicas.len();
        let start = self.next_replica.fetch_add(1, Ordering::Relaxed) % count;
        for offset in 0..count {
            let replica = &self.replicas[(start + offset) % count];
            if !replica.breaker.allow_request() {
                debug!(replica = %replica.name, "circuit open, skipping replica");
                continue;
            }
            match replica.pool.acquire().await {
                Ok(connection) => {
                    replica.breaker.record_success();
                    debug!(replica = %replica.name, "read routed to replica");
                    return Ok(DatabaseConnection::from(connection));
                }
                Err(e) => {
                    replica.breaker.record_failure();
                    let error = Error::ReplicaUnavailable {
                        replica: replica.name.clone(),
                    };
                    warn!(%error, cause = %e, "trying the next replica");
                }
            }
        }
        debug!("no replica available, read routed to the primary");
        self.write_connection().await
    }

    /// Start a transaction on the primary
    pub async fn begin(&self) -> Result<Transaction<'static, Any>> {
        let (index, pool) = self.current_primary().await;
        match pool.begin().await {
            Ok(transaction) => Ok(transaction),
            Err(e) if self.should_fail_over(&pool, &e) => {
                let pool = self.fail_over(index).await?;
                pool.begin().await.into_core()
            }
            Err(e) => Err(Self::pool_error(&pool, e)),
        }
    }

    /// Return the number of healthy replicas and open circuit breakers
    pub fn replica_statistics(&self) -> ReplicaStatistics {
        let open = self
            .replicas
            .iter()
            .filter(|r| r.breaker.state() == BreakerState::Open)
            .count();
        ReplicaStatistics {
            total_replicas: self.replicas.len(),
            healthy_replicas: self.replicas.len() - open,
            open_circuit_breakers: open,
        }
    }

    /// Return the state of the circuit breaker of each replica
    pub fn breaker_states(&self) -> Vec<BreakerState> {
        self.replicas.iter().map(|r| r.breaker.state()).collect()
    }

    /// Close all the pools
    pub async fn close(&self) {
        if let Ok(mut handles) = self.health_checks.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
        for replica in self.replicas.iter() {
            replica.pool.close().await;
        }
        self.primary_pool().await.close().await;
        info!("database connections closed");
    }

    async fn verify_connection(&self) -> Result<()> {
        let mut connection = self.acquire_primary().await?;
        connection.ping().await.into_core()?;
        for replica in self.replicas.iter() {
            match replica.pool.acquire().await {
                Ok(mut connection) => {
                    if let Err(e) = connection.ping().await {
                        warn!(replica = %replica.name, "replica ping failed: {e}");
                    }
                }
                Err(e) => warn!(replica = %replica.name, "replica not reachable: {e}"),
            }
        }
        Ok(())
    }

    /// Periodically acquire a connection from each replica so that the circuit breakers
    /// see failures, and recoveries, even when no read is issued
    fn spawn_health_checks(&self) {
        let period = self.configuration.pool.health_check_period_seconds;
        if period == 0 || self.replicas.is_empty() {
            return;
        }
        let replicas = self.replicas.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(period));
            interval.tick().await;
            loop {
                interval.tick().await;
                for replica in replicas.iter() {
                    if replica.breaker.state() == BreakerState::Open || replica.pool.is_closed()
                    {
                        continue;
                    }
                    if !replica.breaker.allow_request() {
                        continue;
                    }
                    match replica.pool.acquire().await {
                        Ok(mut connection) => match connection.ping().await {
                            Ok(()) => replica.breaker.record_success(),
                            Err(_) => replica.breaker.record_failure(),
                        },
                        Err(_) => replica.breaker.record_failure(),
                    }
                }
            }
        });
        if let Ok(mut handles) = self.health_checks.lock() {
            handles.push(handle);
        }
    }

    async fn current_primary(&self) -> (usize, AnyPool) {
        let current = self.primary.current.read().await;
        (current.index, current.pool.clone())
    }

    async fn acquire_primary(&self) -> Result<PoolConnection<Any>> {
        let (index, pool) = self.current_primary().await;
        match pool.acquire().await {
            Ok(connection) => Ok(connection),
            Err(e) if self.should_fail_over(&pool, &e) => {
                let pool = self.fail_over(index).await?;
                pool.acquire().await.map_err(|e| Self::pool_error(&pool, e))
            }
            Err(e) => Err(Self::pool_error(&pool, e)),
        }
    }

    /// A pool timing out while all its connections are in use is saturated, not unreachable
    fn is_saturated(pool: &AnyPool) -> bool {
        pool.num_idle() == 0 && pool.size() >= pool.options().get_max_connections()
    }

    fn should_fail_over(&self, pool: &AnyPool, error: &sqlx::Error) -> bool {
        self.primary.connection_strings.len() > 1
            && Error::is_connectivity(error)
            && !(matches!(error, sqlx::Error::PoolTimedOut) && Self::is_saturated(pool))
    }

    fn pool_error(pool: &AnyPool, error: sqlx::Error) -> Error {
        match error {
            sqlx::Error::PoolTimedOut if Self::is_saturated(pool) => Error::PoolExhausted,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Error::PrimaryUnavailable { hosts: vec![] }
            }
            other => Error::from(other),
        }
    }

    /// Replace the failed primary with the next writable one
    async fn fail_over(&self, failed_index: usize) -> Result<AnyPool> {
        let mut current = self.primary.current.write().await;
        if current.index != failed_index {
            // another task already switched to a new primary
            return Ok(current.pool.clone());
        }
        warn!(
            primary = failed_index,
            "primary unavailable, trying the next configured primary"
        );
        let active = Self::connect_first_writable(
            &self.configuration,
            &self.primary.connection_strings,
            Some(failed_index),
        )
        .await?;
        let previous = std::mem::replace(&mut *current, active);
        previous.pool.close().await;
        info!(primary = current.index, "switched to a new primary");
        Ok(current.pool.clone())
    }

    /// Try each primary in order, starting after `skip` if given,
    /// and return the first one accepting writes
    async fn connect_first_writable(
        configuration: &DatabaseConfiguration,
        connection_strings: &[String],
        skip: Option<usize>,
    ) -> Result<ActivePrimary> {
        let count = connection_strings.len();
        let start = skip.map(|s| s + 1).unwrap_or(0);
        for offset in 0..count {
            let index = (start + offset) % count;
            if Some(index) == skip {
                continue;
            }
            let connection_string = &connection_strings[index];
            let redacted = redact_connection_string(connection_string);
            let connect = Self::pool_options(configuration, true).connect(connection_string);
            let pool = match tokio::time::timeout(configuration.connect_timeout(), connect).await
            {
                Ok(Ok(pool)) => pool,
                Ok(Err(e)) => {
                    warn!(url = %redacted, "cannot connect to primary: {e}");
                    continue;
                }
                Err(_) => {
                    warn!(url = %redacted, "timeout while connecting to primary");
                    continue;
                }
            };
            match Self::is_writable(configuration.database_type(), connection_string, &pool).await
            {
                Ok(true) => {
                    info!(url = %redacted, "connected to primary");
                    return Ok(ActivePrimary { index, pool });
                }
                Ok(false) => {
                    warn!(url = %redacted, "primary is read-only, skipping it");
                    pool.close().await;
                }
                Err(e) => {
                    warn!(url = %redacted, "cannot check if the primary is writable: {e}");
                    pool.close().await;
                }
            }
        }
        Err(Error::PrimaryUnavailable {
            hosts: connection_strings
                .iter()
                .map(|c| redact_connection_string(c))
                .collect(),
        })
    }

    async fn is_writable(
        database_type: DatabaseType,
        connection_string: &str,
        pool: &AnyPool,
    ) -> Result<bool> {
        match database_type {
            DatabaseType::Sqlite => Ok(!connection_string.contains("mode=ro")),
            DatabaseType::Postgres => {
                let row = sqlx::query("SHOW transaction_read_only")
                    .fetch_one(pool)
                    .await
                    .into_core()?;
                let read_only: String = row.try_get(0).into_core()?;
                Ok(read_only.eq_ignore_ascii_case("off"))
            }
        }
    }

    fn pool_options(configuration: &DatabaseConfiguration, is_primary: bool) -> AnyPoolOptions {
        let pool = &configuration.pool;
        let mut options = AnyPoolOptions::new()
            .max_connections(pool.max_connection_count)
            .min_connections(pool.min_connection_count)
            .acquire_timeout(configuration.connect_timeout())
            .max_lifetime(Some(Duration::from_secs(
                pool.max_connection_lifetime_seconds,
            )))
            .idle_timeout(Some(Duration::from_secs(pool.max_connection_idle_seconds)))
            .test_before_acquire(true);

        if configuration.database_type() == DatabaseType::Sqlite && configuration.is_in_memory() {
            // SQLite in-memory DB get wiped if there is no connection to it.
            // The below setting tries to ensure there is always an open connection.
            // A single connection also avoids shared-cache table locks between connections,
            // which can make a statement be reset and stepped again.
            options = options
                .idle_timeout(None)
                .max_lifetime(None)
                .min_connections(1)
                .max_connections(1);
        }

        let database_type = configuration.database_type();
        let schema = configuration.schema.clone();
        options.after_connect(move |connection, _meta| {
            let schema = schema.clone();
            Box::pin(async move {
                match database_type {
                    DatabaseType::Postgres => {
                        let statement = format!("SET search_path TO \"{schema}\"");
                        Executor::execute(&mut *connection, statement.as_str()).await?;
                    }
                    DatabaseType::Sqlite => {
                        Executor::execute(&mut *connection, "PRAGMA foreign_keys = ON").await?;
                    }
                }
                if !is_primary {
                    debug!("connected to a read replica");
                }
                Ok(())
            })
        })
    }
}
