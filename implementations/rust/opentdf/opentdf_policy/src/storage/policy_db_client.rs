use crate::models::{PageRequest, PageResponse};
use crate::storage::PolicyMigrations;
use crate::{validation, PolicyConfiguration};
use futures::future::BoxFuture;
use opentdf_db::{
    DatabaseConfiguration, DatabaseConnection, Error, ErrorKind, ReadPreference, Result,
    SharedTransaction, SqlxDatabase, ToVoid,
};
use sqlx::{Any, AnyConnection, FromRow, Transaction};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Client of the policy database.
///
/// It implements all the policy repositories. Writes go to the primary, reads go to the
/// replicas unless the client was created with [`PolicyDbClient::with_force_primary`].
///
/// Inside [`PolicyDbClient::run_in_tx`] the client passed to the closure runs all its
/// operations in the same transaction.
#[derive(Clone)]
pub struct PolicyDbClient {
    database: SqlxDatabase,
    configuration: PolicyConfiguration,
    read_preference: ReadPreference,
    transaction: Option<Arc<Mutex<SharedTransaction>>>,
}

impl core::fmt::Debug for PolicyDbClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PolicyDbClient")
            .field("database", &self.database)
            .field("read_preference", &self.read_preference)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl PolicyDbClient {
    pub fn new(database: SqlxDatabase, configuration: PolicyConfiguration) -> Self {
        debug!("create a policy database client");
        Self {
            database,
            configuration,
            read_preference: ReadPreference::default(),
            transaction: None,
        }
    }

    /// Connect to the database and run the policy migrations if configured
    pub async fn create(
        database_configuration: &DatabaseConfiguration,
        configuration: PolicyConfiguration,
    ) -> Result<Self> {
        configuration.validate()?;
        let database = SqlxDatabase::create(database_configuration, &PolicyMigrations).await?;
        Ok(Self::new(database, configuration))
    }

    /// Create a client for a fresh in-memory database
    pub async fn in_memory(usage: &str) -> Result<Self> {
        let database = SqlxDatabase::in_memory(usage, &PolicyMigrations).await?;
        Ok(Self::new(database, PolicyConfiguration::default()))
    }

    /// Return a client reading from the primary, to read the results of previous writes
    pub fn with_force_primary(&self) -> Self {
        Self {
            read_preference: ReadPreference::Primary,
            ..self.clone()
        }
    }

    pub fn with_configuration(self, configuration: PolicyConfiguration) -> Self {
        Self {
            configuration,
            ..self
        }
    }

    pub fn database(&self) -> &SqlxDatabase {
        &self.database
    }

    pub fn configuration(&self) -> &PolicyConfiguration {
        &self.configuration
    }

    pub fn read_preference(&self) -> ReadPreference {
        self.read_preference
    }

    /// Return true if this client is bound to a transaction
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Run some operations in a transaction.
    ///
    /// The closure receives a client bound to the transaction. The transaction is committed
    /// if the closure succeeds and rolled back otherwise. A transaction failing with a
    /// serialization conflict is retried once. Calling `run_in_tx` on a client bound to a
    /// transaction fails with `NestedTxNotSupported`.
    pub async fn run_in_tx<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> Fn(&'c PolicyDbClient) -> BoxFuture<'c, Result<T>> + Send + Sync,
    {
        if self.in_transaction() {
            return Err(Error::NestedTxNotSupported);
        }
        match self.run_in_tx_once(&f).await {
            Err(error) if error.is(ErrorKind::TxConflict) => {
                warn!(%error, "transaction conflict, retrying once");
                self.run_in_tx_once(&f).await
            }
            result => result,
        }
    }

    async fn run_in_tx_once<T, F>(&self, f: &F) -> Result<T>
    where
        T: Send,
        F: for<'c> Fn(&'c PolicyDbClient) -> BoxFuture<'c, Result<T>> + Send + Sync,
    {
        let shared = Arc::new(Mutex::new(Some(self.database.begin().await?)));
        let client = PolicyDbClient {
            database: self.database.clone(),
            configuration: self.configuration.clone(),
            read_preference: ReadPreference::Primary,
            transaction: Some(shared.clone()),
        };
        let result = f(&client).await;
        let transaction = shared.lock().await.take();

        match (result, transaction) {
            (Ok(value), Some(transaction)) => {
                transaction.commit().await.void()?;
                debug!("transaction committed");
                Ok(value)
            }
            (Ok(_), None) => Err(Error::TransactionFinished),
            (Err(error), Some(transaction)) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    warn!(%error, %rollback_error, "cannot roll back the transaction");
                } else {
                    debug!(%error, "transaction rolled back");
                }
                Err(error)
            }
            (Err(error), None) => Err(error),
        }
    }

    /// Acquire a connection to run a read query
    pub(crate) async fn read_connection(&self) -> Result<DatabaseConnection> {
        match &self.transaction {
            Some(transaction) => Self::transaction_connection(transaction).await,
            None => self.database.read_connection(self.read_preference).await,
        }
    }

    /// Acquire a connection to run a single write statement
    pub(crate) async fn write_connection(&self) -> Result<DatabaseConnection> {
        match &self.transaction {
            Some(transaction) => Self::transaction_connection(transaction).await,
            None => self.database.write_connection().await,
        }
    }

    /// Start a transaction for several write statements, or join the transaction this
    /// client is bound to
    pub(crate) async fn begin(&self) -> Result<PolicyTransaction> {
        match &self.transaction {
            Some(transaction) => Ok(PolicyTransaction::Joined(
                Self::transaction_connection(transaction).await?,
            )),
            None => Ok(PolicyTransaction::Owned(self.database.begin().await?)),
        }
    }

    async fn transaction_connection(
        transaction: &Arc<Mutex<SharedTransaction>>,
    ) -> Result<DatabaseConnection> {
        let guard = transaction.clone().lock_owned().await;
        OwnedMutexGuard::try_map(guard, |t| t.as_mut().map(|t| &mut **t))
            .map(DatabaseConnection::Transaction)
            .map_err(|_| Error::TransactionFinished)
    }

    /// Return the limit and offset of a list request
    pub(crate) fn page_limits(&self, page: &PageRequest) -> Result<(i64, i64)> {
        validation::page_limits(&self.configuration, page)
    }

    /// Return the pagination of a list response
    pub(crate) fn page_response(limit: i64, offset: i64, total: i64) -> PageResponse {
        PageResponse::new(offset, limit, total)
    }
}

/// Result of a `SELECT COUNT(*) AS total` query
#[derive(FromRow)]
pub(crate) struct CountRow {
    pub(crate) total: i64,
}

/// A transaction used by an operation writing to several tables.
///
/// When the client is bound to a transaction, the operation joins it and committing is
/// left to [`PolicyDbClient::run_in_tx`].
pub(crate) enum PolicyTransaction {
    Owned(Transaction<'static, Any>),
    Joined(DatabaseConnection),
}

impl PolicyTransaction {
    pub(crate) async fn commit(self) -> Result<()> {
        match self {
            PolicyTransaction::Owned(transaction) => transaction.commit().await.void(),
            PolicyTransaction::Joined(_) => Ok(()),
        }
    }
}

impl Deref for PolicyTransaction {
    type Target = AnyConnection;

    fn deref(&self) -> &Self::Target {
        match self {
            PolicyTransaction::Owned(transaction) => &**transaction,
            PolicyTransaction::Joined(connection) => &**connection,
        }
    }
}

impl DerefMut for PolicyTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            PolicyTransaction::Owned(transaction) => &mut **transaction,
            PolicyTransaction::Joined(connection) => &mut **connection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateNamespaceRequest, Identifier};
    use crate::storage::NamespacesRepository;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_run_in_tx_commits() -> Result<()> {
        let client = PolicyDbClient::in_memory("run_in_tx_commit").await?;

        let id = client
            .run_in_tx(|tx| {
                async move {
                    let namespace = tx
                        .create_namespace(&CreateNamespaceRequest::new("committed.org"))
                        .await?;
                    // reads in the transaction see its writes
                    let read = tx.get_namespace(&Identifier::id(&namespace.id)).await?;
                    assert_eq!(read.name, "committed.org");
                    Ok(namespace.id)
                }
                .boxed()
            })
            .await?;

        let namespace = client.get_namespace(&Identifier::id(&id)).await?;
        assert_eq!(namespace.fqn, "https://committed.org");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_in_tx_rolls_back() -> Result<()> {
        let client = PolicyDbClient::in_memory("run_in_tx_rollback").await?;

        let result: Result<()> = client
            .run_in_tx(|tx| {
                async move {
                    tx.create_namespace(&CreateNamespaceRequest::new("rolled-back.org"))
                        .await?;
                    // fails with a unique constraint violation
                    tx.create_namespace(&CreateNamespaceRequest::new("rolled-back.org"))
                        .await?;
                    Ok(())
                }
                .boxed()
            })
            .await;
        assert!(result.unwrap_err().is(ErrorKind::UniqueConstraintViolation));

        // no partial write: the FQN index does not know the namespace either
        let error = client
            .get_namespace(&Identifier::fqn("https://rolled-back.org"))
            .await
            .unwrap_err();
        assert!(error.is(ErrorKind::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn test_nested_transactions_are_rejected() -> Result<()> {
        let client = PolicyDbClient::in_memory("run_in_tx_nested").await?;

        let result: Result<()> = client
            .run_in_tx(|tx| {
                async move { tx.run_in_tx(|_| async { Ok(()) }.boxed()).await }.boxed()
            })
            .await;
        assert!(result.unwrap_err().is(ErrorKind::NestedTxNotSupported));
        Ok(())
    }
}
