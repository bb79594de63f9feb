use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, Transaction};
use std::ops::{Deref, DerefMut};
use tokio::sync::OwnedMappedMutexGuard;

/// Where a read query should be sent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadPreference {
    /// Round-robin across the healthy replicas, falling back to the primary
    #[default]
    Replica,
    /// Always read from the primary, used to read your own writes
    Primary,
}

/// A transaction which can be shared between several repository calls
pub type SharedTransaction = Option<Transaction<'static, Any>>;

/// A connection which can be used to run queries.
///
/// It is either a connection checked out of a pool, or the connection of
/// the transaction currently in progress.
pub enum DatabaseConnection {
    Pool(PoolConnection<Any>),
    Transaction(OwnedMappedMutexGuard<SharedTransaction, AnyConnection>),
}

impl Deref for DatabaseConnection {
    type Target = AnyConnection;

    fn deref(&self) -> &Self::Target {
        match self {
            DatabaseConnection::Pool(connection) => connection,
            DatabaseConnection::Transaction(connection) => connection,
        }
    }
}

impl DerefMut for DatabaseConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            DatabaseConnection::Pool(connection) => connection,
            DatabaseConnection::Transaction(connection) => connection,
        }
    }
}

impl From<PoolConnection<Any>> for DatabaseConnection {
    fn from(connection: PoolConnection<Any>) -> Self {
        DatabaseConnection::Pool(connection)
    }
}

impl DatabaseConnection {
    /// Return true if this connection belongs to a transaction
    pub fn in_transaction(&self) -> bool {
        matches!(self, DatabaseConnection::Transaction(_))
    }
}
