use core::fmt;
use miette::Diagnostic;
use sqlx::error::{DatabaseError, ErrorKind as SqlxErrorKind};

/// Result type used by the policy store
pub type Result<T> = core::result::Result<T, Error>;

/// Kinds of errors returned by the store.
/// Clients can match on the kind, or on the stable prefix of the error message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    UuidInvalid,
    UniqueConstraintViolation,
    ForeignKeyViolation,
    NotNullViolation,
    RestrictViolation,
    CheckViolation,
    EnumValueInvalid,
    ListLimitTooLarge,
    FqnMissingValue,
    FqnMismatch,
    UnencryptedPrivateKey,
    ExpectedBase64EncodedValue,
    UnknownSelectIdentifier,
    SelectIdentifierInvalid,
    MissingValue,
    InvalidName,
    CannotUpdateToUnspecified,
    InactiveAttributeValue,
    NamespaceMismatch,
    KeyIdMismatch,
    KasUriMismatch,
    InvalidObligationTriggerParameter,
    KeyRotationFailed,
    InvalidBaseKey,
    KeyManagerNotRegistered,
    ReadOnlyViolation,
    PoolExhausted,
    TxConflict,
    NestedTxNotSupported,
    TransactionFinished,
    PrimaryUnavailable,
    ReplicaUnavailable,
    MigrationFailed,
    InvalidConfiguration,
    Serialization,
    Internal,
}

/// Errors returned by the policy store
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum Error {
    #[error("ErrNotFound: value not found")]
    NotFound,

    #[error("ErrUUIDInvalid: value not a valid UUID")]
    UuidInvalid,

    #[error("ErrUniqueConstraintViolation: value must be unique")]
    UniqueConstraintViolation { detail: Option<String> },

    #[error("ErrForeignKeyViolation: value is referenced by another table")]
    ForeignKeyViolation { detail: Option<String> },

    #[error("ErrNotNullViolation: value cannot be null")]
    NotNullViolation { detail: Option<String> },

    #[error("ErrRestrictViolation: value cannot be deleted due to restriction")]
    RestrictViolation { detail: Option<String> },

    #[error("ErrCheckViolation: check constraint violation")]
    CheckViolation { detail: Option<String> },

    #[error("ErrEnumValueInvalid: not a valid enum value")]
    EnumValueInvalid { value: String },

    #[error("ErrListLimitTooLarge: requested limit greater than configured maximum")]
    ListLimitTooLarge { limit: u32, max: u32 },

    #[error("ErrFqnMissingValue: FQN must include a value")]
    FqnMissingValue { fqn: String },

    #[error("ErrFqnMismatch: FQN mismatch")]
    FqnMismatch,

    #[error("ErrUnencryptedPrivateKey: private key must be wrapped")]
    UnencryptedPrivateKey,

    #[error("ErrExpectedBase64EncodedValue: expected base64 encoded value")]
    ExpectedBase64EncodedValue,

    #[error("ErrUnknownSelectIdentifier: unknown identifier type for select query")]
    UnknownSelectIdentifier,

    #[error("ErrSelectIdentifierInvalid: invalid identifier value for select query")]
    SelectIdentifierInvalid { identifier: String },

    #[error("ErrMissingValue: value must be included")]
    MissingValue { field: &'static str },

    #[error("ErrInvalidName: {field} '{name}' is not a valid name")]
    InvalidName { field: &'static str, name: String },

    #[error("ErrCannotUpdateToUnspecified: cannot update to unspecified value")]
    CannotUpdateToUnspecified,

    #[error("ErrAttributeValueInactive: attribute value inactive")]
    InactiveAttributeValue,

    #[error("ErrNamespaceMismatch: namespace mismatch")]
    NamespaceMismatch,

    #[error("ErrKIDMismatch: Key ID mismatch")]
    KeyIdMismatch,

    #[error("ErrKasURIMismatch: KAS URI mismatch")]
    KasUriMismatch,

    #[error("ErrInvalidOblTriParam: either the obligation value, attribute value, or action provided was not found")]
    InvalidObligationTriggerParameter,

    #[error("ErrTextKeyRotationFailed: key rotation failed")]
    KeyRotationFailed { reason: String },

    #[error("ErrInvalidBaseKey: {reason}")]
    InvalidBaseKey { reason: String },

    #[error("ErrKeyManagerNotRegistered: manager type '{manager}' is not registered")]
    KeyManagerNotRegistered { manager: String },

    #[error("ErrReadOnlyViolation: {message}")]
    ReadOnlyViolation { message: String },

    #[error("ErrPoolExhausted: no connection available within the connect timeout")]
    PoolExhausted,

    #[error("ErrTxConflict: transaction serialization failure")]
    TxConflict { detail: Option<String> },

    #[error("ErrNestedTxNotSupported: a transaction is already in progress")]
    NestedTxNotSupported,

    #[error("ErrTxFinished: the transaction was already committed or rolled back")]
    TransactionFinished,

    #[error("ErrPrimaryUnavailable: no writable primary could be reached")]
    PrimaryUnavailable { hosts: Vec<String> },

    #[error("ErrReplicaUnavailable: replica {replica} is unavailable")]
    ReplicaUnavailable { replica: String },

    #[error("ErrMigrationFailed: migration {version} ({name}) failed: {message}")]
    MigrationFailed {
        version: i64,
        name: String,
        message: String,
    },

    #[error("ErrInvalidConfiguration: {message}")]
    InvalidConfiguration { message: String },

    #[error("ErrMarshalValueFailed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ErrInternal: {context}: {message}")]
    Internal { context: String, message: String },
}

impl Error {
    /// Return the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound => ErrorKind::NotFound,
            Error::UuidInvalid => ErrorKind::UuidInvalid,
            Error::UniqueConstraintViolation { .. } => ErrorKind::UniqueConstraintViolation,
            Error::ForeignKeyViolation { .. } => ErrorKind::ForeignKeyViolation,
            Error::NotNullViolation { .. } => ErrorKind::NotNullViolation,
            Error::RestrictViolation { .. } => ErrorKind::RestrictViolation,
            Error::CheckViolation { .. } => ErrorKind::CheckViolation,
            Error::EnumValueInvalid { .. } => ErrorKind::EnumValueInvalid,
            Error::ListLimitTooLarge { .. } => ErrorKind::ListLimitTooLarge,
            Error::FqnMissingValue { .. } => ErrorKind::FqnMissingValue,
            Error::FqnMismatch => ErrorKind::FqnMismatch,
            Error::UnencryptedPrivateKey => ErrorKind::UnencryptedPrivateKey,
            Error::ExpectedBase64EncodedValue => ErrorKind::ExpectedBase64EncodedValue,
            Error::UnknownSelectIdentifier => ErrorKind::UnknownSelectIdentifier,
            Error::SelectIdentifierInvalid { .. } => ErrorKind::SelectIdentifierInvalid,
            Error::MissingValue { .. } => ErrorKind::MissingValue,
            Error::InvalidName { .. } => ErrorKind::InvalidName,
            Error::CannotUpdateToUnspecified => ErrorKind::CannotUpdateToUnspecified,
            Error::InactiveAttributeValue => ErrorKind::InactiveAttributeValue,
            Error::NamespaceMismatch => ErrorKind::NamespaceMismatch,
            Error::KeyIdMismatch => ErrorKind::KeyIdMismatch,
            Error::KasUriMismatch => ErrorKind::KasUriMismatch,
            Error::InvalidObligationTriggerParameter => {
                ErrorKind::InvalidObligationTriggerParameter
            }
            Error::KeyRotationFailed { .. } => ErrorKind::KeyRotationFailed,
            Error::InvalidBaseKey { .. } => ErrorKind::InvalidBaseKey,
            Error::KeyManagerNotRegistered { .. } => ErrorKind::KeyManagerNotRegistered,
            Error::ReadOnlyViolation { .. } => ErrorKind::ReadOnlyViolation,
            Error::PoolExhausted => ErrorKind::PoolExhausted,
            Error::TxConflict { .. } => ErrorKind::TxConflict,
            Error::NestedTxNotSupported => ErrorKind::NestedTxNotSupported,
            Error::TransactionFinished => ErrorKind::TransactionFinished,
            Error::PrimaryUnavailable { .. } => ErrorKind::PrimaryUnavailable,
            Error::ReplicaUnavailable { .. } => ErrorKind::ReplicaUnavailable,
            Error::MigrationFailed { .. } => ErrorKind::MigrationFailed,
            Error::InvalidConfiguration { .. } => ErrorKind::InvalidConfiguration,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Return true if this error has the given kind
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    /// Create an internal error with some context
    pub fn internal(context: impl fmt::Display, message: impl fmt::Display) -> Error {
        Error::Internal {
            context: context.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl fmt::Display) -> Error {
        Error::InvalidConfiguration {
            message: message.to_string(),
        }
    }

    /// Return true if the error was caused by a lost or unreachable connection.
    /// Those errors can be recovered by switching to another host.
    pub fn is_connectivity(err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
        )
    }
}

/// Classify a sqlx error into one of the store error kinds
impl From<sqlx::Error> for Error {
    #[track_caller]
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound,
            sqlx::Error::PoolTimedOut => Error::PoolExhausted,
            sqlx::Error::Database(db_error) => from_database_error(db_error.as_ref()),
            sqlx::Error::ColumnDecode { index, source } => {
                Error::internal(format!("decoding column {index}"), source)
            }
            other => Error::internal("database error", other),
        }
    }
}

// PostgreSQL SQLSTATE codes
const PG_READ_ONLY_SQL_TRANSACTION: &str = "25006";
const PG_SERIALIZATION_FAILURE: &str = "40001";
const PG_DEADLOCK_DETECTED: &str = "40P01";
const PG_RESTRICT_VIOLATION: &str = "23001";
const PG_INVALID_TEXT_REPRESENTATION: &str = "22P02";

// SQLite primary result codes
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;
const SQLITE_READONLY: i64 = 8;

fn from_database_error(db_error: &(dyn DatabaseError + 'static)) -> Error {
    let detail = Some(db_error.message().to_string());
    match db_error.kind() {
        SqlxErrorKind::UniqueViolation => return Error::UniqueConstraintViolation { detail },
        SqlxErrorKind::ForeignKeyViolation => return Error::ForeignKeyViolation { detail },
        SqlxErrorKind::NotNullViolation => return Error::NotNullViolation { detail },
        SqlxErrorKind::CheckViolation => return Error::CheckViolation { detail },
        _ => {}
    }

    let code = db_error.code().map(|c| c.to_string()).unwrap_or_default();
    match code.as_str() {
        PG_READ_ONLY_SQL_TRANSACTION => {
            return Error::ReadOnlyViolation {
                message: db_error.message().to_string(),
            }
        }
        PG_SERIALIZATION_FAILURE | PG_DEADLOCK_DETECTED => return Error::TxConflict { detail },
        PG_RESTRICT_VIOLATION => return Error::RestrictViolation { detail },
        PG_INVALID_TEXT_REPRESENTATION => return Error::UuidInvalid,
        _ => {}
    }

    // SQLite reports extended result codes, the primary code is in the low byte
    if let Ok(extended) = code.parse::<i64>() {
        match extended & 0xff {
            SQLITE_READONLY => {
                return Error::ReadOnlyViolation {
                    message: db_error.message().to_string(),
                }
            }
            SQLITE_BUSY | SQLITE_LOCKED => return Error::TxConflict { detail },
            _ => {}
        }
    }

    Error::internal(format!("database error {code}"), db_error.message())
}

/// This trait provides some syntax for transforming sqlx errors into store errors
pub trait FromSqlxError<T> {
    /// Make a store Error
    fn into_core(self) -> Result<T>;
}

impl<T> FromSqlxError<T> for core::result::Result<T, sqlx::error::Error> {
    #[track_caller]
    fn into_core(self) -> Result<T> {
        self.map_err(Error::from)
    }
}

/// This trait provides some syntax to shorten queries execution returning ()
pub trait ToVoid<T> {
    /// Return a () value
    fn void(self) -> Result<()>;
}

impl<T> ToVoid<T> for core::result::Result<T, sqlx::error::Error> {
    #[track_caller]
    fn void(self) -> Result<()> {
        self.map(|_| ()).into_core()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_messages() {
        assert_eq!(Error::NotFound.to_string(), "ErrNotFound: value not found");
        assert_eq!(
            Error::UniqueConstraintViolation { detail: None }.to_string(),
            "ErrUniqueConstraintViolation: value must be unique"
        );
        assert_eq!(
            Error::ListLimitTooLarge {
                limit: 11,
                max: 10
            }
            .to_string(),
            "ErrListLimitTooLarge: requested limit greater than configured maximum"
        );
        assert_eq!(
            Error::KeyManagerNotRegistered {
                manager: "aws".to_string()
            }
            .to_string(),
            "ErrKeyManagerNotRegistered: manager type 'aws' is not registered"
        );
    }

    #[test]
    fn test_classify_driver_errors() {
        assert!(Error::from(sqlx::Error::RowNotFound).is(ErrorKind::NotFound));
        assert!(Error::from(sqlx::Error::PoolTimedOut).is(ErrorKind::PoolExhausted));
        assert!(Error::from(sqlx::Error::PoolClosed).is(ErrorKind::Internal));
        assert!(Error::is_connectivity(&sqlx::Error::PoolClosed));
        assert!(!Error::is_connectivity(&sqlx::Error::RowNotFound));
    }
}
