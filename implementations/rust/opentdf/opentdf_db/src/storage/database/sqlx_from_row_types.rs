use sqlx::postgres::any::AnyTypeInfoKind;
use sqlx::database::HasValueRef;
use sqlx::error::BoxDynError;
use sqlx::{Any, Database, Decode, Type, Value, ValueRef};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// This type is used to map Option<T> fields for the types deriving `FromRow`
/// when a column can be NULL with a type that the Any driver reports as NULL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Nullable<T>(Option<T>);

impl<T: Clone> Nullable<T> {
    /// Return the Option corresponding to this value in the database
    pub fn to_option(&self) -> Option<T> {
        self.0.clone()
    }
}

impl<'d, T: Decode<'d, Any>> Decode<'d, Any> for Nullable<T> {
    fn decode(value: <Any as HasValueRef<'d>>::ValueRef) -> Result<Self, BoxDynError> {
        match value.type_info().kind() {
            AnyTypeInfoKind::Null => Ok(Nullable(None)),
            _ => Ok(Nullable(Some(<T as Decode<'d, Any>>::decode(value)?))),
        }
    }
}

impl<T: Type<Any>> Type<Any> for Nullable<T> {
    fn type_info() -> <Any as Database>::TypeInfo {
        <T as Type<Any>>::type_info()
    }

    fn compatible(ty: &<Any as Database>::TypeInfo) -> bool {
        <T as Type<Any>>::compatible(ty) || ty.kind() == AnyTypeInfoKind::Null
    }
}

/// This type is used to map boolean fields for the types deriving `FromRow`.
/// Postgres provides a proper boolean type but SQLite maps them as integers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Boolean(bool);

impl Boolean {
    /// Return the bool value
    pub fn to_bool(&self) -> bool {
        self.0
    }
}

impl<'d> Decode<'d, Any> for Boolean {
    fn decode(value: <Any as HasValueRef<'d>>::ValueRef) -> Result<Self, BoxDynError> {
        match value.type_info().kind() {
            AnyTypeInfoKind::Bool => {
                let v: bool = ValueRef::to_owned(&value).try_decode()?;
                Ok(Boolean(v))
            }
            AnyTypeInfoKind::SmallInt | AnyTypeInfoKind::Integer | AnyTypeInfoKind::BigInt => {
                let v: i64 = ValueRef::to_owned(&value).try_decode()?;
                Ok(Boolean(v != 0))
            }
            other => Err(format!("expected BOOLEAN or INTEGER, got {:?}", other).into()),
        }
    }
}

impl Type<Any> for Boolean {
    fn type_info() -> <Any as Database>::TypeInfo {
        <bool as Type<Any>>::type_info()
    }

    fn compatible(ty: &<Any as Database>::TypeInfo) -> bool {
        matches!(
            ty.kind(),
            AnyTypeInfoKind::Bool
                | AnyTypeInfoKind::SmallInt
                | AnyTypeInfoKind::Integer
                | AnyTypeInfoKind::BigInt
        )
    }
}

/// This type is used to map 64 bits integer fields for the types deriving `FromRow`.
///
/// The SQLite Any driver decodes integer values as 32 bits integers, so large values
/// like timestamps in microseconds or migration versions are stored in TEXT columns
/// with SQLite, and in BIGINT columns with Postgres.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub struct BigInteger(i64);

impl BigInteger {
    /// Return the i64 value
    pub fn to_i64(&self) -> i64 {
        self.0
    }
}

impl From<BigInteger> for i64 {
    fn from(value: BigInteger) -> Self {
        value.0
    }
}

impl<'d> Decode<'d, Any> for BigInteger {
    fn decode(value: <Any as HasValueRef<'d>>::ValueRef) -> Result<Self, BoxDynError> {
        match value.type_info().kind() {
            AnyTypeInfoKind::SmallInt | AnyTypeInfoKind::Integer | AnyTypeInfoKind::BigInt => {
                let v: i64 = ValueRef::to_owned(&value).try_decode()?;
                Ok(BigInteger(v))
            }
            AnyTypeInfoKind::Text => {
                let v: String = ValueRef::to_owned(&value).try_decode()?;
                Ok(BigInteger(v.trim().parse::<i64>()?))
            }
            other => Err(format!("expected BIGINT or TEXT, got {:?}", other).into()),
        }
    }
}

impl Type<Any> for BigInteger {
    fn type_info() -> <Any as Database>::TypeInfo {
        <i64 as Type<Any>>::type_info()
    }

    fn compatible(ty: &<Any as Database>::TypeInfo) -> bool {
        matches!(
            ty.kind(),
            AnyTypeInfoKind::SmallInt
                | AnyTypeInfoKind::Integer
                | AnyTypeInfoKind::BigInt
                | AnyTypeInfoKind::Text
        )
    }
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Return the current time in microseconds since the Unix epoch.
///
/// Successive calls in the same process return strictly increasing values,
/// so that rows can be ordered by creation time without ties.
pub fn now_micros() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default();
    let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);
    loop {
        let next = if now > last { now } else { last + 1 };
        match LAST_TIMESTAMP.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}
