use opentdf_db::{BigInteger, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declare an enum stored as text in the database and exchanged as a number or a name.
///
/// Unknown numbers or names fail with `EnumValueInvalid`.
macro_rules! policy_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $number:literal => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Name of the variant, as stored in the database
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            /// Number of the variant, as exchanged on the wire
            pub fn number(&self) -> i32 {
                match self {
                    $(Self::$variant => $number),+
                }
            }
        }

        impl TryFrom<i32> for $name {
            type Error = opentdf_db::Error;

            fn try_from(number: i32) -> core::result::Result<Self, Self::Error> {
                match number {
                    $($number => Ok(Self::$variant),)+
                    _ => Err(opentdf_db::Error::EnumValueInvalid {
                        value: number.to_string(),
                    }),
                }
            }
        }

        impl core::str::FromStr for $name {
            type Err = opentdf_db::Error;

            fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
                match s.to_uppercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(opentdf_db::Error::EnumValueInvalid {
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> core::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> core::result::Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use policy_enum;

policy_enum!(
    /// Filter applied by list operations on the active state of entities
    ActiveStateEnum {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        Active = 1 => "ACTIVE",
        Inactive = 2 => "INACTIVE",
        Any = 3 => "ANY",
    }
);

impl ActiveStateEnum {
    /// Return a SQL condition on the `active` columns of an entity and all its ancestors.
    ///
    /// An entity is active only if all its ancestors are active. An unspecified state lists
    /// the active entities.
    pub(crate) fn condition(&self, active_columns: &[&str]) -> String {
        let all_active = format!("({})", active_columns.join(" AND "));
        match self {
            ActiveStateEnum::Unspecified | ActiveStateEnum::Active => all_active,
            ActiveStateEnum::Inactive => format!("NOT {all_active}"),
            ActiveStateEnum::Any => "1 = 1".to_string(),
        }
    }
}

policy_enum!(
    /// How metadata labels are modified by an update
    MetadataUpdateEnum {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        Extend = 1 => "EXTEND",
        Replace = 2 => "REPLACE",
    }
);

/// Metadata labels
pub type Labels = BTreeMap<String, String>;

/// Metadata attached to every policy entity
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub labels: Labels,
    /// Creation time, in microseconds since the Unix epoch
    pub created_at: i64,
    /// Last update time, in microseconds since the Unix epoch
    pub updated_at: i64,
}

impl Metadata {
    pub(crate) fn from_row(
        labels: &str,
        created_at: BigInteger,
        updated_at: BigInteger,
    ) -> Result<Self> {
        Ok(Metadata {
            labels: parse_labels(labels)?,
            created_at: created_at.to_i64(),
            updated_at: updated_at.to_i64(),
        })
    }
}

/// The part of the metadata which can be set by clients
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataMutable {
    pub labels: Labels,
}

impl MetadataMutable {
    pub fn new(labels: Labels) -> Self {
        Self { labels }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Labels to store at creation time
    pub(crate) fn labels_json(metadata: &Option<MetadataMutable>) -> Result<String> {
        let labels = metadata.as_ref().map(|m| m.labels.clone()).unwrap_or_default();
        Ok(serde_json::to_string(&labels)?)
    }

    /// Compute the labels resulting from an update.
    /// Labels are extended unless the behavior is `Replace`.
    pub(crate) fn updated_labels(
        existing: Labels,
        update: &Option<MetadataMutable>,
        behavior: MetadataUpdateEnum,
    ) -> Labels {
        match (update, behavior) {
            (None, _) => existing,
            (Some(update), MetadataUpdateEnum::Replace) => update.labels.clone(),
            (Some(update), _) => {
                let mut labels = existing;
                labels.extend(update.labels.clone());
                labels
            }
        }
    }
}

pub(crate) fn parse_labels(json: &str) -> Result<Labels> {
    Ok(serde_json::from_str(json)?)
}

/// Pagination parameters of a list request.
/// A limit of 0 selects the configured default limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub offset: u32,
}

impl PageRequest {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

/// Pagination information returned by list operations.
/// `next_offset` is 0 when there are no more items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageResponse {
    pub current_offset: u32,
    pub next_offset: u32,
    pub total: u32,
}

impl PageResponse {
    pub(crate) fn new(offset: i64, limit: i64, total: i64) -> Self {
        let next = offset + limit;
        PageResponse {
            current_offset: offset as u32,
            next_offset: if next < total { next as u32 } else { 0 },
            total: total as u32,
        }
    }
}

/// A page of entities
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub pagination: PageResponse,
}

/// Selects an entity, either by id or by one of its unique names.
///
/// Each entity family supports a subset of the variants, the others fail with
/// `UnknownSelectIdentifier`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Identifier {
    #[default]
    Unspecified,
    Id(String),
    Fqn(String),
    Name(String),
    Uri(String),
}

impl Identifier {
    pub fn id(id: impl Into<String>) -> Self {
        Identifier::Id(id.into())
    }

    pub fn fqn(fqn: impl Into<String>) -> Self {
        Identifier::Fqn(fqn.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Identifier::Name(name.into())
    }

    pub fn uri(uri: impl Into<String>) -> Self {
        Identifier::Uri(uri.into())
    }

    /// Reject unspecified and empty identifiers
    pub(crate) fn check(&self) -> Result<&Self> {
        match self {
            Identifier::Unspecified => Err(Error::UnknownSelectIdentifier),
            Identifier::Id(s) | Identifier::Fqn(s) | Identifier::Name(s) | Identifier::Uri(s)
                if s.trim().is_empty() =>
            {
                Err(Error::UnknownSelectIdentifier)
            }
            other => Ok(other),
        }
    }
}
