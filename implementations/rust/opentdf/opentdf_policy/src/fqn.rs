//! Fully qualified names of policy entities.
//!
//! ```text
//! https://<namespace>
//! https://<namespace>/attr/<attribute>
//! https://<namespace>/attr/<attribute>/value/<value>
//! https://<namespace>/obl/<obligation>
//! https://<namespace>/obl/<obligation>/value/<value>
//! https://<namespace>/resm/<group>
//! https://reg_res/<registered resource>
//! https://reg_res/<registered resource>/value/<value>
//! ```
//!
//! FQNs are canonically lower-case. Parsing lower-cases its input so that lookups are
//! case-insensitive.
use core::fmt;
use core::str::FromStr;
use opentdf_db::{Error, Result};

const SCHEME: &str = "https://";
const REGISTERED_RESOURCES: &str = "reg_res";

pub fn namespace_fqn(namespace: &str) -> String {
    format!("{SCHEME}{}", namespace.to_lowercase())
}

pub fn attribute_fqn(namespace: &str, attribute: &str) -> String {
    format!(
        "{}/attr/{}",
        namespace_fqn(namespace),
        attribute.to_lowercase()
    )
}

pub fn value_fqn(namespace: &str, attribute: &str, value: &str) -> String {
    format!(
        "{}/value/{}",
        attribute_fqn(namespace, attribute),
        value.to_lowercase()
    )
}

pub fn obligation_fqn(namespace: &str, obligation: &str) -> String {
    format!(
        "{}/obl/{}",
        namespace_fqn(namespace),
        obligation.to_lowercase()
    )
}

pub fn obligation_value_fqn(namespace: &str, obligation: &str, value: &str) -> String {
    format!(
        "{}/value/{}",
        obligation_fqn(namespace, obligation),
        value.to_lowercase()
    )
}

pub fn resource_mapping_group_fqn(namespace: &str, group: &str) -> String {
    format!(
        "{}/resm/{}",
        namespace_fqn(namespace),
        group.to_lowercase()
    )
}

pub fn registered_resource_fqn(name: &str) -> String {
    format!("{SCHEME}{REGISTERED_RESOURCES}/{}", name.to_lowercase())
}

pub fn registered_resource_value_fqn(name: &str, value: &str) -> String {
    format!(
        "{}/value/{}",
        registered_resource_fqn(name),
        value.to_lowercase()
    )
}

/// Parse the FQN of a registered resource or of one of its values into the
/// resource name and the optional value
pub fn parse_registered_resource_fqn(fqn: &str) -> Result<(String, Option<String>)> {
    let lower = fqn.trim().to_lowercase();
    let rest = lower
        .strip_prefix(SCHEME)
        .and_then(|rest| rest.strip_prefix(REGISTERED_RESOURCES))
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| Fqn::invalid(fqn))?;
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Fqn::invalid(fqn));
    }
    match segments[..] {
        [name] => Ok((name.to_string(), None)),
        [name, "value", value] => Ok((name.to_string(), Some(value.to_string()))),
        _ => Err(Fqn::invalid(fqn)),
    }
}

/// A parsed FQN
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fqn {
    Namespace {
        namespace: String,
    },
    Attribute {
        namespace: String,
        name: String,
    },
    Value {
        namespace: String,
        name: String,
        value: String,
    },
    Obligation {
        namespace: String,
        name: String,
    },
    ObligationValue {
        namespace: String,
        name: String,
        value: String,
    },
    ResourceMappingGroup {
        namespace: String,
        name: String,
    },
}

impl Fqn {
    /// Name of the namespace of the entity
    pub fn namespace(&self) -> &str {
        match self {
            Fqn::Namespace { namespace }
            | Fqn::Attribute { namespace, .. }
            | Fqn::Value { namespace, .. }
            | Fqn::Obligation { namespace, .. }
            | Fqn::ObligationValue { namespace, .. }
            | Fqn::ResourceMappingGroup { namespace, .. } => namespace,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Fqn::Value { .. })
    }

    /// FQN of the attribute of an attribute or value FQN
    pub fn attribute_fqn(&self) -> Option<String> {
        match self {
            Fqn::Attribute { namespace, name } | Fqn::Value { namespace, name, .. } => {
                Some(attribute_fqn(namespace, name))
            }
            _ => None,
        }
    }

    fn invalid(fqn: &str) -> Error {
        Error::SelectIdentifierInvalid {
            identifier: fqn.to_string(),
        }
    }
}

impl FromStr for Fqn {
    type Err = Error;

    fn from_str(fqn: &str) -> Result<Self> {
        let lower = fqn.trim().to_lowercase();
        let rest = lower.strip_prefix(SCHEME).ok_or_else(|| Fqn::invalid(fqn))?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Fqn::invalid(fqn));
        }
        let namespace = segments[0].to_string();
        let parsed = match segments[1..] {
            [] => Fqn::Namespace { namespace },
            ["attr", name] => Fqn::Attribute {
                namespace,
                name: name.to_string(),
            },
            ["attr", name, "value", value] => Fqn::Value {
                namespace,
                name: name.to_string(),
                value: value.to_string(),
            },
            ["obl", name] => Fqn::Obligation {
                namespace,
                name: name.to_string(),
            },
            ["obl", name, "value", value] => Fqn::ObligationValue {
                namespace,
                name: name.to_string(),
                value: value.to_string(),
            },
            ["resm", name] => Fqn::ResourceMappingGroup {
                namespace,
                name: name.to_string(),
            },
            _ => return Err(Fqn::invalid(fqn)),
        };
        Ok(parsed)
    }
}

impl fmt::Display for Fqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fqn = match self {
            Fqn::Namespace { namespace } => namespace_fqn(namespace),
            Fqn::Attribute { namespace, name } => attribute_fqn(namespace, name),
            Fqn::Value {
                namespace,
                name,
                value,
            } => value_fqn(namespace, name, value),
            Fqn::Obligation { namespace, name } => obligation_fqn(namespace, name),
            Fqn::ObligationValue {
                namespace,
                name,
                value,
            } => obligation_value_fqn(namespace, name, value),
            Fqn::ResourceMappingGroup { namespace, name } => {
                resource_mapping_group_fqn(namespace, name)
            }
        };
        f.write_str(&fqn)
    }
}
