use opentdf_db::env::get_env_with_default;
use opentdf_db::{Error, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the default list limit
pub const OPENTDF_LIST_REQUEST_LIMIT_DEFAULT: &str = "OPENTDF_LIST_REQUEST_LIMIT_DEFAULT";
/// Environment variable overriding the maximum list limit
pub const OPENTDF_LIST_REQUEST_LIMIT_MAX: &str = "OPENTDF_LIST_REQUEST_LIMIT_MAX";

/// Limits applied to the policy list operations, and the key managers known to the platform
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfiguration {
    /// Limit used when a list request does not specify one
    pub list_request_limit_default: u32,
    /// Largest limit accepted in a list request
    pub list_request_limit_max: u32,
    /// Key managers a provider config can use. Any manager is accepted when empty
    pub key_managers: Vec<String>,
}

impl Default for PolicyConfiguration {
    fn default() -> Self {
        Self {
            list_request_limit_default: 1000,
            list_request_limit_max: 2500,
            key_managers: vec![],
        }
    }
}

impl PolicyConfiguration {
    pub fn new(list_request_limit_default: u32, list_request_limit_max: u32) -> Result<Self> {
        let configuration = Self {
            list_request_limit_default,
            list_request_limit_max,
            key_managers: vec![],
        };
        configuration.validate()?;
        Ok(configuration)
    }

    /// Read the limits from the environment, with the default values as a fallback
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Self::new(
            get_env_with_default(
                OPENTDF_LIST_REQUEST_LIMIT_DEFAULT,
                defaults.list_request_limit_default,
            )?,
            get_env_with_default(
                OPENTDF_LIST_REQUEST_LIMIT_MAX,
                defaults.list_request_limit_max,
            )?,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.list_request_limit_default == 0 {
            return Err(Error::configuration(
                "list_request_limit_default must be greater than 0",
            ));
        }
        if self.list_request_limit_default > self.list_request_limit_max {
            return Err(Error::configuration(format!(
                "list_request_limit_default ({}) cannot be greater than list_request_limit_max ({})",
                self.list_request_limit_default, self.list_request_limit_max
            )));
        }
        Ok(())
    }

    /// Set the key managers a provider config can use
    pub fn with_key_managers(mut self, key_managers: &[&str]) -> Self {
        self.key_managers = key_managers.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Check that a key manager is registered
    pub fn check_key_manager(&self, manager: &str) -> Result<()> {
        if self.key_managers.is_empty() || self.key_managers.iter().any(|m| m == manager) {
            Ok(())
        } else {
            Err(Error::KeyManagerNotRegistered {
                manager: manager.to_string(),
            })
        }
    }
}
