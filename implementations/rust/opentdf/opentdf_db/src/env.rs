use crate::{Error, Result};
use std::env;
use std::env::VarError;
use std::time::Duration;

/// Get environmental value [var_name]. If value is not found returns Ok(None)
pub fn get_env<T: FromString>(var_name: &str) -> Result<Option<T>> {
    get_env_impl::<Option<T>>(var_name, None)
}

/// Get environmental value [var_name]. If value is not found returns [default_value]
pub fn get_env_with_default<T: FromString>(var_name: &str, default_value: T) -> Result<T> {
    get_env_impl::<T>(var_name, default_value)
}

fn get_env_impl<T: FromString>(var_name: &str, default_value: T) -> Result<T> {
    match env::var(var_name) {
        Ok(val) => T::from_string(&val).map_err(|e| {
            Error::configuration(format!("invalid value for {var_name}: {e}"))
        }),
        Err(e) => match e {
            VarError::NotPresent => Ok(default_value),
            VarError::NotUnicode(_) => Err(Error::configuration(format!(
                "get_env error: {var_name} is not unicode"
            ))),
        },
    }
}

/// Types that can be parsed from an environment variable
pub trait FromString: Sized {
    /// Parses string and gives the result. Can return an error in case
    /// of parsing error.
    fn from_string(s: &str) -> Result<Self>;
}

impl<T: FromString> FromString for Option<T> {
    fn from_string(s: &str) -> Result<Self> {
        T::from_string(s).map(Some)
    }
}

impl FromString for bool {
    fn from_string(s: &str) -> Result<Self> {
        let s = s.to_lowercase();
        match s.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::configuration(format!("bool parsing error: {s}"))),
        }
    }
}

impl FromString for String {
    fn from_string(s: &str) -> Result<Self> {
        Ok(s.to_owned())
    }
}

impl<T: FromString> FromString for Vec<T> {
    fn from_string(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|x| !x.is_empty())
            .map(T::from_string)
            .collect()
    }
}

impl FromString for u16 {
    fn from_string(s: &str) -> Result<Self> {
        s.parse::<u16>()
            .map_err(|_| Error::configuration("u16 parsing error"))
    }
}

impl FromString for u32 {
    fn from_string(s: &str) -> Result<Self> {
        s.parse::<u32>()
            .map_err(|_| Error::configuration("u32 parsing error"))
    }
}

impl FromString for u64 {
    fn from_string(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map_err(|_| Error::configuration("u64 parsing error"))
    }
}

/// Durations are expressed in seconds
impl FromString for Duration {
    fn from_string(s: &str) -> Result<Self> {
        u64::from_string(s).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() -> Result<()> {
        assert!(bool::from_string("YES")?);
        assert!(!bool::from_string("0")?);
        assert!(bool::from_string("maybe").is_err());
        assert_eq!(
            Vec::<String>::from_string("db1:5432, db2:5432,")?,
            vec!["db1:5432".to_string(), "db2:5432".to_string()]
        );
        assert_eq!(Duration::from_string("15")?, Duration::from_secs(15));
        Ok(())
    }

    #[test]
    fn test_missing_variable_uses_default() -> Result<()> {
        let value = get_env_with_default("OPENTDF_TEST_SURELY_NOT_SET", 42u32)?;
        assert_eq!(value, 42);
        let value: Option<String> = get_env("OPENTDF_TEST_SURELY_NOT_SET")?;
        assert_eq!(value, None);
        Ok(())
    }
}
