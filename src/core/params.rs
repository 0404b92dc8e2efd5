//! Option strings such as `"ab,max_depth=3,randomness=0.1"`.
//!
//! ## Usage
//!
//! ```
//! use rust_selfplay::core::Params;
//!
//! let mut params = Params::parse("mcts,max_traverses=50").unwrap();
//! assert!(params.pop_flag("mcts").unwrap());
//! assert_eq!(params.pop_or("max_traverses", 100usize).unwrap(), 50);
//! params.finish().unwrap();
//! ```
//!
//! Builders pop the keys they understand; `finish` rejects whatever is left,
//! so a misspelled option fails loudly instead of being ignored.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use super::error::ConfigError;

/// Parsed `key=value` options. Keys without `=` are flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    source: String,
    values: BTreeMap<String, String>,
}

impl Params {
    /// Parse a comma separated option string.
    pub fn parse(config: &str) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();
        for part in config.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = match part.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (part, ""),
            };
            if key.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: String::new(),
                    value: part.to_string(),
                    reason: "empty option name".to_string(),
                });
            }
            if values.insert(key.to_string(), value.to_string()).is_some() {
                return Err(ConfigError::Conflict {
                    context: config.to_string(),
                    reason: format!("option {key:?} given more than once"),
                });
            }
        }
        Ok(Self {
            source: config.to_string(),
            values,
        })
    }

    /// The unparsed option string.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether `key` is still present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Remaining keys, in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    /// Remove and return the raw value of `key`.
    pub fn pop(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// Remove a boolean flag. A bare key means `true`.
    pub fn pop_flag(&mut self, key: &str) -> Result<bool, ConfigError> {
        match self.pop(key) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "" | "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(invalid(key, &v, "expected a boolean")),
            },
        }
    }

    /// Remove and parse `key`, if present.
    pub fn pop_parsed<T: FromStr>(&mut self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.pop(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<T>()
                .map(Some)
                .map_err(|_| invalid(key, &v, std::any::type_name::<T>())),
        }
    }

    /// Remove and parse `key`, falling back to `default`.
    pub fn pop_or<T: FromStr>(&mut self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.pop_parsed(key)?.unwrap_or(default))
    }

    /// Remove a duration such as `500ms`, `2s`, `1.5m` or a bare number of seconds.
    pub fn pop_duration(&mut self, key: &str) -> Result<Option<Duration>, ConfigError> {
        match self.pop(key) {
            None => Ok(None),
            Some(v) => parse_duration(&v)
                .map(Some)
                .ok_or_else(|| invalid(key, &v, "expected a duration like 500ms, 2s or 1.5m")),
        }
    }

    /// Fail if any key was left unconsumed.
    pub fn finish(self) -> Result<(), ConfigError> {
        if self.values.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::UnknownKeys {
                keys: self.keys(),
                context: self.source,
            })
        }
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_duration(text: &str) -> Option<Duration> {
    let (number, scale) = if let Some(n) = text.strip_suffix("ms") {
        (n, 1e-3)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix('m') {
        (n, 60.0)
    } else {
        (text, 1.0)
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(value * scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags_and_values() {
        let mut params = Params::parse("ab, max_depth=3 ,randomness=0.25").unwrap();
        assert!(params.pop_flag("ab").unwrap());
        assert_eq!(params.pop_or("max_depth", 2u32).unwrap(), 3);
        assert_eq!(params.pop_or("randomness", 0.0f32).unwrap(), 0.25);
        assert_eq!(params.pop_or("missing", 7u32).unwrap(), 7);
        params.finish().unwrap();
    }

    #[test]
    fn test_unknown_keys_are_reported() {
        let mut params = Params::parse("ab,max_dept=3").unwrap();
        params.pop_flag("ab").unwrap();
        let err = params.finish().unwrap_err();
        match err {
            ConfigError::UnknownKeys { keys, .. } => assert_eq!(keys, vec!["max_dept".to_string()]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_invalid_value_names_key() {
        let mut params = Params::parse("max_depth=deep").unwrap();
        let err = params.pop_or("max_depth", 2u32).unwrap_err();
        assert!(err.to_string().contains("max_depth"));
        assert!(err.to_string().contains("deep"));
    }

    #[test]
    fn test_duplicate_key_conflicts() {
        assert!(matches!(
            Params::parse("a=1,a=2"),
            Err(ConfigError::Conflict { .. })
        ));
    }

    #[test]
    fn test_durations() {
        let mut params = Params::parse("a=500ms,b=2s,c=1.5m,d=3,e=soon").unwrap();
        assert_eq!(params.pop_duration("a").unwrap(), Some(Duration::from_millis(500)));
        assert_eq!(params.pop_duration("b").unwrap(), Some(Duration::from_secs(2)));
        assert_eq!(params.pop_duration("c").unwrap(), Some(Duration::from_secs(90)));
        assert_eq!(params.pop_duration("d").unwrap(), Some(Duration::from_secs(3)));
        assert!(params.pop_duration("e").is_err());
        assert_eq!(params.pop_duration("f").unwrap(), None);
    }

    #[test]
    fn test_flag_values() {
        let mut params = Params::parse("a=false,b=true,c=maybe").unwrap();
        assert!(!params.pop_flag("a").unwrap());
        assert!(params.pop_flag("b").unwrap());
        assert!(params.pop_flag("c").is_err());
        assert!(!params.pop_flag("absent").unwrap());
    }
}
