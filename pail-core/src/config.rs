//! Codec options and lifetime configuration.
//!
//! Options are validated when a bucket is built, against the accepted
//! option set of the selected codec. Lifetimes can be given either as a
//! single `chrono::Duration` or as named components (`"minutes"`,
//! `"seconds"`, ...); both forms are checked for validity up front.

use std::collections::BTreeMap;

use chrono::Duration;
use serde_json::Value;

use crate::error::ConfigError;

/// Component names accepted by [`lifetime_from_components`].
pub const LIFETIME_COMPONENTS: &[&str] = &[
    "weeks",
    "days",
    "hours",
    "minutes",
    "seconds",
    "milliseconds",
    "microseconds",
];

/// Named options for a codec.
///
/// An ordered name → value map. Each codec declares its accepted option
/// names and default values; unknown names or wrongly-typed values are
/// rejected at bucket construction, not at first encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOptions {
    options: BTreeMap<String, Value>,
}

impl CodecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, consuming and returning `self` for chaining.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Iterate over the option names present.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    /// Read a boolean option, falling back to `default` when absent.
    pub fn bool_option(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.options.get(name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(ConfigError::InvalidOptionValue {
                option: name.to_string(),
                value: other.to_string(),
                reason: "expected a boolean".to_string(),
            }),
        }
    }

    /// Read an unsigned integer option, falling back to `default` when absent.
    pub fn u64_option(&self, name: &str, default: u64) -> Result<u64, ConfigError> {
        match self.options.get(name) {
            None => Ok(default),
            Some(value) => value.as_u64().ok_or_else(|| ConfigError::InvalidOptionValue {
                option: name.to_string(),
                value: value.to_string(),
                reason: "expected an unsigned integer".to_string(),
            }),
        }
    }
}

/// Build a lifetime from named components.
///
/// Unknown component names are a [`ConfigError::UnknownLifetimeComponent`];
/// a negative total is a [`ConfigError::NegativeLifetime`]; a component
/// large enough to overflow the duration range is an
/// [`ConfigError::InvalidOptionValue`].
pub fn lifetime_from_components<I, S>(components: I) -> Result<Duration, ConfigError>
where
    I: IntoIterator<Item = (S, i64)>,
    S: AsRef<str>,
{
    let mut total = Duration::zero();
    for (name, amount) in components {
        let part = match name.as_ref() {
            "weeks" => Duration::try_weeks(amount),
            "days" => Duration::try_days(amount),
            "hours" => Duration::try_hours(amount),
            "minutes" => Duration::try_minutes(amount),
            "seconds" => Duration::try_seconds(amount),
            "milliseconds" => Duration::try_milliseconds(amount),
            "microseconds" => Some(Duration::microseconds(amount)),
            other => {
                return Err(ConfigError::UnknownLifetimeComponent {
                    component: other.to_string(),
                })
            }
        };
        let part = part.ok_or_else(|| ConfigError::InvalidOptionValue {
            option: name.as_ref().to_string(),
            value: amount.to_string(),
            reason: "lifetime component out of range".to_string(),
        })?;
        total = total
            .checked_add(&part)
            .ok_or_else(|| ConfigError::InvalidOptionValue {
                option: name.as_ref().to_string(),
                value: amount.to_string(),
                reason: "lifetime component out of range".to_string(),
            })?;
    }
    validate_lifetime(total)?;
    Ok(total)
}

/// Reject negative lifetimes.
pub fn validate_lifetime(lifetime: Duration) -> Result<(), ConfigError> {
    if lifetime < Duration::zero() {
        return Err(ConfigError::NegativeLifetime);
    }
    Ok(())
}
