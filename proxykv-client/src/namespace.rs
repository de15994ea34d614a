//! # Key Namespacing
//!
//! Purpose: Isolate logically separate deployments that share one physical
//! store by prefixing keys with an environment tag (`"<env>:<key>"`).

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

/// Deployment environment tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Environment {
    User,
    Prod,
    Trd,
    Invt,
    Pay,
    Acc,
    Mkt,
    Loan,
    Infra,
    #[default]
    Default,
}

impl Environment {
    /// All tags, in declaration order.
    pub const ALL: [Environment; 10] = [
        Environment::User,
        Environment::Prod,
        Environment::Trd,
        Environment::Invt,
        Environment::Pay,
        Environment::Acc,
        Environment::Mkt,
        Environment::Loan,
        Environment::Infra,
        Environment::Default,
    ];

    /// Parses a tag case-insensitively; anything unrecognized is `Default`.
    pub fn normalize(value: &str) -> Self {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|env| env.as_str().eq_ignore_ascii_case(value))
            .unwrap_or(Environment::Default)
    }

    /// Returns the wire form of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::User => "user",
            Environment::Prod => "prod",
            Environment::Trd => "trd",
            Environment::Invt => "invt",
            Environment::Pay => "pay",
            Environment::Acc => "acc",
            Environment::Mkt => "mkt",
            Environment::Loan => "loan",
            Environment::Infra => "infra",
            Environment::Default => "default",
        }
    }

    /// Prefixes `key` with this tag.
    ///
    /// Returns `None` for an empty key; callers treat that as "leave the key
    /// alone".
    pub fn encode(self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        let mut out = String::with_capacity(self.as_str().len() + 1 + key.len());
        out.push_str(self.as_str());
        out.push(':');
        out.push_str(key);
        Some(out)
    }
}

/// Strips the environment prefix from a namespaced key.
///
/// Returns everything after the first `:`; a key without a separator is
/// returned whole.
pub fn decode(key: &str) -> &str {
    match key.find(':') {
        Some(idx) => &key[idx + 1..],
        None => key,
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Environment::normalize(value))
    }
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Environment::normalize(&raw))
    }
}

/// Namespacing toggle applied by the facade to every key argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyNamespace {
    environment: Environment,
    enabled: bool,
}

impl KeyNamespace {
    /// Namespacing that prefixes keys with `environment`.
    pub fn enabled(environment: Environment) -> Self {
        KeyNamespace {
            environment,
            enabled: true,
        }
    }

    /// Pass-through namespacing.
    pub fn disabled() -> Self {
        KeyNamespace::default()
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Applies the namespace to one key.
    #[inline]
    pub fn apply<'a>(&self, key: &'a str) -> Cow<'a, str> {
        if !self.enabled {
            return Cow::Borrowed(key);
        }
        match self.environment.encode(key) {
            Some(encoded) => Cow::Owned(encoded),
            None => Cow::Borrowed(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_restores_key() {
        for env in Environment::ALL {
            for key in ["k", "user:42", "a:b:c", "  spaced  "] {
                let encoded = env.encode(key).unwrap();
                assert_eq!(decode(&encoded), key);
            }
        }
    }

    #[test]
    fn encode_prefixes_with_tag() {
        assert_eq!(Environment::Pay.encode("order").as_deref(), Some("pay:order"));
        assert_eq!(Environment::Pay.encode(""), None);
    }

    #[test]
    fn normalize_is_case_insensitive_with_default_fallback() {
        assert_eq!(Environment::normalize("PROD"), Environment::Prod);
        assert_eq!(Environment::normalize("Loan"), Environment::Loan);
        assert_eq!(Environment::normalize("staging"), Environment::Default);
        assert_eq!(Environment::normalize(""), Environment::Default);
        assert_eq!("infra".parse::<Environment>().unwrap(), Environment::Infra);
    }

    #[test]
    fn toggle_controls_prefixing() {
        let off = KeyNamespace::disabled();
        assert_eq!(off.apply("k"), "k");

        let on = KeyNamespace::enabled(Environment::Mkt);
        assert_eq!(on.apply("k"), "mkt:k");
        assert_eq!(on.apply(""), "");
    }
}
