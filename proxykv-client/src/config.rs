//! # Client Configuration
//!
//! Purpose: Hold the validated settings for the pool, the directory watch and
//! the facade, and read them from `codis.*` properties files or any serde
//! source.
//!
//! ## Properties Keys
//!
//! ```text
//! codis.pool.maxTotal                          codis.zk.zkAddressAndPort
//! codis.pool.maxIdle                           codis.zk.zkSessionTimeOutMs
//! codis.pool.minIdle                           codis.zk.zkProxyDir
//! codis.pool.maxWaitMillis                     codis.environment (codis.envrionment)
//! codis.pool.timeBetweenEvictionRunsMillis     codis.namespace
//! codis.pool.minEvictableIdleTimeMillis        codis.debug
//! codis.pool.testWhileIdle                     codis.socket.connectTimeoutMillis
//! codis.pool.idleProbeThresholdMillis          codis.socket.readTimeoutMillis
//!                                              codis.socket.writeTimeoutMillis
//! ```

use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::connection::TcpConnector;
use crate::directory::DirectorySettings;
use crate::error::{CacheError, CacheResult};
use crate::namespace::{Environment, KeyNamespace};
use crate::pool::PoolConfig;

/// Conventional on-disk location of the properties file.
pub const DEFAULT_FILE_PATH: &str = "/JAVA_FILES/cacheclient-service/conf/app-codis.properties";

/// Working-directory fallback of the properties file.
pub const DEFAULT_RELATIVE_PATH: &str = "conf/app-codis.properties";

/// Full client configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Idle floor the evictor never goes below.
    pub min_idle: usize,
    /// How long `acquire` waits for a free connection.
    #[serde(rename = "maxWaitMillis", with = "millis")]
    pub max_wait: Duration,
    /// Comma-separated coordination service addresses.
    #[serde(rename = "zkAddressAndPort")]
    pub zk_address: String,
    #[serde(rename = "zkSessionTimeOutMs", with = "millis")]
    pub zk_session_timeout: Duration,
    /// Directory listing the live proxies.
    pub zk_proxy_dir: String,
    pub environment: Environment,
    /// Prefix every key with the environment tag.
    pub namespace_keys: bool,
    /// Log command failures before returning them.
    pub debug: bool,
    #[serde(rename = "timeBetweenEvictionRunsMillis", with = "millis")]
    pub idle_eviction_interval: Duration,
    #[serde(rename = "minEvictableIdleTimeMillis", with = "millis")]
    pub min_evictable_idle: Duration,
    pub test_while_idle: bool,
    #[serde(rename = "idleProbeThresholdMillis", with = "millis")]
    pub idle_probe_threshold: Duration,
    #[serde(rename = "connectTimeoutMillis", with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
    #[serde(rename = "readTimeoutMillis", with = "opt_millis")]
    pub read_timeout: Option<Duration>,
    #[serde(rename = "writeTimeoutMillis", with = "opt_millis")]
    pub write_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        CacheConfig {
            max_total: pool.max_total,
            max_idle: pool.max_idle,
            min_idle: pool.min_idle,
            max_wait: pool.max_wait,
            zk_address: "127.0.0.1:2181".to_string(),
            zk_session_timeout: Duration::from_secs(30),
            zk_proxy_dir: "/zk/codis/db_default/proxy".to_string(),
            environment: Environment::Default,
            namespace_keys: false,
            debug: false,
            idle_eviction_interval: pool.idle_eviction_interval,
            min_evictable_idle: pool.min_evictable_idle,
            test_while_idle: pool.test_while_idle,
            idle_probe_threshold: pool.idle_probe_threshold,
            connect_timeout: Some(Duration::from_secs(2)),
            read_timeout: Some(Duration::from_secs(2)),
            write_timeout: Some(Duration::from_secs(2)),
        }
    }
}

impl CacheConfig {
    /// Checks pool bounds and coordination settings.
    pub fn validate(&self) -> CacheResult<()> {
        self.pool_config().validate()?;
        self.directory_settings().servers()?;
        if self.zk_proxy_dir.trim().is_empty() {
            return Err(CacheError::config("proxy directory path is empty"));
        }
        Ok(())
    }

    /// Pool settings derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_total: self.max_total,
            max_idle: self.max_idle,
            min_idle: self.min_idle,
            max_wait: self.max_wait,
            idle_eviction_interval: self.idle_eviction_interval,
            min_evictable_idle: self.min_evictable_idle,
            test_while_idle: self.test_while_idle,
            idle_probe_threshold: self.idle_probe_threshold,
        }
    }

    /// Coordination-service settings derived from this configuration.
    pub fn directory_settings(&self) -> DirectorySettings {
        DirectorySettings {
            connect_string: self.zk_address.clone(),
            session_timeout: self.zk_session_timeout,
            proxy_dir: self.zk_proxy_dir.clone(),
        }
    }

    /// TCP connector using the configured socket timeouts.
    pub fn tcp_connector(&self) -> TcpConnector {
        TcpConnector {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }

    /// Key namespacing as configured.
    pub fn key_namespace(&self) -> KeyNamespace {
        if self.namespace_keys {
            KeyNamespace::enabled(self.environment)
        } else {
            KeyNamespace::disabled()
        }
    }

    /// Parses a properties document on top of the defaults.
    ///
    /// Unknown keys are ignored; malformed values are configuration errors.
    pub fn from_properties(text: &str) -> CacheResult<Self> {
        let mut config = CacheConfig::default();
        for (key, value) in parse_properties(text) {
            config.apply_property(&key, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Loads the first properties file that exists among `paths`.
    ///
    /// When none exists, the defaults are used and a warning is logged. A file
    /// that exists but does not parse is an error.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> CacheResult<Self> {
        for path in paths {
            let path = path.as_ref();
            match fs::read_to_string(path) {
                Ok(text) => {
                    tracing::info!(path = %path.display(), "loading cache configuration");
                    return Self::from_properties(&text);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(CacheError::config(format!(
                        "cannot read {}: {err}",
                        path.display()
                    )))
                }
            }
        }
        tracing::warn!(
            candidates = paths.len(),
            "no cache configuration file found, using defaults"
        );
        Ok(CacheConfig::default())
    }

    /// Loads from the conventional locations.
    pub fn load_default() -> CacheResult<Self> {
        Self::load(&[DEFAULT_FILE_PATH, DEFAULT_RELATIVE_PATH])
    }

    fn apply_property(&mut self, key: &str, value: &str) -> CacheResult<()> {
        match key {
            "codis.pool.maxTotal" => self.max_total = parse_value(key, value)?,
            "codis.pool.maxIdle" => self.max_idle = parse_value(key, value)?,
            "codis.pool.minIdle" => self.min_idle = parse_value(key, value)?,
            "codis.pool.maxWaitMillis" => self.max_wait = parse_millis(key, value)?,
            "codis.pool.timeBetweenEvictionRunsMillis" => {
                self.idle_eviction_interval = parse_millis(key, value)?
            }
            "codis.pool.minEvictableIdleTimeMillis" => {
                self.min_evictable_idle = parse_millis(key, value)?
            }
            "codis.pool.testWhileIdle" => self.test_while_idle = parse_value(key, value)?,
            "codis.pool.idleProbeThresholdMillis" => {
                self.idle_probe_threshold = parse_millis(key, value)?
            }
            "codis.zk.zkAddressAndPort" => self.zk_address = value.to_string(),
            "codis.zk.zkSessionTimeOutMs" => self.zk_session_timeout = parse_millis(key, value)?,
            "codis.zk.zkProxyDir" => self.zk_proxy_dir = value.to_string(),
            "codis.environment" | "codis.envrionment" => {
                self.environment = Environment::normalize(value)
            }
            "codis.namespace" => self.namespace_keys = parse_value(key, value)?,
            "codis.debug" => self.debug = parse_value(key, value)?,
            "codis.socket.connectTimeoutMillis" => {
                self.connect_timeout = parse_optional_millis(key, value)?
            }
            "codis.socket.readTimeoutMillis" => {
                self.read_timeout = parse_optional_millis(key, value)?
            }
            "codis.socket.writeTimeoutMillis" => {
                self.write_timeout = parse_optional_millis(key, value)?
            }
            other => tracing::debug!(key = other, "ignoring unknown configuration key"),
        }
        Ok(())
    }
}

/// Splits a `key=value` / `key: value` document, skipping blanks and comments.
fn parse_properties(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let idx = line.find(['=', ':'])?;
            let key = line[..idx].trim();
            let value = line[idx + 1..].trim();
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> CacheResult<T> {
    value
        .parse()
        .map_err(|_| CacheError::config(format!("invalid value '{value}' for {key}")))
}

fn parse_millis(key: &str, value: &str) -> CacheResult<Duration> {
    parse_value::<u64>(key, value).map(Duration::from_millis)
}

// Zero disables the timeout.
fn parse_optional_millis(key: &str, value: &str) -> CacheResult<Option<Duration>> {
    let millis = parse_value::<u64>(key, value)?;
    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.filter(|ms| *ms > 0).map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# pool
codis.pool.maxTotal=64
codis.pool.maxIdle = 32
codis.pool.minIdle=4
codis.pool.maxWaitMillis=1500
codis.zk.zkAddressAndPort=10.0.0.1:2181,10.0.0.2:2181
codis.zk.zkSessionTimeOutMs=10000
codis.zk.zkProxyDir=/zk/codis/db_pay/proxy
codis.envrionment=PAY
codis.namespace=true
codis.debug=true
codis.socket.readTimeoutMillis=0
codis.unknown=ignored
";

    #[test]
    fn defaults_match_pool_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_total, 1000);
        assert_eq!(config.max_idle, 1000);
        assert_eq!(config.min_idle, 0);
        assert_eq!(config.max_wait, Duration::from_secs(20));
        assert!(!config.namespace_keys);
        config.validate().unwrap();
    }

    #[test]
    fn reads_properties() {
        let config = CacheConfig::from_properties(SAMPLE).unwrap();
        assert_eq!(config.max_total, 64);
        assert_eq!(config.max_idle, 32);
        assert_eq!(config.min_idle, 4);
        assert_eq!(config.max_wait, Duration::from_millis(1500));
        assert_eq!(config.zk_session_timeout, Duration::from_secs(10));
        assert_eq!(config.zk_proxy_dir, "/zk/codis/db_pay/proxy");
        assert_eq!(config.environment, Environment::Pay);
        assert!(config.debug);
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.key_namespace(), KeyNamespace::enabled(Environment::Pay));
        assert_eq!(
            config.directory_settings().servers().unwrap(),
            vec!["10.0.0.1:2181".to_string(), "10.0.0.2:2181".to_string()]
        );
    }

    #[test]
    fn rejects_malformed_numbers_and_bounds() {
        let err = CacheConfig::from_properties("codis.pool.maxTotal=lots").unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));

        let err = CacheConfig::from_properties("codis.pool.maxTotal=4\ncodis.pool.maxIdle=8")
            .unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn deserializes_from_json() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"maxTotal": 10, "maxIdle": 5, "maxWaitMillis": 250, "environment": "LOAN", "readTimeoutMillis": 100}"#,
        )
        .unwrap();
        assert_eq!(config.max_total, 10);
        assert_eq!(config.max_wait, Duration::from_millis(250));
        assert_eq!(config.environment, Environment::Loan);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(100)));
        assert_eq!(config.min_idle, 0);
    }

    #[test]
    fn load_falls_back_to_defaults_when_missing() {
        let config = CacheConfig::load(&["/definitely/not/here.properties"]).unwrap();
        assert_eq!(config, CacheConfig::default());
    }
}
