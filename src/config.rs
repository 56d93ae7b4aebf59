//! Engine configuration using Figment
//!
//! Configuration is loaded from, in increasing precedence:
//! 1. built-in defaults
//! 2. `ioc_tests.toml` (or a file given to [`EngineConfig::load_from`])
//! 3. environment variables prefixed with `IOC_TEST_`
//! 4. `testing_prefix`, the variable the IOC test launcher exports with the
//!    instrument PV prefix
//!
//! # Environment Variable Overrides
//!
//! ```text
//! testing_prefix=TE:NDW1234:
//! IOC_TEST_DEFAULT_TIMEOUT=30s
//! IOC_TEST_POLL_INTERVAL=250ms
//! IOC_TEST_LOG_LEVEL=debug
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration file looked up by [`EngineConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "ioc_tests.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Settings shared by every assertion issued through one
/// [`ChannelAccess`](crate::channel_access::ChannelAccess).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Instrument PV prefix, e.g. `TE:NDW1234:`
    #[serde(default)]
    pub prefix: String,
    /// Device prefix appended after the instrument prefix, e.g. `KEPCO_01`
    #[serde(default)]
    pub device_prefix: Option<String>,
    /// Timeout used by assertions that are not given one
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Sleep between evaluations of a polled condition
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Sleep after each write, giving the emulator time to react
    #[serde(default = "default_settle_after_put", with = "humantime_serde")]
    pub settle_after_put: Duration,
    /// How long `assert_does_not_exist` probes for the PV
    #[serde(default = "default_absence_timeout", with = "humantime_serde")]
    pub absence_timeout: Duration,
    /// Bound on the existence check made before every write
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub put_existence_timeout: Duration,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    crate::poller::DEFAULT_POLL_INTERVAL
}

fn default_settle_after_put() -> Duration {
    Duration::from_secs(1)
}

fn default_absence_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            device_prefix: None,
            default_timeout: default_timeout(),
            poll_interval: default_poll_interval(),
            settle_after_put: default_settle_after_put(),
            absence_timeout: default_absence_timeout(),
            put_existence_timeout: default_timeout(),
            log_level: default_log_level(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl EngineConfig {
    /// Load from `ioc_tests.toml` (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("IOC_TEST_"))
            .merge(Env::raw().filter_map(|key| {
                key.as_str()
                    .eq_ignore_ascii_case("testing_prefix")
                    .then(|| "prefix".into())
            }))
            .extract()
            .map_err(Box::new)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::Validation(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        if self.default_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "default_timeout must be greater than zero".to_string(),
            ));
        }

        if let Some(device) = &self.device_prefix {
            if device.is_empty() || device.contains(char::is_whitespace) {
                return Err(ConfigError::Validation(format!(
                    "Invalid device_prefix '{device}'"
                )));
            }
        }

        Ok(())
    }

    /// Full prefix placed in front of every local PV name.
    ///
    /// A non-empty instrument prefix always ends in `:`, and the device
    /// prefix follows as `DEVICE:`.
    pub fn pv_prefix(&self) -> String {
        let mut prefix = self.prefix.clone();
        if !prefix.is_empty() && !prefix.ends_with(':') {
            prefix.push(':');
        }
        if let Some(device) = &self.device_prefix {
            prefix.push_str(device);
            prefix.push(':');
        }
        prefix
    }

    /// Install the tracing subscriber at the configured `log_level`.
    ///
    /// `RUST_LOG` still takes precedence. Returns false if a subscriber was
    /// already installed.
    pub fn init_logging(&self) -> bool {
        crate::logging::init_logging(&self.log_level)
    }

    /// Copy of this configuration for another device on the same instrument.
    pub fn for_device(&self, device_prefix: impl Into<String>) -> Self {
        Self {
            device_prefix: Some(device_prefix.into()),
            ..self.clone()
        }
    }
}
