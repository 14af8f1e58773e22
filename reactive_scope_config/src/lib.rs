//! Tunable constants for the `reactive_scope` runtime.
//!
//! Every value has a default matching the behavior the runtime was tuned
//! against, so most applications never need to load anything. When they do,
//! options can come from a TOML document ([`get_config_from_str`]) or from
//! `REACTIVE_SCOPE_*` environment variables ([`RuntimeOptions::try_from_env`]).

#![forbid(unsafe_code)]

pub mod errors;

use crate::errors::ConfigError;
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::{env::VarError, str::FromStr, time::Duration};
use typed_builder::TypedBuilder;

/// All runtime tunables.
#[derive(TypedBuilder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeOptions {
    /// Rate limiting applied to live subscription parameter changes.
    #[builder(default)]
    #[serde(default)]
    pub debounce: DebounceOptions,
    /// How long the previous live subscription stays open after its
    /// replacement has been established.
    #[builder(default = default_handoff_grace_ms())]
    #[serde(default = "default_handoff_grace_ms")]
    pub handoff_grace_ms: u64,
    /// Period of the frame-aligned polling scheduler.
    #[builder(default = default_frame_interval_ms())]
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[builder(default)]
    #[serde(default)]
    pub notification: NotificationOptions,
    #[builder(default)]
    #[serde(default)]
    pub cache: CacheOptions,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions::builder().build()
    }
}

impl RuntimeOptions {
    /// Reads options from `REACTIVE_SCOPE_*` environment variables, falling
    /// back to the default for every variable that is not set.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        let defaults = RuntimeOptions::default();
        Ok(RuntimeOptions {
            debounce: DebounceOptions {
                wait_ms: env_parse_or(
                    "REACTIVE_SCOPE_DEBOUNCE_WAIT_MS",
                    defaults.debounce.wait_ms,
                )?,
                max_wait_ms: env_parse_or(
                    "REACTIVE_SCOPE_DEBOUNCE_MAX_WAIT_MS",
                    defaults.debounce.max_wait_ms,
                )?,
                leading: env_parse_or(
                    "REACTIVE_SCOPE_DEBOUNCE_LEADING",
                    defaults.debounce.leading,
                )?,
                trailing: env_parse_or(
                    "REACTIVE_SCOPE_DEBOUNCE_TRAILING",
                    defaults.debounce.trailing,
                )?,
            },
            handoff_grace_ms: env_parse_or(
                "REACTIVE_SCOPE_HANDOFF_GRACE_MS",
                defaults.handoff_grace_ms,
            )?,
            frame_interval_ms: env_parse_or(
                "REACTIVE_SCOPE_FRAME_INTERVAL_MS",
                defaults.frame_interval_ms,
            )?,
            notification: NotificationOptions {
                default_ms: env_parse_or(
                    "REACTIVE_SCOPE_NOTIFICATION_DEFAULT_MS",
                    defaults.notification.default_ms,
                )?,
                error_ms: env_parse_or(
                    "REACTIVE_SCOPE_NOTIFICATION_ERROR_MS",
                    defaults.notification.error_ms,
                )?,
            },
            cache: CacheOptions {
                max_size: env_parse_or(
                    "REACTIVE_SCOPE_CACHE_MAX_SIZE",
                    defaults.cache.max_size,
                )?,
                save_debounce_ms: env_parse_or(
                    "REACTIVE_SCOPE_CACHE_SAVE_DEBOUNCE_MS",
                    defaults.cache.save_debounce_ms,
                )?,
            },
        })
    }

    pub fn handoff_grace(&self) -> Duration {
        Duration::from_millis(self.handoff_grace_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Leading/trailing/max-wait debounce settings.
#[derive(TypedBuilder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DebounceOptions {
    /// Quiet period after which pending input is applied.
    #[builder(default = 100)]
    #[serde(default = "default_debounce_wait_ms")]
    pub wait_ms: u64,
    /// Longest time pending input may wait during a sustained burst.
    #[builder(default = 1000)]
    #[serde(default = "default_debounce_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Apply the first input of a burst immediately.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub leading: bool,
    /// Apply the last input of a burst once the quiet period elapses.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub trailing: bool,
}

impl Default for DebounceOptions {
    fn default() -> Self {
        DebounceOptions::builder().build()
    }
}

impl DebounceOptions {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Lifetimes of transient notifications.
#[derive(TypedBuilder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NotificationOptions {
    #[builder(default = 3000)]
    #[serde(default = "default_notification_ms")]
    pub default_ms: u64,
    #[builder(default = 5000)]
    #[serde(default = "default_error_notification_ms")]
    pub error_ms: u64,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        NotificationOptions::builder().build()
    }
}

impl NotificationOptions {
    pub fn default_duration(&self) -> Duration {
        Duration::from_millis(self.default_ms)
    }

    pub fn error_duration(&self) -> Duration {
        Duration::from_millis(self.error_ms)
    }
}

/// Limits for persisting a cache snapshot into key-value storage.
#[derive(TypedBuilder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheOptions {
    /// Snapshots longer than this many bytes are neither saved nor restored.
    #[builder(default = 5 * 1024 * 1024)]
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    #[builder(default = 1000)]
    #[serde(default = "default_cache_save_debounce_ms")]
    pub save_debounce_ms: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions::builder().build()
    }
}

impl CacheOptions {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

fn default_handoff_grace_ms() -> u64 {
    100
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_debounce_wait_ms() -> u64 {
    100
}

fn default_debounce_max_wait_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_notification_ms() -> u64 {
    3000
}

fn default_error_notification_ms() -> u64 {
    5000
}

fn default_cache_max_size() -> usize {
    5 * 1024 * 1024
}

fn default_cache_save_debounce_ms() -> u64 {
    1000
}

pub(crate) fn env_wo_default(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => {
            Err(ConfigError::EnvError(key.to_string()))
        }
    }
}

pub(crate) fn env_parse_or<T: FromStr>(
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_wo_default(key)? {
        None => Ok(default),
        Some(value) => {
            value.trim().parse().map_err(|_| ConfigError::InvalidEnvValue {
                name: key.to_string(),
                value,
            })
        }
    }
}

/// Parses options from a TOML document. Missing keys take their defaults.
///
/// ```rust
/// use reactive_scope_config::get_config_from_str;
///
/// let options = get_config_from_str("handoff-grace-ms = 250").unwrap();
/// assert_eq!(options.handoff_grace_ms, 250);
/// assert_eq!(options.debounce.max_wait_ms, 1000);
/// ```
pub fn get_config_from_str(text: &str) -> Result<RuntimeOptions, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(text, FileFormat::Toml))
        .build()?;
    config.try_deserialize().map_err(|e| e.into())
}
