use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "parley.toml",
    "config/parley.toml",
    "crates/config/parley.toml",
    "../parley.toml",
    "../config/parley.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub chat: ChatConfig,
    pub retry: RetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            chat: ChatConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Room assigned when a join request names none.
    #[serde(default = "ChatConfig::default_room")]
    pub default_room: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_room: Self::default_room(),
        }
    }
}

impl ChatConfig {
    fn default_room() -> String {
        "general".to_string()
    }
}

/// Timing knobs for the at-least-once broadcast retry loop.
///
/// ```
/// use parley_config::RetryConfig;
///
/// let retry = RetryConfig::default();
/// assert_eq!(retry.timeout_seconds, 10);
/// assert_eq!(retry.sweep_interval_seconds, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Seconds an in-flight record may go unacknowledged before a sweep
    /// re-queues it.
    #[serde(default = "RetryConfig::default_timeout")]
    pub timeout_seconds: u64,
    /// Interval between sweep passes.
    #[serde(default = "RetryConfig::default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl RetryConfig {
    const fn default_timeout() -> u64 {
        10
    }

    const fn default_sweep_interval() -> u64 {
        3
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: Self::default_timeout(),
            sweep_interval_seconds: Self::default_sweep_interval(),
        }
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder();
    builder = builder
        .set_default("http.address", defaults.http.address.clone())
        .unwrap()
        .set_default("http.port", i64::from(defaults.http.port))
        .unwrap()
        .set_default("chat.default_room", defaults.chat.default_room.clone())
        .unwrap()
        .set_default(
            "retry.timeout_seconds",
            i64::try_from(defaults.retry.timeout_seconds).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default(
            "retry.sweep_interval_seconds",
            i64::try_from(defaults.retry.sweep_interval_seconds).unwrap_or(i64::MAX),
        )
        .unwrap();

    let environment_overrides = config::Environment::with_prefix("PARLEY").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("PARLEY_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via PARLEY_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    debug!(?config, "loaded configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.http.port, 7070);
        assert_eq!(config.chat.default_room, "general");
        assert!(config.retry.timeout_seconds > 0);
        assert!(config.retry.sweep_interval_seconds > 0);
    }
}
