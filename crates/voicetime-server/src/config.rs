//! Server configuration read from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use voicetime_tracking::application::tracker::TrackerOptions;
use voicetime_tracking::domain::config::TrackerDefaults;
use voicetime_tracking::domain::policy::StandardPolicy;

use crate::error::AppError;

/// Where guild records are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// A single JSON file.
    Json { path: PathBuf },
    /// A `PostgreSQL` database.
    Postgres { database_url: String },
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageBackend,
    pub options: TrackerOptions,
    pub defaults: TrackerDefaults,
    pub policy: StandardPolicy,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first malformed variable.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns a variable's
    /// value or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first malformed variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(&lookup, "PORT", 3000)?;

        let storage = match lookup("VOICETIME_STORAGE").as_deref().unwrap_or("json") {
            "json" => StorageBackend::Json {
                path: lookup("VOICETIME_DATA_FILE")
                    .map_or_else(|| PathBuf::from("./data/voicetime.json"), PathBuf::from),
            },
            "postgres" => StorageBackend::Postgres {
                database_url: lookup("DATABASE_URL").ok_or_else(|| {
                    AppError::Config(
                        "DATABASE_URL must be set when VOICETIME_STORAGE is postgres".to_string(),
                    )
                })?,
            },
            other => {
                return Err(AppError::Config(format!(
                    "VOICETIME_STORAGE must be json or postgres, got {other:?}"
                )));
            }
        };

        let options = TrackerOptions {
            sweep_interval: Duration::from_millis(parse_or(
                &lookup,
                "VOICETIME_SWEEP_INTERVAL_MS",
                5_000,
            )?),
            sweep_tick_ms: parse_or(&lookup, "VOICETIME_SWEEP_TICK_MS", 5_000)?,
            io_timeout: Duration::from_millis(parse_or(&lookup, "VOICETIME_IO_TIMEOUT_MS", 5_000)?),
            delete_unavailable_guilds: parse_or(
                &lookup,
                "VOICETIME_DELETE_UNAVAILABLE_GUILDS",
                false,
            )?,
            ..TrackerOptions::default()
        };
        if options.sweep_interval.is_zero() {
            return Err(AppError::Config(
                "VOICETIME_SWEEP_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let defaults = TrackerDefaults {
            track_bots: parse_or(&lookup, "VOICETIME_TRACK_BOTS", false)?,
            track_all_channels: parse_or(&lookup, "VOICETIME_TRACK_ALL_CHANNELS", true)?,
            track_mute: parse_or(&lookup, "VOICETIME_TRACK_MUTE", true)?,
            track_deaf: parse_or(&lookup, "VOICETIME_TRACK_DEAF", true)?,
            ..TrackerDefaults::default()
        };

        let policy = StandardPolicy {
            xp_min: parse_or(&lookup, "VOICETIME_XP_MIN", 5)?,
            xp_max: parse_or(&lookup, "VOICETIME_XP_MAX", 15)?,
            level_multiplier: parse_or(&lookup, "VOICETIME_LEVEL_MULTIPLIER", 0.1)?,
            ..StandardPolicy::default()
        };
        if policy.xp_max < policy.xp_min {
            return Err(AppError::Config(
                "VOICETIME_XP_MAX must not be below VOICETIME_XP_MIN".to_string(),
            ));
        }
        if !policy.level_multiplier.is_finite() || policy.level_multiplier < 0.0 {
            return Err(AppError::Config(
                "VOICETIME_LEVEL_MULTIPLIER must be a non-negative number".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            storage,
            options,
            defaults,
            policy,
        })
    }

    /// The address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST` and `PORT` do not form a socket
    /// address.
    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid ({raw:?}): {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServerConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_apply_when_nothing_is_set() {
        // Act
        let config = config_from(&[]).unwrap();

        // Assert
        assert_eq!(config.port, 3000);
        assert_eq!(
            config.storage,
            StorageBackend::Json {
                path: PathBuf::from("./data/voicetime.json")
            }
        );
        assert_eq!(config.options.sweep_tick_ms, 5_000);
        assert_eq!(config.options.io_timeout, Duration::from_secs(5));
        assert!(!config.options.delete_unavailable_guilds);
        assert_eq!(config.defaults, TrackerDefaults::default());
        assert_eq!(config.policy, StandardPolicy::default());
        assert_eq!(config.socket_addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("VOICETIME_STORAGE", "postgres"),
            ("DATABASE_URL", "postgres://localhost/voicetime"),
            ("VOICETIME_SWEEP_INTERVAL_MS", "1000"),
            ("VOICETIME_TRACK_MUTE", "false"),
            ("VOICETIME_XP_MIN", "1"),
            ("VOICETIME_XP_MAX", "3"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert!(matches!(config.storage, StorageBackend::Postgres { .. }));
        assert_eq!(config.options.sweep_interval, Duration::from_secs(1));
        assert!(!config.defaults.track_mute);
        assert_eq!((config.policy.xp_min, config.policy.xp_max), (1, 3));
    }

    #[test]
    fn test_malformed_values_name_the_variable() {
        let error = config_from(&[("VOICETIME_SWEEP_TICK_MS", "soon")]).unwrap_err();

        assert!(error.to_string().contains("VOICETIME_SWEEP_TICK_MS"));
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let result = config_from(&[("VOICETIME_STORAGE", "postgres")]);

        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_inverted_xp_range_is_rejected() {
        let result = config_from(&[("VOICETIME_XP_MIN", "20"), ("VOICETIME_XP_MAX", "10")]);

        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
