use std::time::Duration;

use protocol::{ConfigError, PlatformConfig};

/// Tuning for the transport session. Defaults suit a platform polled a couple
/// of times per second from a capture loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub worker_threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            reconnect_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
            worker_threads: 2,
        }
    }
}

impl Settings {
    /// Defaults overridden by `RAPP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, "RAPP_CALL_TIMEOUT_MS")? {
            settings.call_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "RAPP_CONNECT_TIMEOUT_MS")? {
            settings.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse::<u32>(&lookup, "RAPP_RECONNECT_ATTEMPTS")? {
            settings.reconnect_attempts = attempts;
        }
        if let Some(ms) = parse::<u64>(&lookup, "RAPP_BACKOFF_BASE_MS")? {
            settings.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "RAPP_BACKOFF_MAX_MS")? {
            settings.backoff_max = Duration::from_millis(ms);
        }
        if let Some(threads) = parse::<usize>(&lookup, "RAPP_WORKER_THREADS")? {
            if threads == 0 {
                return Err(ConfigError::Invalid {
                    name: "RAPP_WORKER_THREADS",
                    value: threads.to_string(),
                });
            }
            settings.worker_threads = threads;
        }

        Ok(settings)
    }

    /// Delay before reconnection attempt `attempt` (1-based), doubling from
    /// `backoff_base` up to `backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1 << exponent)
            .min(self.backoff_max)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(None),
    }
}

/// Reads the platform address and token from `RAPP_HOST`, `RAPP_PORT` and
/// `RAPP_TOKEN`.
pub fn platform_from_env() -> Result<PlatformConfig, ConfigError> {
    platform_from_lookup(|name| std::env::var(name).ok())
}

fn platform_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PlatformConfig, ConfigError> {
    let host = lookup("RAPP_HOST").ok_or(ConfigError::Missing("RAPP_HOST"))?;
    let port = lookup("RAPP_PORT").ok_or(ConfigError::Missing("RAPP_PORT"))?;
    let token = lookup("RAPP_TOKEN").ok_or(ConfigError::Missing("RAPP_TOKEN"))?;

    PlatformConfig::new(&host, &port, &token)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_settings_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("RAPP_CALL_TIMEOUT_MS", "2500"),
            ("RAPP_RECONNECT_ATTEMPTS", "2"),
        ]))
        .unwrap();

        assert_eq!(settings.call_timeout, Duration::from_millis(2500));
        assert_eq!(settings.reconnect_attempts, 2);
        assert_eq!(settings.backoff_base, Settings::default().backoff_base);
    }

    #[test]
    fn test_settings_invalid() {
        assert_eq!(
            Settings::from_lookup(lookup(&[("RAPP_CALL_TIMEOUT_MS", "soon")])),
            Err(ConfigError::Invalid {
                name: "RAPP_CALL_TIMEOUT_MS",
                value: "soon".into(),
            })
        );
        assert!(Settings::from_lookup(lookup(&[("RAPP_WORKER_THREADS", "0")])).is_err());
    }

    #[test]
    fn test_backoff() {
        let settings = Settings {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
            ..Settings::default()
        };
        assert_eq!(settings.backoff(1), Duration::from_millis(100));
        assert_eq!(settings.backoff(2), Duration::from_millis(200));
        assert_eq!(settings.backoff(3), Duration::from_millis(400));
        assert_eq!(settings.backoff(4), Duration::from_millis(500));
        assert_eq!(settings.backoff(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_platform_from_lookup() {
        let config = platform_from_lookup(lookup(&[
            ("RAPP_HOST", "rapp.ee.auth.gr"),
            ("RAPP_PORT", "9001"),
            ("RAPP_TOKEN", "rapp_token"),
        ]))
        .unwrap();
        assert_eq!(config.address(), "rapp.ee.auth.gr:9001");

        assert_eq!(
            platform_from_lookup(lookup(&[("RAPP_HOST", "rapp.ee.auth.gr")])),
            Err(ConfigError::Missing("RAPP_PORT"))
        );
    }
}
