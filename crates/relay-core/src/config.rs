//! Coordinator configuration.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::MAX_MESSAGE_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be an unsigned integer, got {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Timing and capacity parameters for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Leader heartbeat period T (default: 1s). Followers promote after 2T
    /// of silence.
    pub heartbeat_interval: Duration,
    /// How long a new peer listens for a heartbeat before leading (default: 1s)
    pub decision_timeout: Duration,
    /// Modulus for identity-derived jitter of re-announces and
    /// renegotiation (default: 1000ms)
    pub jitter_modulus: Duration,
    /// Fixed delay added to the renegotiation jitter after an empty
    /// handoff (default: 500ms)
    pub renegotiate_backoff: Duration,
    /// Modulus for the identity-derived stagger added to the 2T leader
    /// timeout (default: 250ms)
    pub watchdog_stagger: Duration,
    /// Largest relayed payload in characters (default: 2.5M)
    pub max_message_len: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            decision_timeout: Duration::from_secs(1),
            jitter_modulus: Duration::from_millis(1000),
            renegotiate_backoff: Duration::from_millis(500),
            watchdog_stagger: Duration::from_millis(250),
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overridden by environment variables.
    ///
    /// Recognized variables (all optional, milliseconds unless noted):
    /// - `RELAY_HEARTBEAT_MS`
    /// - `RELAY_DECISION_MS`
    /// - `RELAY_JITTER_MODULUS_MS`
    /// - `RELAY_BACKOFF_MS`
    /// - `RELAY_WATCHDOG_STAGGER_MS`
    /// - `RELAY_MAX_MESSAGE_LEN` (characters)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let read = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue { var, value }),
            }
        };

        if let Some(ms) = read("RELAY_HEARTBEAT_MS")? {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = read("RELAY_DECISION_MS")? {
            config.decision_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read("RELAY_JITTER_MODULUS_MS")? {
            config.jitter_modulus = Duration::from_millis(ms);
        }
        if let Some(ms) = read("RELAY_BACKOFF_MS")? {
            config.renegotiate_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = read("RELAY_WATCHDOG_STAGGER_MS")? {
            config.watchdog_stagger = Duration::from_millis(ms);
        }
        if let Some(len) = read("RELAY_MAX_MESSAGE_LEN")? {
            config.max_message_len = len as usize;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject parameters the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Zero("heartbeat_interval"));
        }
        if self.decision_timeout.is_zero() {
            return Err(ConfigError::Zero("decision_timeout"));
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::Zero("max_message_len"));
        }
        Ok(())
    }

    pub(crate) fn heartbeat_ms(&self) -> u64 {
        (self.heartbeat_interval.as_millis() as u64).max(1)
    }

    pub(crate) fn decision_ms(&self) -> u64 {
        self.decision_timeout.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.decision_timeout, Duration::from_secs(1));
        assert_eq!(config.max_message_len, 2_500_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_env_gives_defaults() {
        let config = CoordinatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            ("RELAY_HEARTBEAT_MS", "250"),
            ("RELAY_DECISION_MS", " 400 "),
            ("RELAY_MAX_MESSAGE_LEN", "1024"),
        ]))
        .unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.decision_timeout, Duration::from_millis(400));
        assert_eq!(config.max_message_len, 1024);
        assert_eq!(config.jitter_modulus, Duration::from_millis(1000));
    }

    #[test]
    fn test_invalid_value() {
        let err = CoordinatorConfig::from_lookup(lookup(&[("RELAY_BACKOFF_MS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "RELAY_BACKOFF_MS",
                value: "soon".into()
            }
        );
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let err = CoordinatorConfig::from_lookup(lookup(&[("RELAY_HEARTBEAT_MS", "0")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Zero("heartbeat_interval"));
    }
}
