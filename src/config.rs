use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime settings for the server binary, read from `A2A_*` environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub nats_url: String,
    pub subject: String,
    pub connect_timeout: Duration,
    /// Redis URL for task persistence; tasks stay in memory when unset
    pub redis_url: Option<String>,
    pub agent_name: String,
    pub agent_description: String,
    /// Delay between the echo agent's simulated steps
    pub agent_step_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            subject: "a2a.agent".to_string(),
            connect_timeout: Duration::from_secs(5),
            redis_url: None,
            agent_name: "A2A Server".to_string(),
            agent_description: "A Rust implementation of the A2A protocol server".to_string(),
            agent_step_delay: Duration::from_millis(500),
        }
    }
}

impl ServerConfig {
    /// Load the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration from any key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let connect_timeout = match non_empty("A2A_CONNECT_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(
                value
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid A2A_CONNECT_TIMEOUT_SECS: {}", value))?,
            ),
            None => defaults.connect_timeout,
        };
        let agent_step_delay = match non_empty("A2A_AGENT_STEP_DELAY_MS") {
            Some(value) => Duration::from_millis(
                value
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid A2A_AGENT_STEP_DELAY_MS: {}", value))?,
            ),
            None => defaults.agent_step_delay,
        };

        Ok(Self {
            nats_url: non_empty("A2A_NATS_URL").unwrap_or(defaults.nats_url),
            subject: non_empty("A2A_SUBJECT").unwrap_or(defaults.subject),
            connect_timeout,
            redis_url: non_empty("A2A_REDIS_URL"),
            agent_name: non_empty("A2A_AGENT_NAME").unwrap_or(defaults.agent_name),
            agent_description: non_empty("A2A_AGENT_DESCRIPTION")
                .unwrap_or(defaults.agent_description),
            agent_step_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("A2A_NATS_URL", "nats://broker:4222"),
            ("A2A_SUBJECT", "agents.rooms"),
            ("A2A_CONNECT_TIMEOUT_SECS", "10"),
            ("A2A_REDIS_URL", "redis://cache:6379"),
            ("A2A_AGENT_STEP_DELAY_MS", "0"),
            ("A2A_AGENT_NAME", ""),
        ]))
        .unwrap();

        assert_eq!(config.nats_url, "nats://broker:4222");
        assert_eq!(config.subject, "agents.rooms");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.agent_step_delay, Duration::ZERO);
        assert_eq!(config.agent_name, "A2A Server");
    }

    #[test]
    fn test_invalid_timeout_is_an_error() {
        let err = ServerConfig::from_lookup(lookup(&[("A2A_CONNECT_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("A2A_CONNECT_TIMEOUT_SECS"));
    }
}
