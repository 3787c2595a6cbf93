//! Configuration surface.
//!
//! Durations are float seconds on the wire (`health_check_interval_seconds = 0.5`).
//! Every struct has a `validate()` that the orchestrator calls before using it,
//! so bad values fail at construction with `ConfigError`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{AgentId, RetryPolicy};
use crate::error::ConfigError;

/// What happens to a timed-out handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonPolicy {
    /// Drop the handler future at the deadline; the slot frees immediately.
    #[default]
    Abort,
    /// Signal cancellation and keep the slot until the handler returns.
    WaitForReturn,
}

/// Orchestrator-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// How often the registry checks agent heartbeats and starvation.
    pub health_check_interval_seconds: f64,

    /// How often each agent worker sends a heartbeat.
    pub heartbeat_interval_seconds: f64,

    /// Silence longer than this marks an agent `Failed`.
    pub heartbeat_timeout_seconds: f64,

    /// Queued-without-capacity time after which a task is reported starved.
    pub starvation_threshold_seconds: f64,

    /// Upper bound on how long deregistration waits for running tasks.
    pub drain_timeout_seconds: f64,

    /// Periodic checkpoint interval. `None` disables periodic checkpoints
    /// (shutdown still checkpoints when a store is configured).
    pub checkpoint_interval_seconds: Option<f64>,

    pub default_priority: i32,

    pub retry_policy: RetryPolicy,

    /// Bounded queue size for each event bus subscriber.
    pub subscriber_queue_capacity: usize,

    /// Capacity of the coordinator's command mailbox.
    pub mailbox_capacity: usize,

    /// Respawn an agent's worker loop after it is marked `Failed`.
    pub recover_failed_agents: bool,

    pub abandon_policy: AbandonPolicy,

    /// Terminal tasks kept for status queries and late dependents. The
    /// oldest tombstone is released once the limit is reached.
    pub tombstone_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_seconds: 1.0,
            heartbeat_interval_seconds: 0.25,
            heartbeat_timeout_seconds: 3.0,
            starvation_threshold_seconds: 30.0,
            drain_timeout_seconds: 10.0,
            checkpoint_interval_seconds: None,
            default_priority: 0,
            retry_policy: RetryPolicy::default(),
            subscriber_queue_capacity: 1024,
            mailbox_capacity: 256,
            recover_failed_agents: true,
            abandon_policy: AbandonPolicy::Abort,
            tombstone_limit: 10_000,
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.health_check_interval()?;
        let heartbeat = self.heartbeat_interval()?;
        let timeout = self.heartbeat_timeout()?;
        if timeout <= heartbeat {
            return Err(ConfigError::invalid(
                "heartbeat_timeout_seconds",
                "must be greater than heartbeat_interval_seconds",
            ));
        }
        self.starvation_threshold()?;
        self.drain_timeout()?;
        self.checkpoint_interval()?;
        if self.subscriber_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "subscriber_queue_capacity",
                "must be greater than 0",
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::invalid(
                "mailbox_capacity",
                "must be greater than 0",
            ));
        }
        if self.tombstone_limit == 0 {
            return Err(ConfigError::invalid("tombstone_limit", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn health_check_interval(&self) -> Result<Duration, ConfigError> {
        positive_secs(
            "health_check_interval_seconds",
            self.health_check_interval_seconds,
        )
    }

    pub fn heartbeat_interval(&self) -> Result<Duration, ConfigError> {
        positive_secs("heartbeat_interval_seconds", self.heartbeat_interval_seconds)
    }

    pub fn heartbeat_timeout(&self) -> Result<Duration, ConfigError> {
        positive_secs("heartbeat_timeout_seconds", self.heartbeat_timeout_seconds)
    }

    pub fn starvation_threshold(&self) -> Result<Duration, ConfigError> {
        positive_secs(
            "starvation_threshold_seconds",
            self.starvation_threshold_seconds,
        )
    }

    pub fn drain_timeout(&self) -> Result<Duration, ConfigError> {
        non_negative_secs("drain_timeout_seconds", self.drain_timeout_seconds)
    }

    pub fn checkpoint_interval(&self) -> Result<Option<Duration>, ConfigError> {
        self.checkpoint_interval_seconds
            .map(|s| positive_secs("checkpoint_interval_seconds", s))
            .transpose()
    }
}

/// Per-agent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Fixed id. Generated at registration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AgentId>,

    pub name: String,

    pub max_concurrent_tasks: usize,

    /// Maximum queued (admitted, not started) tasks. `None` = unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_limit: Option<usize>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, max_concurrent_tasks: usize) -> Self {
        Self {
            id: None,
            name: name.into(),
            max_concurrent_tasks,
            queue_limit: None,
        }
    }

    pub fn with_id(mut self, id: AgentId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::invalid(
                "max_concurrent_tasks",
                "must be greater than 0",
            ));
        }
        if self.queue_limit == Some(0) {
            return Err(ConfigError::invalid("queue_limit", "must be greater than 0"));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        Ok(())
    }
}

pub(crate) fn positive_secs(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be a positive number of seconds, got {secs}"),
        ));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::invalid(field, e.to_string()))
}

pub(crate) fn non_negative_secs(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be a non-negative number of seconds, got {secs}"),
        ));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::invalid(field, e.to_string()))
}

/// serde helper: `Duration` as float seconds.
pub(crate) mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        super::non_negative_secs("duration", secs).map_err(serde::de::Error::custom)
    }
}

/// serde helper: `Option<Duration>` as optional float seconds.
pub(crate) mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| super::positive_secs("timeout", secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_config_is_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            health_check_interval_seconds = 0.5
            default_priority = 3
            abandon_policy = "wait_for_return"

            [retry_policy]
            max_attempts = 5
            backoff_base_seconds = 0.1
            backoff_factor = 2.0
            max_delay_seconds = 1.0
            "#,
        )
        .unwrap();

        assert_eq!(
            config.health_check_interval().unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(config.default_priority, 3);
        assert_eq!(config.abandon_policy, AbandonPolicy::WaitForReturn);
        assert_eq!(config.retry_policy.max_attempts(), 5);
        assert_eq!(config.mailbox_capacity, 256);
    }

    #[rstest]
    #[case::zero_interval("health_check_interval_seconds = 0.0")]
    #[case::negative_interval("health_check_interval_seconds = -1.0")]
    #[case::timeout_below_heartbeat("heartbeat_timeout_seconds = 0.1")]
    #[case::zero_subscriber_queue("subscriber_queue_capacity = 0")]
    #[case::zero_tombstone_limit("tombstone_limit = 0")]
    #[case::bad_retry_policy(
        "[retry_policy]\nmax_attempts = 0\nbackoff_base_seconds = 1.0\nbackoff_factor = 2.0\nmax_delay_seconds = 2.0"
    )]
    fn invalid_toml_fails_fast(#[case] doc: &str) {
        assert!(OrchestratorConfig::from_toml_str(doc).is_err());
    }

    #[test]
    fn unparsable_toml_is_a_parse_error() {
        let err = OrchestratorConfig::from_toml_str("health_check_interval_seconds = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[rstest]
    #[case(AgentConfig::new("a", 0))]
    #[case(AgentConfig::new("a", 2).with_queue_limit(0))]
    #[case(AgentConfig::new("  ", 2))]
    fn invalid_agent_configs(#[case] config: AgentConfig) {
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_agent_config() {
        AgentConfig::new("fetcher", 4)
            .with_queue_limit(8)
            .validate()
            .unwrap();
    }
}
