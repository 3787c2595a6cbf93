//! Task description types: what the caller submits.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::{AgentId, TaskId};
use super::retry::RetryPolicy;
use crate::typed::Job;

/// Name of a handler variant, e.g. `market.price_check.v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// TaskType + payload: everything a handler needs to know about its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    task_type: TaskType,
    payload: serde_json::Value,
}

impl TaskEnvelope {
    pub fn new(task_type: TaskType, payload: serde_json::Value) -> Self {
        Self { task_type, payload }
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// A task as submitted by the caller.
///
/// Everything here is immutable once the scheduler accepts it. Optional
/// fields fall back to the orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Caller-chosen id. Generated at submission when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub envelope: TaskEnvelope,

    /// Higher runs first. Defaults to `default_priority` from config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    /// Per-attempt execution timeout.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::config::opt_secs"
    )]
    pub timeout: Option<Duration>,

    /// Pin the task to one agent's queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_to: Option<AgentId>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, envelope: TaskEnvelope) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            envelope,
            priority: None,
            dependencies: BTreeSet::new(),
            retry_policy: None,
            timeout: None,
            assign_to: None,
        }
    }

    /// Build a spec whose payload is the serialized typed job.
    pub fn for_job<J: Job>(name: impl Into<String>, job: &J) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(job)?;
        Ok(Self::new(
            name,
            TaskEnvelope::new(TaskType::new(J::TYPE), payload),
        ))
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn depends_on(mut self, dependency: TaskId) -> Self {
        self.dependencies.insert(dependency);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn assign_to(mut self, agent: AgentId) -> Self {
        self.assign_to = Some(agent);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn builder_collects_dependencies_once() {
        let dep = TaskId::from_ulid(Ulid::new());
        let spec = TaskSpec::new(
            "fetch",
            TaskEnvelope::new(TaskType::new("noop"), serde_json::json!({})),
        )
        .depends_on(dep)
        .depends_on(dep)
        .with_priority(7);

        assert_eq!(spec.dependencies.len(), 1);
        assert_eq!(spec.priority, Some(7));
    }

    #[test]
    fn minimal_spec_deserializes_with_defaults() {
        let json = r#"
        {
          "name": "hello",
          "envelope": { "task_type": "noop", "payload": {} }
        }"#;
        let spec: TaskSpec = serde_json::from_str(json).expect("deserialize");
        assert_eq!(spec.name, "hello");
        assert!(spec.dependencies.is_empty());
        assert!(spec.timeout.is_none());
        assert!(spec.retry_policy.is_none());
    }

    #[test]
    fn timeout_is_written_as_seconds() {
        let spec = TaskSpec::new(
            "slow",
            TaskEnvelope::new(TaskType::new("noop"), serde_json::json!(null)),
        )
        .with_timeout(Duration::from_millis(1500));

        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["timeout"], serde_json::json!(1.5));
        let back: TaskSpec = serde_json::from_value(v).unwrap();
        assert_eq!(back.timeout, Some(Duration::from_millis(1500)));
    }
}
