//! Orchestrator configuration
//!
//! Every field has a serde default so a partial `[orchestrator]` table in a
//! TOML file fills in the rest. Durations are milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tumbler_ksql::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Statement submission retries after the first attempt (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// First submission backoff (default: 500ms)
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Submission backoff cap (default: 30s)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// `SHOW QUERIES` polls when locating a started query (default: 10)
    #[serde(default = "default_query_lookup_attempts")]
    pub query_lookup_attempts: u32,

    #[serde(default = "default_query_lookup_interval_ms")]
    pub query_lookup_interval_ms: u64,

    /// `ksql.service.id` of the engine (default: `default_`)
    #[serde(default = "default_service_id")]
    pub service_id: String,

    /// `ksql.persistent.prefix` of the engine (default: `query_`)
    #[serde(default = "default_persistent_query_prefix")]
    pub persistent_query_prefix: String,

    /// Partitions assumed when upstream topic metadata is unavailable
    #[serde(default = "default_partitions")]
    pub default_partitions: u32,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u16,

    /// How long to wait for repartition and changelog topics (default: 60s)
    #[serde(default = "default_internal_topic_timeout_ms")]
    pub internal_topic_timeout_ms: u64,

    #[serde(default = "default_internal_topic_poll_interval_ms")]
    pub internal_topic_poll_interval_ms: u64,

    /// Wait before creating missing internal topics ourselves (default: 10s)
    #[serde(default = "default_internal_topic_create_grace_ms")]
    pub internal_topic_create_grace_ms: u64,

    /// Consecutive RUNNING observations required (default: 3)
    #[serde(default = "default_required_running_observations")]
    pub required_running_observations: u32,

    #[serde(default = "default_running_poll_interval_ms")]
    pub running_poll_interval_ms: u64,

    #[serde(default = "default_running_timeout_ms")]
    pub running_timeout_ms: u64,

    /// Pause before the confirming re-check; 0 skips it
    #[serde(default = "default_stability_delay_ms")]
    pub stability_delay_ms: u64,

    /// Attempts per entity, each after terminating the previous query (default: 3)
    #[serde(default = "default_max_entity_attempts")]
    pub max_entity_attempts: u32,

    /// Drop the entity before re-submitting it
    #[serde(default = "default_drop_on_retry")]
    pub drop_on_retry: bool,

    /// Deadline for a whole pipeline; unbounded when absent
    #[serde(default)]
    pub pipeline_timeout_ms: Option<u64>,
}

fn default_max_retries() -> usize {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_query_lookup_attempts() -> u32 {
    10
}

fn default_query_lookup_interval_ms() -> u64 {
    1_000
}

fn default_service_id() -> String {
    "default_".to_string()
}

fn default_persistent_query_prefix() -> String {
    "query_".to_string()
}

fn default_partitions() -> u32 {
    1
}

fn default_replication_factor() -> u16 {
    1
}

fn default_internal_topic_timeout_ms() -> u64 {
    60_000
}

fn default_internal_topic_poll_interval_ms() -> u64 {
    1_000
}

fn default_internal_topic_create_grace_ms() -> u64 {
    10_000
}

fn default_required_running_observations() -> u32 {
    3
}

fn default_running_poll_interval_ms() -> u64 {
    1_000
}

fn default_running_timeout_ms() -> u64 {
    120_000
}

fn default_stability_delay_ms() -> u64 {
    5_000
}

fn default_max_entity_attempts() -> u32 {
    3
}

fn default_drop_on_retry() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            query_lookup_attempts: default_query_lookup_attempts(),
            query_lookup_interval_ms: default_query_lookup_interval_ms(),
            service_id: default_service_id(),
            persistent_query_prefix: default_persistent_query_prefix(),
            default_partitions: default_partitions(),
            replication_factor: default_replication_factor(),
            internal_topic_timeout_ms: default_internal_topic_timeout_ms(),
            internal_topic_poll_interval_ms: default_internal_topic_poll_interval_ms(),
            internal_topic_create_grace_ms: default_internal_topic_create_grace_ms(),
            required_running_observations: default_required_running_observations(),
            running_poll_interval_ms: default_running_poll_interval_ms(),
            running_timeout_ms: default_running_timeout_ms(),
            stability_delay_ms: default_stability_delay_ms(),
            max_entity_attempts: default_max_entity_attempts(),
            drop_on_retry: default_drop_on_retry(),
            pipeline_timeout_ms: None,
        }
    }
}

impl OrchestratorConfig {
    /// Backoff policy for statement submission.
    pub fn submit_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.backoff_multiplier,
        )
    }

    pub fn pipeline_timeout(&self) -> Option<Duration> {
        self.pipeline_timeout_ms.map(Duration::from_millis)
    }
}
