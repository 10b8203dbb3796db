//! Stabilization of persistent queries
//!
//! The engine offers no direct view of a query's health, so stabilization is
//! inferred by polling: the aggregation's internal topics must exist with the
//! upstream partition count, and the query must be listed as RUNNING for a
//! number of consecutive observations.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use tumbler_ksql::show_queries::{self, QueryRow};
use tumbler_ksql::{
    internal_topic_names, retry_with_backoff, RetryPolicy, StatementExecutor, TopicAdmin,
};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};

/// Fetch and parse `SHOW QUERIES`, retrying transport failures.
pub(crate) async fn list_queries(
    executor: &dyn StatementExecutor,
    policy: &RetryPolicy,
) -> Result<Vec<QueryRow>> {
    let text = retry_with_backoff(policy, move || executor.show_queries()).await?;
    Ok(show_queries::parse(&text))
}

pub(crate) struct Stabilizer<'a> {
    executor: &'a dyn StatementExecutor,
    topics: &'a dyn TopicAdmin,
    config: &'a OrchestratorConfig,
    policy: RetryPolicy,
}

impl<'a> Stabilizer<'a> {
    pub(crate) fn new(
        executor: &'a dyn StatementExecutor,
        topics: &'a dyn TopicAdmin,
        config: &'a OrchestratorConfig,
    ) -> Self {
        Self {
            executor,
            topics,
            config,
            policy: config.submit_policy(),
        }
    }

    /// Wait until the repartition and changelog topics of `query_id` exist
    /// with `partitions` partitions, creating absent ones once the create
    /// grace has passed.
    pub(crate) async fn ensure_internal_topics(
        &self,
        entity: &str,
        query_id: &str,
        partitions: u32,
    ) -> Result<Vec<String>> {
        let names = internal_topic_names(
            &self.config.service_id,
            &self.config.persistent_query_prefix,
            query_id,
        );
        let timeout = Duration::from_millis(self.config.internal_topic_timeout_ms);
        let create_grace = Duration::from_millis(self.config.internal_topic_create_grace_ms);
        let interval = Duration::from_millis(self.config.internal_topic_poll_interval_ms);
        let start = Instant::now();
        let mut created = false;

        loop {
            let mut absent = Vec::new();
            let mut problems = Vec::new();
            for name in &names {
                match self.topics.try_get_topic_metadata(name).await {
                    Ok(Some(meta)) if meta.partitions == partitions => {}
                    Ok(Some(meta)) => problems.push(format!(
                        "{} has {} partitions, expected {}",
                        name, meta.partitions, partitions
                    )),
                    Ok(None) => {
                        absent.push(name.as_str());
                        problems.push(format!("{} is missing", name));
                    }
                    Err(err) => {
                        warn!(entity = %entity, topic = %name, error = %err, "Topic metadata lookup failed");
                        problems.push(format!("{}: {}", name, err));
                    }
                }
            }

            if problems.is_empty() {
                info!(entity = %entity, query_id = %query_id, partitions, "Internal topics ready");
                return Ok(names.to_vec());
            }

            let elapsed = start.elapsed();
            if !created && elapsed >= create_grace && !absent.is_empty() {
                created = true;
                for name in &absent {
                    info!(entity = %entity, topic = %name, partitions, "Creating missing internal topic");
                    if let Err(err) = self
                        .topics
                        .create_topic(name, partitions, self.config.replication_factor)
                        .await
                    {
                        warn!(entity = %entity, topic = %name, error = %err, "Failed to create internal topic");
                    }
                }
                continue;
            }

            if elapsed >= timeout {
                return Err(OrchestratorError::StabilizationTimeout {
                    entity: entity.to_string(),
                    reason: format!("internal topics not ready: {}", problems.join("; ")),
                });
            }
            debug!(entity = %entity, pending = problems.len(), "Waiting for internal topics");
            sleep(interval).await;
        }
    }

    /// Require consecutive RUNNING observations of `query_id`, then confirm
    /// once more after the stability delay.
    pub(crate) async fn await_running(&self, entity: &str, query_id: &str) -> Result<()> {
        let required = self.config.required_running_observations.max(1);
        let timeout = Duration::from_millis(self.config.running_timeout_ms);
        let interval = Duration::from_millis(self.config.running_poll_interval_ms);
        let start = Instant::now();
        let mut consecutive = 0;

        loop {
            let status = self.status(entity, query_id).await?;
            if status_is_running(&status) {
                consecutive += 1;
                debug!(entity = %entity, query_id = %query_id, consecutive, required, "Query running");
                if consecutive >= required {
                    break;
                }
            } else {
                if consecutive > 0 {
                    warn!(entity = %entity, query_id = %query_id, status = %status, "Query left RUNNING");
                }
                consecutive = 0;
            }

            if start.elapsed() >= timeout {
                return Err(OrchestratorError::StabilizationTimeout {
                    entity: entity.to_string(),
                    reason: format!("query {} not running (last status {})", query_id, status),
                });
            }
            sleep(interval).await;
        }

        if self.config.stability_delay_ms > 0 {
            sleep(Duration::from_millis(self.config.stability_delay_ms)).await;
            let status = self.status(entity, query_id).await?;
            if !status_is_running(&status) {
                return Err(OrchestratorError::StabilizationFailed {
                    entity: entity.to_string(),
                    reason: format!("query {} flapped to {} after stabilizing", query_id, status),
                });
            }
        }

        info!(entity = %entity, query_id = %query_id, "Query stable");
        Ok(())
    }

    async fn status(&self, entity: &str, query_id: &str) -> Result<String> {
        let rows = list_queries(self.executor, &self.policy).await?;
        rows.into_iter()
            .find(|r| r.id.eq_ignore_ascii_case(query_id))
            .map(|r| r.status)
            .ok_or_else(|| OrchestratorError::StabilizationFailed {
                entity: entity.to_string(),
                reason: format!("query {} is no longer listed", query_id),
            })
    }
}

fn status_is_running(status: &str) -> bool {
    status.trim().to_uppercase().starts_with("RUNNING")
}
