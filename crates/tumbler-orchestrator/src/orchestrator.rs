//! Rollup pipeline orchestration
//!
//! ## Architecture
//!
//! ```text
//! QueryModel
//!     │ plan + synthesize (no remote calls)
//!     ▼
//! [hub table, hub stream, live..., heartbeat..., prev, fill...]
//!     │ one entity at a time, dependencies first
//!     ▼
//! submit DDL ──► locate query ──► internal topics ──► RUNNING x N ──► register
//!     ▲                                   │ stabilization failure
//!     └──────── TERMINATE + DROP ◄────────┘ (bounded attempts)
//! ```
//!
//! A pipeline runs sequentially; independent pipelines may run concurrently
//! through [`Orchestrator::initialize_all`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tumbler_ksql::{
    classify_response, find_query_id, retry_with_backoff, ExecuteResponse, ResponseClass,
    StatementExecutor, TopicAdmin,
};
use tumbler_sql::ddl::StatementKind;
use tumbler_sql::planner::DerivedEntity;
use tumbler_sql::{synthesize_plan, EntityDescriptor, EntityRole, QueryModel, SynthesizedDdl};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::registry::EntityRegistry;
use crate::stabilize::{list_queries, Stabilizer};

/// A planned entity with its synthesized statements.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedEntity {
    pub entity: DerivedEntity,
    pub ddl: SynthesizedDdl,
}

/// The persistent query behind an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistentQueryExecution {
    pub query_id: String,
    /// Repartition and changelog topics; empty when not an aggregation
    pub internal_topics: Vec<String>,
    /// Upstream partition count the internal topics were checked against
    pub partitions: Option<u32>,
    pub stabilized: bool,
}

/// Outcome of initializing one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub entity: String,
    pub role: EntityRole,
    pub ddl: String,
    pub input_topic_override: Option<String>,
    pub response: ExecuteResponse,
    /// `None` for plain CREATE statements or when the query was not found
    pub query: Option<PersistentQueryExecution>,
    pub attempts: u32,
}

/// Drives rollup pipelines against one engine.
pub struct Orchestrator {
    executor: Arc<dyn StatementExecutor>,
    topics: Arc<dyn TopicAdmin>,
    config: OrchestratorConfig,
    registry: Arc<EntityRegistry>,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<dyn StatementExecutor>,
        topics: Arc<dyn TopicAdmin>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            executor,
            topics,
            config,
            registry: Arc::new(EntityRegistry::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Descriptors of registered sources and initialized entities.
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn register_source(&self, descriptor: EntityDescriptor) {
        self.registry.register(descriptor);
    }

    /// Plan and synthesize every entity of `query`, in execution order.
    pub fn plan(&self, query: &QueryModel) -> Result<Vec<PlannedEntity>> {
        let resolver = self.registry.as_ref();
        let entities = tumbler_sql::plan(query, resolver)?;
        let ddls = synthesize_plan(&entities, query, resolver)?;
        Ok(entities
            .into_iter()
            .zip(ddls)
            .map(|(entity, ddl)| PlannedEntity { entity, ddl })
            .collect())
    }

    /// Run the pipeline of `query` to completion, bounded by the configured
    /// pipeline deadline.
    pub async fn initialize(&self, query: &QueryModel) -> Result<Vec<ExecutionResult>> {
        let Some(limit) = self.config.pipeline_timeout() else {
            return self.run_pipeline(query).await;
        };
        match tokio::time::timeout(limit, self.run_pipeline(query)).await {
            Ok(result) => result,
            Err(_) => {
                error!(query = %query.name, timeout_ms = limit.as_millis() as u64, "Pipeline deadline exceeded");
                Err(OrchestratorError::DeadlineExceeded {
                    query: query.name.clone(),
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    /// Like [`initialize`](Self::initialize), aborting when `shutdown` fires.
    /// A dropped sender does not cancel.
    pub async fn initialize_until(
        &self,
        query: &QueryModel,
        shutdown: oneshot::Receiver<()>,
    ) -> Result<Vec<ExecutionResult>> {
        tokio::select! {
            result = self.initialize(query) => result,
            Ok(()) = shutdown => {
                warn!(query = %query.name, "Pipeline cancelled");
                Err(OrchestratorError::Cancelled(query.name.clone()))
            }
        }
    }

    /// Run independent pipelines concurrently, one result per query.
    pub async fn initialize_all(&self, queries: &[QueryModel]) -> Vec<Result<Vec<ExecutionResult>>> {
        join_all(queries.iter().map(|q| self.initialize(q))).await
    }

    async fn run_pipeline(&self, query: &QueryModel) -> Result<Vec<ExecutionResult>> {
        let planned = self.plan(query)?;
        info!(query = %query.name, entities = planned.len(), "Initializing pipeline");

        let mut results = Vec::with_capacity(planned.len());
        for planned_entity in &planned {
            let result = self.initialize_entity(planned_entity).await?;
            self.registry.register(planned_entity.ddl.descriptor.clone());
            results.push(result);
        }

        info!(query = %query.name, entities = results.len(), "Pipeline initialized");
        Ok(results)
    }

    async fn initialize_entity(&self, planned: &PlannedEntity) -> Result<ExecutionResult> {
        let ddl = &planned.ddl;
        let max_attempts = self.config.max_entity_attempts.max(1);
        let mut attempt = 1;

        loop {
            info!(entity = %ddl.entity, role = ?ddl.role, attempt, "Submitting entity");
            let response = self.submit(ddl).await?;
            let query_id = self.locate_query(ddl).await?;

            let query = match query_id {
                Some(query_id) => match self.stabilize(planned, &query_id).await {
                    Ok(execution) => Some(execution),
                    Err(err) if err.is_stabilization_failure() => {
                        if attempt >= max_attempts {
                            error!(entity = %ddl.entity, attempts = attempt, error = %err, "Entity failed to stabilize");
                            return Err(OrchestratorError::Initialization {
                                entity: ddl.entity.clone(),
                                attempts: attempt,
                                statement: ddl.ddl(),
                                message: err.to_string(),
                            });
                        }
                        warn!(entity = %ddl.entity, attempt, error = %err, "Stabilization failed, retrying entity");
                        self.reset(ddl, &query_id).await?;
                        attempt += 1;
                        continue;
                    }
                    Err(err) => return Err(err),
                },
                None => None,
            };

            info!(entity = %ddl.entity, attempts = attempt, "Entity initialized");
            return Ok(ExecutionResult {
                entity: ddl.entity.clone(),
                role: ddl.role,
                ddl: ddl.ddl(),
                input_topic_override: ddl.input_topic_override.clone(),
                response,
                query,
                attempts: attempt,
            });
        }
    }

    /// Submit every statement of the entity, returning the last response.
    async fn submit(&self, ddl: &SynthesizedDdl) -> Result<ExecuteResponse> {
        let mut last = ExecuteResponse::ok("");
        for statement in &ddl.statements {
            if statement.kind == StatementKind::InsertInto && self.writer_running(ddl).await? {
                info!(entity = %ddl.entity, topic = %ddl.topic(), "Insert query already running, skipping");
                last = ExecuteResponse::ok(format!("query writing {} already running", ddl.topic()));
                continue;
            }
            last = self.submit_statement(&ddl.entity, &statement.sql).await?;
        }
        Ok(last)
    }

    async fn submit_statement(&self, entity: &str, sql: &str) -> Result<ExecuteResponse> {
        let policy = self.config.submit_policy();
        let result = retry_with_backoff(&policy, move || async move {
            let response = self.executor.execute(sql).await?;
            match classify_response(&response) {
                ResponseClass::Success => Ok(response),
                ResponseClass::AlreadyExists => {
                    info!(entity = %entity, message = %response.message, "Already exists, treating as success");
                    Ok(response)
                }
                ResponseClass::Transient => Err(OrchestratorError::TransientEngine {
                    entity: entity.to_string(),
                    message: response.message,
                }),
                ResponseClass::Permanent => Err(OrchestratorError::PermanentEngine {
                    entity: entity.to_string(),
                    statement: sql.to_string(),
                    message: response.message,
                }),
            }
        })
        .await;

        match result {
            Err(err @ OrchestratorError::TransientEngine { .. }) => {
                error!(entity = %entity, error = %err, "Submission retries exhausted");
                Err(OrchestratorError::Initialization {
                    entity: entity.to_string(),
                    attempts: policy.max_retries as u32 + 1,
                    statement: sql.to_string(),
                    message: err.to_string(),
                })
            }
            other => other,
        }
    }

    /// Whether a running query already writes the entity's topic.
    async fn writer_running(&self, ddl: &SynthesizedDdl) -> Result<bool> {
        let rows = list_queries(self.executor.as_ref(), &self.config.submit_policy()).await?;
        Ok(rows
            .iter()
            .any(|r| r.writes_topic(ddl.topic()) && r.is_running()))
    }

    /// Find the persistent query the entity's statements started. Best effort.
    async fn locate_query(&self, ddl: &SynthesizedDdl) -> Result<Option<String>> {
        let Some(statement) = ddl.statements.iter().find(|s| s.kind.starts_query()) else {
            return Ok(None);
        };

        let attempts = self.config.query_lookup_attempts.max(1);
        let policy = self.config.submit_policy();
        for attempt in 1..=attempts {
            let rows = list_queries(self.executor.as_ref(), &policy).await?;
            if let Some(query_id) = find_query_id(&rows, ddl.topic(), Some(&statement.sql)) {
                info!(entity = %ddl.entity, query_id = %query_id, "Located persistent query");
                return Ok(Some(query_id));
            }
            debug!(entity = %ddl.entity, attempt, "Persistent query not listed yet");
            if attempt < attempts {
                sleep(Duration::from_millis(self.config.query_lookup_interval_ms)).await;
            }
        }

        warn!(entity = %ddl.entity, attempts, "Persistent query not found, skipping stabilization");
        Ok(None)
    }

    /// Aggregating entities get their internal topics checked first; every
    /// located query must then be confirmed RUNNING.
    async fn stabilize(
        &self,
        planned: &PlannedEntity,
        query_id: &str,
    ) -> Result<PersistentQueryExecution> {
        let stabilizer = Stabilizer::new(self.executor.as_ref(), self.topics.as_ref(), &self.config);
        let (internal_topics, partitions) = if planned.entity.is_aggregating() {
            let partitions = self.upstream_partitions(planned).await;
            let topics = stabilizer
                .ensure_internal_topics(&planned.ddl.entity, query_id, partitions)
                .await?;
            (topics, Some(partitions))
        } else {
            (Vec::new(), None)
        };
        stabilizer.await_running(&planned.ddl.entity, query_id).await?;

        Ok(PersistentQueryExecution {
            query_id: query_id.to_string(),
            internal_topics,
            partitions,
            stabilized: true,
        })
    }

    /// Largest partition count among the topics the entity reads, falling back
    /// to its own configured count and then the default.
    async fn upstream_partitions(&self, planned: &PlannedEntity) -> u32 {
        let upstream: Vec<String> = planned
            .entity
            .sources
            .iter()
            .chain(planned.entity.depends_on.iter())
            .filter_map(|name| self.registry.get(name))
            .map(|d| d.topic)
            .collect();

        let mut partitions = None;
        for topic in &upstream {
            match self.topics.try_get_topic_metadata(topic).await {
                Ok(Some(meta)) => {
                    partitions = Some(partitions.map_or(meta.partitions, |p: u32| p.max(meta.partitions)));
                }
                Ok(None) => debug!(topic = %topic, "Upstream topic not found"),
                Err(err) => warn!(topic = %topic, error = %err, "Upstream topic lookup failed"),
            }
        }

        partitions
            .or(planned.ddl.descriptor.partitions)
            .unwrap_or(self.config.default_partitions)
    }

    /// Terminate the query and, when configured, drop the entity so the next
    /// CREATE is not absorbed as "already exists".
    async fn reset(&self, ddl: &SynthesizedDdl, query_id: &str) -> Result<()> {
        let terminate = format!("TERMINATE {};", query_id);
        let response = self.executor.execute(&terminate).await?;
        if !response.success {
            warn!(entity = %ddl.entity, query_id = %query_id, message = %response.message, "Terminate failed");
        }

        if self.config.drop_on_retry {
            let drop = format!("DROP {} {};", ddl.descriptor.shape.keyword(), ddl.entity);
            let response = self.executor.execute(&drop).await?;
            if !response.success {
                warn!(entity = %ddl.entity, message = %response.message, "Drop failed");
            }
        }
        Ok(())
    }
}
