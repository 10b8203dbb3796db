//! Pipeline initialization
//!
//! ```bash
//! tumblerctl apply bars.toml
//! tumblerctl apply bars.toml --query bar --timeout-ms 600000
//! tumblerctl apply bars.toml --dry-run
//! ```
//!
//! Topic administration goes through the Kafka REST proxy when both
//! `rest_proxy_url` and `cluster_id` are configured, and through the ksqlDB
//! server otherwise (which can inspect but not create topics).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tracing::{info, warn};
use tumbler_ksql::{
    KsqlRestClient, MemoryEngine, RestProxyTopicAdmin, StatementExecutor, TopicAdmin,
};
use tumbler_orchestrator::{ExecutionResult, Orchestrator, OrchestratorConfig};
use tumbler_sql::QueryModel;

use crate::config::Config;
use crate::format::Formatter;
use crate::query_file::QueryFile;

#[derive(Args)]
pub struct ApplyArgs {
    /// Query declaration files (TOML, or JSON by extension)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Only apply the query with this name
    #[arg(short, long)]
    pub query: Option<String>,

    /// Run against an in-process engine instead of the server
    #[arg(long)]
    pub dry_run: bool,

    /// Per-pipeline deadline in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize, Tabled)]
pub struct ResultRow {
    #[tabled(rename = "Entity")]
    pub entity: String,
    #[tabled(rename = "Role")]
    pub role: String,
    #[tabled(rename = "Query ID")]
    pub query_id: String,
    #[tabled(rename = "Attempts")]
    pub attempts: u32,
    #[tabled(rename = "Message")]
    pub message: String,
}

impl From<&ExecutionResult> for ResultRow {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            entity: result.entity.clone(),
            role: result.role.to_string(),
            query_id: result
                .query
                .as_ref()
                .map(|q| q.query_id.clone())
                .unwrap_or_else(|| "-".to_string()),
            attempts: result.attempts,
            message: result.response.message.clone(),
        }
    }
}

#[derive(Serialize)]
struct QueryOutcome {
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<ExecutionResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn handle_apply(args: ApplyArgs, config: &Config, formatter: &Formatter) -> Result<()> {
    let file = QueryFile::load_all(&args.files)?;
    let queries: Vec<QueryModel> = file
        .select(args.query.as_deref())?
        .into_iter()
        .cloned()
        .collect();

    let mut orchestrator_config = config.orchestrator.clone();
    if let Some(timeout_ms) = args.timeout_ms {
        orchestrator_config.pipeline_timeout_ms = Some(timeout_ms);
    }

    let orchestrator = if args.dry_run {
        dry_run_orchestrator(&file, orchestrator_config).await?
    } else {
        server_orchestrator(config, orchestrator_config)?
    };
    for source in &file.sources {
        orchestrator.register_source(source.clone());
    }

    info!(queries = queries.len(), dry_run = args.dry_run, "Applying queries");
    let results = tokio::select! {
        results = orchestrator.initialize_all(&queries) => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            anyhow::bail!("Interrupted before all pipelines were initialized");
        }
    };

    let mut outcomes = Vec::with_capacity(queries.len());
    let mut failed = 0;
    for (query, result) in queries.iter().zip(results) {
        match result {
            Ok(results) => {
                if !formatter.is_json() {
                    formatter.print_list(results.iter().map(ResultRow::from).collect())?;
                    formatter.print_success(&format!(
                        "{}: {} entities initialized",
                        query.name,
                        results.len()
                    ));
                }
                outcomes.push(QueryOutcome {
                    query: query.name.clone(),
                    results: Some(results),
                    error: None,
                });
            }
            Err(err) => {
                failed += 1;
                if !formatter.is_json() {
                    formatter.print_error(&format!("{}: {}", query.name, err));
                }
                outcomes.push(QueryOutcome {
                    query: query.name.clone(),
                    results: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    if formatter.is_json() {
        formatter.print_json(&outcomes)?;
    }
    if failed > 0 {
        anyhow::bail!("{} of {} pipelines failed", failed, queries.len());
    }
    Ok(())
}

fn server_orchestrator(
    config: &Config,
    orchestrator_config: OrchestratorConfig,
) -> Result<Orchestrator> {
    let client = Arc::new(KsqlRestClient::new(config.ksql_url.clone())?);
    let topics: Arc<dyn TopicAdmin> = match (&config.rest_proxy_url, &config.cluster_id) {
        (Some(url), Some(cluster_id)) => {
            Arc::new(RestProxyTopicAdmin::new(url.clone(), cluster_id.clone())?)
        }
        (Some(_), None) => {
            warn!("rest_proxy_url is set without cluster_id; using the ksqlDB server for topics");
            client.clone()
        }
        _ => client.clone(),
    };
    let executor: Arc<dyn StatementExecutor> = client;
    Ok(Orchestrator::new(executor, topics, orchestrator_config))
}

/// An orchestrator over a fresh in-process engine with the declared sources
/// already created. Stabilization is reduced to a single observation.
async fn dry_run_orchestrator(
    file: &QueryFile,
    mut orchestrator_config: OrchestratorConfig,
) -> Result<Orchestrator> {
    let engine = MemoryEngine::new().with_service(
        &orchestrator_config.service_id,
        &orchestrator_config.persistent_query_prefix,
    );
    for source in &file.sources {
        let partitions = source
            .partitions
            .unwrap_or(orchestrator_config.default_partitions);
        engine.add_topic(&source.topic, partitions).await;
        let statement = format!(
            "CREATE {} {} WITH (KAFKA_TOPIC='{}', PARTITIONS={});",
            source.shape.keyword(),
            source.name,
            source.topic,
            partitions
        );
        let response = engine.execute(&statement).await?;
        if !response.success {
            anyhow::bail!("Failed to declare source {}: {}", source.name, response.message);
        }
    }

    orchestrator_config.required_running_observations = 1;
    orchestrator_config.running_poll_interval_ms = 0;
    orchestrator_config.stability_delay_ms = 0;
    orchestrator_config.query_lookup_interval_ms = 0;
    orchestrator_config.internal_topic_poll_interval_ms = 0;

    let engine = Arc::new(engine);
    Ok(Orchestrator::new(engine.clone(), engine, orchestrator_config))
}
