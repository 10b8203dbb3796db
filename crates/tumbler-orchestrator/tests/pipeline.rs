//! Pipeline runs against the in-memory engine.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tumbler_ksql::{ExecuteResponse, MemoryEngine, StatementExecutor};
use tumbler_orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
use tumbler_sql::expr::{AggregateFunc, BinaryOp, Expr};
use tumbler_sql::model::{Projection, SourceRef, SqlType};
use tumbler_sql::{EntityDescriptor, EntityRole, EntityShape, FieldDescriptor, QueryModel, Timeframe};

fn ticks() -> EntityDescriptor {
    EntityDescriptor::source(
        "ticks",
        "ticks",
        EntityShape::Stream,
        vec![
            FieldDescriptor::key("Broker", SqlType::Varchar),
            FieldDescriptor::value("Symbol", SqlType::Varchar),
            FieldDescriptor::value("Bid", SqlType::Double),
        ],
    )
}

fn ohlc(name: &str, windows: &[&str]) -> QueryModel {
    let mut q = QueryModel::new(name, SourceRef::new("ticks", "t"));
    q.windows = Some(windows.iter().map(|w| w.parse().unwrap()).collect());
    q.base_unit_seconds = Some(1);
    q.group_by = vec![Expr::col("t", "Broker"), Expr::col("t", "Symbol")];
    q.projection = vec![
        Projection::new(Expr::col("t", "Broker"), "Broker"),
        Projection::new(Expr::col("t", "Symbol"), "Symbol"),
        Projection::new(Expr::WindowStart, "BucketStart"),
        Projection::new(Expr::agg(AggregateFunc::EarliestByOffset, Expr::col("t", "Bid")), "Open"),
        Projection::new(Expr::agg(AggregateFunc::Max, Expr::col("t", "Bid")), "High"),
        Projection::new(Expr::agg(AggregateFunc::Min, Expr::col("t", "Bid")), "Low"),
        Projection::new(Expr::agg(AggregateFunc::LatestByOffset, Expr::col("t", "Bid")), "Close"),
    ];
    q
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
        query_lookup_attempts: 3,
        query_lookup_interval_ms: 10,
        internal_topic_timeout_ms: 5_000,
        internal_topic_poll_interval_ms: 100,
        internal_topic_create_grace_ms: 1_000,
        running_poll_interval_ms: 100,
        running_timeout_ms: 2_000,
        stability_delay_ms: 500,
        ..Default::default()
    }
}

async fn setup(engine: MemoryEngine, config: OrchestratorConfig) -> (Arc<MemoryEngine>, Orchestrator) {
    let engine = Arc::new(engine);
    engine.add_topic("ticks", 3).await;
    let orchestrator = Orchestrator::new(engine.clone(), engine.clone(), config);
    orchestrator.register_source(ticks());
    (engine, orchestrator)
}

fn count_containing(statements: &[String], needle: &str) -> usize {
    statements.iter().filter(|s| s.contains(needle)).count()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn initializes_hub_pair_then_live_tiers() {
    let (_engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    let results = orchestrator.initialize(&ohlc("bar", &["5m", "1m"])).await.unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.entity.as_str()).collect();
    assert_eq!(ids, vec!["bar_1s_final", "bar_1s_final_s", "bar_1m_live", "bar_5m_live"]);

    let hub = &results[0].query.as_ref().unwrap();
    assert!(hub.stabilized);
    assert_eq!(hub.partitions, Some(3));
    assert_eq!(hub.internal_topics.len(), 2);

    assert!(results[1].query.is_none());
    assert_eq!(results[1].input_topic_override.as_deref(), Some("bar_1s_final"));

    for live in &results[2..] {
        assert_eq!(live.role, EntityRole::Live);
        assert!(live.ddl.contains("FROM bar_1s_final_s"));
        assert!(live.query.as_ref().unwrap().stabilized);
        assert_eq!(live.attempts, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn registers_descriptors_by_timeframe() {
    let (_engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    orchestrator.initialize(&ohlc("bar", &["1m", "1h"])).await.unwrap();

    let registry = orchestrator.registry();
    let hour: Timeframe = "1h".parse().unwrap();
    let live = registry.by_timeframe("bar", &hour, EntityRole::Live).unwrap();
    assert_eq!(live.name, "bar_1h_live");
    assert_eq!(live.bucket_column.as_deref(), Some("BucketStart"));
    assert!(live.field("Broker").unwrap().is_key);

    let labels: Vec<String> = registry.timeframes("bar").iter().map(|t| t.to_string()).collect();
    assert_eq!(labels, vec!["1m", "1h"]);
}

#[tokio::test(start_paused = true)]
async fn reinitialization_is_idempotent() {
    let (engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    let query = ohlc("bar", &["1m", "5m"]);
    let first = orchestrator.initialize(&query).await.unwrap();
    let second = orchestrator.initialize(&query).await.unwrap();

    assert_eq!(first.len(), second.len());
    assert!(!second[0].response.success);
    assert!(second[0].response.message.contains("already exists"));
    assert_eq!(engine.queries().await.len(), 3);
    assert_eq!(
        first[2].query.as_ref().map(|q| &q.query_id),
        second[2].query.as_ref().map(|q| &q.query_id)
    );
}

#[tokio::test(start_paused = true)]
async fn fill_mode_runs_every_tier() {
    let (_engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    let mut query = ohlc("bar", &["1m", "5m"]);
    query.fill_missing = true;
    let results = orchestrator.initialize(&query).await.unwrap();

    let roles: Vec<EntityRole> = results.iter().map(|r| r.role).collect();
    assert_eq!(
        roles,
        vec![
            EntityRole::HubTable,
            EntityRole::HubStream,
            EntityRole::Live,
            EntityRole::Heartbeat,
            EntityRole::PrevBucket,
            EntityRole::Fill,
            EntityRole::Live,
            EntityRole::Heartbeat,
            EntityRole::Fill,
        ]
    );

    let heartbeat = results.iter().find(|r| r.entity == "bar_1m_hb").unwrap();
    assert!(heartbeat.query.as_ref().unwrap().stabilized);
    // joins must reach RUNNING but build no aggregation state
    for id in ["bar_1m_prev", "bar_1m_fill", "bar_5m_fill"] {
        let join = results.iter().find(|r| r.entity == id).unwrap();
        let join_query = join.query.as_ref().unwrap();
        assert!(join_query.stabilized, "{} should be stabilized", id);
        assert!(join_query.internal_topics.is_empty());
        assert_eq!(join_query.partitions, None);
    }
}

#[tokio::test(start_paused = true)]
async fn direct_insert_is_not_duplicated() {
    let (engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    let mut query = QueryModel::new("eur_ticks", SourceRef::new("ticks", "t"));
    query.filter = Some(Expr::binary(
        Expr::col("t", "Symbol"),
        BinaryOp::Eq,
        Expr::string("EURUSD"),
    ));
    query.projection = vec![
        Projection::new(Expr::col("t", "Broker"), "Broker"),
        Projection::new(Expr::col("t", "Bid"), "Bid"),
    ];

    let first = orchestrator.initialize(&query).await.unwrap();
    orchestrator.initialize(&query).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first[0].role, EntityRole::Direct);
    let statements = engine.statements().await;
    assert_eq!(count_containing(&statements, "CREATE STREAM eur_ticks"), 2);
    assert_eq!(count_containing(&statements, "INSERT INTO eur_ticks"), 1);
    assert_eq!(engine.queries().await.len(), 1);
}

// ============================================================================
// Submission failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn transient_rejection_is_retried() {
    let (engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    engine
        .reject("bar_5m_live", "Timeout while waiting for command topic consumer", 2)
        .await;

    orchestrator.initialize(&ohlc("bar", &["1m", "5m"])).await.unwrap();
    let statements = engine.statements().await;
    assert_eq!(count_containing(&statements, "CREATE TABLE bar_5m_live"), 3);
    assert!(engine.has_object("bar_5m_live").await);
}

#[tokio::test(start_paused = true)]
async fn permanent_rejection_fails_fast() {
    let (engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    engine
        .reject("bar_1m_live", "line 1:1: mismatched input 'CREAT'", 1)
        .await;

    let err = orchestrator
        .initialize(&ohlc("bar", &["1m"]))
        .await
        .unwrap_err();
    match err {
        OrchestratorError::PermanentEngine {
            entity,
            statement,
            message,
        } => {
            assert_eq!(entity, "bar_1m_live");
            assert!(statement.starts_with("CREATE TABLE bar_1m_live"));
            assert!(message.contains("mismatched input"));
        }
        other => panic!("unexpected error: {other}"),
    }
    let statements = engine.statements().await;
    assert_eq!(count_containing(&statements, "CREATE TABLE bar_1m_live"), 1);
    assert!(orchestrator.registry().contains("bar_1s_final"));
    assert!(!orchestrator.registry().contains("bar_1m_live"));
}

#[tokio::test(start_paused = true)]
async fn planning_errors_precede_remote_calls() {
    let (engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    let mut query = ohlc("bar", &["1m"]);
    query.base_unit_seconds = Some(7);

    let err = orchestrator.initialize(&query).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Planning(_)));
    assert!(engine.statements().await.is_empty());
}

// ============================================================================
// Stabilization
// ============================================================================

#[tokio::test(start_paused = true)]
async fn unstable_query_is_terminated_and_resubmitted() {
    let (engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    engine.fail_queries("bar_1m_live", 1).await;

    let results = orchestrator.initialize(&ohlc("bar", &["1m"])).await.unwrap();
    let live = results.iter().find(|r| r.entity == "bar_1m_live").unwrap();
    assert_eq!(live.attempts, 2);
    assert!(live.query.as_ref().unwrap().stabilized);

    let statements = engine.statements().await;
    assert_eq!(count_containing(&statements, "TERMINATE CTAS_BAR_1M_LIVE_"), 1);
    assert_eq!(count_containing(&statements, "DROP TABLE bar_1m_live;"), 1);
    assert_eq!(count_containing(&statements, "CREATE TABLE bar_1m_live"), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_raise_initialization_error() {
    let (engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    engine.fail_queries("bar_1m_live", 10).await;

    let err = orchestrator
        .initialize(&ohlc("bar", &["1m"]))
        .await
        .unwrap_err();
    match err {
        OrchestratorError::Initialization {
            entity,
            attempts,
            statement,
            message,
        } => {
            assert_eq!(entity, "bar_1m_live");
            assert_eq!(attempts, 3);
            assert!(statement.contains("GRACE PERIOD 2 SECONDS"));
            assert!(message.contains("not running"));
        }
        other => panic!("unexpected error: {other}"),
    }
    let statements = engine.statements().await;
    assert_eq!(count_containing(&statements, "TERMINATE "), 2);
}

#[tokio::test(start_paused = true)]
async fn fill_query_in_error_is_not_accepted() {
    let (engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    engine.fail_queries("bar_1m_fill", 10).await;
    let mut query = ohlc("bar", &["1m"]);
    query.fill_missing = true;

    let err = orchestrator.initialize(&query).await.unwrap_err();
    match err {
        OrchestratorError::Initialization {
            entity,
            attempts,
            message,
            ..
        } => {
            assert_eq!(entity, "bar_1m_fill");
            assert_eq!(attempts, 3);
            assert!(message.contains("not running"));
        }
        other => panic!("unexpected error: {other}"),
    }
    let statements = engine.statements().await;
    assert_eq!(count_containing(&statements, "TERMINATE CTAS_BAR_1M_FILL_"), 2);
    assert!(orchestrator.registry().contains("bar_1m_prev"));
    assert!(!orchestrator.registry().contains("bar_1m_fill"));
}

#[tokio::test(start_paused = true)]
async fn failed_prev_and_fill_queries_recover_on_retry() {
    let (engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    engine.fail_queries("bar_1m_prev", 1).await;
    engine.fail_queries("bar_1m_fill", 1).await;
    let mut query = ohlc("bar", &["1m"]);
    query.fill_missing = true;

    let results = orchestrator.initialize(&query).await.unwrap();
    for id in ["bar_1m_prev", "bar_1m_fill"] {
        let result = results.iter().find(|r| r.entity == id).unwrap();
        assert_eq!(result.attempts, 2, "{} should need a second attempt", id);
        assert!(result.query.as_ref().unwrap().stabilized);
    }

    let statements = engine.statements().await;
    assert_eq!(count_containing(&statements, "TERMINATE CTAS_BAR_1M_PREV_"), 1);
    assert_eq!(count_containing(&statements, "TERMINATE CTAS_BAR_1M_FILL_"), 1);
    assert_eq!(count_containing(&statements, "DROP TABLE bar_1m_fill;"), 1);
    assert_eq!(count_containing(&statements, "CREATE TABLE bar_1m_fill"), 2);
}

#[tokio::test(start_paused = true)]
async fn query_leaving_running_after_stabilizing_fails() {
    let mut config = fast_config();
    config.max_entity_attempts = 1;
    let (engine, orchestrator) = setup(MemoryEngine::new(), config).await;
    // one listing to locate the query, three observations, then the recheck
    engine
        .script_statuses("bar_1m_live", &["RUNNING", "RUNNING", "RUNNING", "RUNNING", "ERROR"])
        .await;

    let err = orchestrator
        .initialize(&ohlc("bar", &["1m"]))
        .await
        .unwrap_err();
    match err {
        OrchestratorError::Initialization {
            entity,
            attempts,
            message,
            ..
        } => {
            assert_eq!(entity, "bar_1m_live");
            assert_eq!(attempts, 1);
            assert!(message.contains("flapped to ERROR"), "{}", message);
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Hides the queries writing one sink from `SHOW QUERIES`.
struct HiddenSink {
    inner: Arc<MemoryEngine>,
    sink: &'static str,
}

#[async_trait]
impl StatementExecutor for HiddenSink {
    async fn execute(&self, statement: &str) -> tumbler_ksql::Result<ExecuteResponse> {
        self.inner.execute(statement).await
    }

    async fn show_queries(&self) -> tumbler_ksql::Result<String> {
        let listing = self.inner.show_queries().await?;
        Ok(listing
            .lines()
            .filter(|line| !line.contains(self.sink))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[tokio::test(start_paused = true)]
async fn unlisted_query_is_left_unstabilized() {
    let engine = Arc::new(MemoryEngine::new());
    engine.add_topic("ticks", 3).await;
    let executor = Arc::new(HiddenSink {
        inner: engine.clone(),
        sink: "BAR_1M_LIVE",
    });
    let orchestrator = Orchestrator::new(executor, engine.clone(), fast_config());
    orchestrator.register_source(ticks());

    let results = orchestrator.initialize(&ohlc("bar", &["1m"])).await.unwrap();
    let live = results.iter().find(|r| r.entity == "bar_1m_live").unwrap();
    assert!(live.query.is_none());
    assert_eq!(live.attempts, 1);
    assert!(results[0].query.as_ref().unwrap().stabilized);
    assert!(orchestrator.registry().contains("bar_1m_live"));
    assert!(engine.has_object("bar_1m_live").await);
}

#[tokio::test(start_paused = true)]
async fn missing_internal_topics_are_created() {
    let (engine, orchestrator) =
        setup(MemoryEngine::new().without_internal_topics(), fast_config()).await;
    let results = orchestrator.initialize(&ohlc("bar", &["1m"])).await.unwrap();

    let created = engine.created_topics().await;
    assert_eq!(created.len(), 4);
    assert!(created
        .iter()
        .all(|t| t.starts_with("_confluent-ksql-default_query_")));
    assert_eq!(
        results[0].query.as_ref().unwrap().internal_topics,
        created[..2].to_vec()
    );
}

#[tokio::test(start_paused = true)]
async fn internal_topics_never_appearing_time_out() {
    let mut config = fast_config();
    // creation would only happen after the timeout
    config.internal_topic_create_grace_ms = 60_000;
    config.max_entity_attempts = 1;
    let (_engine, orchestrator) = setup(MemoryEngine::new().without_internal_topics(), config).await;

    let err = orchestrator
        .initialize(&ohlc("bar", &["1m"]))
        .await
        .unwrap_err();
    match err {
        OrchestratorError::Initialization { entity, message, .. } => {
            assert_eq!(entity, "bar_1s_final");
            assert!(message.contains("Aggregate-GroupBy-repartition is missing"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Deadlines, cancellation and concurrency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn pipeline_deadline() {
    let mut config = fast_config();
    config.pipeline_timeout_ms = Some(1_000);
    let (engine, orchestrator) = setup(MemoryEngine::new(), config).await;
    engine.fail_queries("bar_1s_final", 10).await;

    let err = orchestrator
        .initialize(&ohlc("bar", &["1m"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::DeadlineExceeded { timeout_ms: 1_000, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_mid_poll() {
    let (_engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    let (tx, rx) = oneshot::channel();
    tx.send(()).unwrap();

    let err = orchestrator
        .initialize_until(&ohlc("bar", &["1m"]), rx)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Cancelled(name) if name == "bar"));
}

#[tokio::test(start_paused = true)]
async fn dropped_shutdown_sender_does_not_cancel() {
    let (_engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    let (tx, rx) = oneshot::channel::<()>();
    drop(tx);

    let results = orchestrator
        .initialize_until(&ohlc("bar", &["1m"]), rx)
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn independent_pipelines_run_concurrently() {
    let (_engine, orchestrator) = setup(MemoryEngine::new(), fast_config()).await;
    let queries = vec![ohlc("bar", &["1m"]), ohlc("quote", &["5m"])];

    let outcomes = orchestrator.initialize_all(&queries).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert!(orchestrator.registry().contains("bar_1m_live"));
    assert!(orchestrator.registry().contains("quote_5m_live"));
}
