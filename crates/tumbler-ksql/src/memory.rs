//! In-memory engine
//!
//! Simulates just enough of a ksqlDB server and its topics to exercise the
//! orchestration pipeline without a cluster: objects, persistent queries,
//! sink and internal topics, idempotent-conflict messages, and scripted
//! failures. Used by tests and by `tumblerctl apply --dry-run`.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{KsqlError, Result};
use crate::executor::{ExecuteResponse, StatementExecutor};
use crate::show_queries::{normalize_identifier, render_table, QueryRow};
use crate::topics::{internal_topic_names, TopicAdmin, TopicMetadata};

#[derive(Debug, Default)]
struct EngineState {
    /// object name -> (kind, topic)
    objects: BTreeMap<String, (ObjectKind, String)>,
    topics: BTreeMap<String, u32>,
    queries: Vec<QueryRow>,
    statements: Vec<String>,
    created_topics: Vec<String>,
    next_query: u32,
    /// statement pattern -> (message, remaining)
    rejections: Vec<(String, String, usize)>,
    /// sink topic -> number of future queries that start in ERROR
    failing_queries: HashMap<String, usize>,
    /// sink topic -> statuses reported by the next listings
    status_scripts: HashMap<String, VecDeque<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Stream,
    Table,
}

impl ObjectKind {
    fn noun(self) -> &'static str {
        match self {
            ObjectKind::Stream => "stream",
            ObjectKind::Table => "table",
        }
    }
}

/// Fake engine implementing both [`StatementExecutor`] and [`TopicAdmin`].
pub struct MemoryEngine {
    service_id: String,
    query_prefix: String,
    default_partitions: u32,
    create_internal_topics: bool,
    state: Mutex<EngineState>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            service_id: "default_".to_string(),
            query_prefix: "query_".to_string(),
            default_partitions: 1,
            create_internal_topics: true,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn with_service(mut self, service_id: &str, query_prefix: &str) -> Self {
        self.service_id = service_id.to_string();
        self.query_prefix = query_prefix.to_string();
        self
    }

    /// Leave internal topic creation to the caller.
    pub fn without_internal_topics(mut self) -> Self {
        self.create_internal_topics = false;
        self
    }

    pub async fn add_topic(&self, name: &str, partitions: u32) {
        self.state.lock().await.topics.insert(name.to_string(), partitions);
    }

    /// Reject the next `times` statements containing `pattern`.
    pub async fn reject(&self, pattern: &str, message: &str, times: usize) {
        self.state.lock().await.rejections.push((
            pattern.to_uppercase(),
            message.to_string(),
            times,
        ));
    }

    /// Start the next `times` queries writing `topic` in the ERROR state.
    pub async fn fail_queries(&self, topic: &str, times: usize) {
        self.state
            .lock()
            .await
            .failing_queries
            .insert(normalize_identifier(topic), times);
    }

    /// Report the given statuses, one per `SHOW QUERIES`, for the queries
    /// writing `topic`. The last scripted status sticks.
    pub async fn script_statuses(&self, topic: &str, statuses: &[&str]) {
        self.state.lock().await.status_scripts.insert(
            normalize_identifier(topic),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub async fn statements(&self) -> Vec<String> {
        self.state.lock().await.statements.clone()
    }

    pub async fn queries(&self) -> Vec<QueryRow> {
        self.state.lock().await.queries.clone()
    }

    pub async fn has_object(&self, name: &str) -> bool {
        self.state
            .lock()
            .await
            .objects
            .contains_key(&normalize_identifier(name))
    }

    /// Topics created through [`TopicAdmin::create_topic`].
    pub async fn created_topics(&self) -> Vec<String> {
        self.state.lock().await.created_topics.clone()
    }

    fn apply(&self, state: &mut EngineState, statement: &str) -> ExecuteResponse {
        let upper = statement
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();

        if let Some(idx) = state
            .rejections
            .iter()
            .position(|(pattern, _, remaining)| *remaining > 0 && upper.contains(pattern.as_str()))
        {
            let rule = &mut state.rejections[idx];
            rule.2 -= 1;
            return ExecuteResponse::failed(rule.1.clone());
        }

        let words: Vec<&str> = upper.split_whitespace().collect();
        match words.as_slice() {
            ["SHOW", "QUERIES", ..] | ["SHOW", "QUERIES;", ..] => {
                advance_status_scripts(state);
                ExecuteResponse::ok(render_table(&state.queries))
            }
            ["TERMINATE", id, ..] => {
                let id = id.trim_end_matches(';');
                let before = state.queries.len();
                state.queries.retain(|q| !q.id.eq_ignore_ascii_case(id));
                if state.queries.len() < before {
                    ExecuteResponse::ok("Query terminated.")
                } else {
                    ExecuteResponse::failed(format!("Unknown queryId: {}", id))
                }
            }
            ["DROP", _, name, ..] => {
                let name = object_name(name);
                match state.objects.remove(&name) {
                    Some((kind, _)) => {
                        ExecuteResponse::ok(format!("Dropped {} {}", kind.noun(), name))
                    }
                    None => ExecuteResponse::failed(format!("Source {} does not exist.", name)),
                }
            }
            ["CREATE", kind @ ("TABLE" | "STREAM"), name, ..] => {
                let kind = if *kind == "TABLE" {
                    ObjectKind::Table
                } else {
                    ObjectKind::Stream
                };
                self.create(state, kind, &object_name(name), &upper)
            }
            ["INSERT", "INTO", name, ..] => {
                let name = object_name(name);
                let Some((_, topic)) = state.objects.get(&name).cloned() else {
                    return ExecuteResponse::failed(format!("{} does not exist.", name));
                };
                self.start_query(state, "INSERTQUERY", &topic, &upper, false);
                ExecuteResponse::ok("Created query")
            }
            _ => ExecuteResponse::ok("OK"),
        }
    }

    fn create(
        &self,
        state: &mut EngineState,
        kind: ObjectKind,
        name: &str,
        upper: &str,
    ) -> ExecuteResponse {
        if let Some((existing, _)) = state.objects.get(name) {
            return ExecuteResponse::failed(format!(
                "Cannot add {} '{}': A {} with the same name already exists",
                kind.noun(),
                name,
                existing.noun()
            ));
        }
        let topic = property(upper, "KAFKA_TOPIC")
            .unwrap_or_else(|| name.to_string())
            .to_lowercase();
        let inherited = source_partitions(state, upper);
        let partitions = property(upper, "PARTITIONS")
            .and_then(|p| p.parse().ok())
            .or(inherited)
            .unwrap_or(self.default_partitions);
        state.objects.insert(name.to_string(), (kind, topic.clone()));
        state.topics.entry(topic.clone()).or_insert(partitions);

        if upper.contains(" AS SELECT ") {
            let prefix = match kind {
                ObjectKind::Table => "CTAS",
                ObjectKind::Stream => "CSAS",
            };
            let aggregating = upper.contains(" GROUP BY ");
            self.start_query(state, prefix, &topic, upper, aggregating);
        }
        ExecuteResponse::ok(format!("{} created", capitalize(kind.noun())))
    }

    fn start_query(
        &self,
        state: &mut EngineState,
        prefix: &str,
        topic: &str,
        statement: &str,
        aggregating: bool,
    ) {
        state.next_query += 1;
        let sink = normalize_identifier(topic);
        let id = format!("{}_{}_{}", prefix, sink, state.next_query);

        let status = match state.failing_queries.get_mut(&sink) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                "ERROR"
            }
            _ => "RUNNING",
        };
        if aggregating && self.create_internal_topics {
            // repartitioning keeps the source's partition count
            let sink_partitions = state.topics.get(&topic.to_lowercase()).copied();
            let partitions = source_partitions(state, statement)
                .or(sink_partitions)
                .unwrap_or(self.default_partitions);
            for internal in internal_topic_names(&self.service_id, &self.query_prefix, &id) {
                state.topics.insert(internal, partitions);
            }
        }
        debug!(query_id = %id, status, "Started query");
        state.queries.push(QueryRow {
            id,
            topics: vec![sink],
            statement: statement.to_string(),
            status: status.to_string(),
        });
    }
}

/// Scripts only advance once a query writes their sink.
fn advance_status_scripts(state: &mut EngineState) {
    let EngineState {
        queries,
        status_scripts,
        ..
    } = state;
    for (sink, script) in status_scripts.iter_mut() {
        let mut listed = queries.iter_mut().filter(|q| q.writes_topic(sink)).peekable();
        if listed.peek().is_none() {
            continue;
        }
        let Some(status) = script.pop_front() else {
            continue;
        };
        for query in listed {
            query.status = status.clone();
        }
    }
}

/// Partitions of the topic behind the first `FROM` source, if known.
fn source_partitions(state: &EngineState, upper: &str) -> Option<u32> {
    let (_, rest) = upper.split_once(" FROM ")?;
    let source = object_name(rest.split_whitespace().next()?);
    let topic = state
        .objects
        .get(&source)
        .map(|(_, topic)| topic.clone())
        .unwrap_or_else(|| source.to_lowercase());
    state.topics.get(&topic).copied()
}

fn object_name(token: &str) -> String {
    normalize_identifier(
        token
            .split(|c: char| c == '(' || c == ';')
            .next()
            .unwrap_or_default(),
    )
}

/// Value of `KEY='value'` or `KEY=value` in a WITH clause.
fn property(upper: &str, key: &str) -> Option<String> {
    let needle = format!("{}=", key);
    let start = upper.find(&needle)? + needle.len();
    let rest = upper[start..].trim_start();
    let value: String = if let Some(quoted) = rest.strip_prefix('\'') {
        quoted.chars().take_while(|c| *c != '\'').collect()
    } else {
        rest.chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect()
    };
    (!value.is_empty()).then_some(value)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl StatementExecutor for MemoryEngine {
    async fn execute(&self, statement: &str) -> Result<ExecuteResponse> {
        let mut state = self.state.lock().await;
        state.statements.push(statement.to_string());
        Ok(self.apply(&mut state, statement))
    }
}

#[async_trait]
impl TopicAdmin for MemoryEngine {
    async fn try_get_topic_metadata(&self, name: &str) -> Result<Option<TopicMetadata>> {
        let state = self.state.lock().await;
        Ok(state
            .topics
            .get(name)
            .or_else(|| state.topics.get(&name.to_lowercase()))
            .map(|partitions| TopicMetadata {
                name: name.to_string(),
                partitions: *partitions,
            }))
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        _replication_factor: u16,
    ) -> Result<()> {
        if partitions == 0 {
            return Err(KsqlError::TopicAdmin(format!(
                "topic '{}' needs at least one partition",
                name
            )));
        }
        let mut state = self.state.lock().await;
        state.topics.entry(name.to_string()).or_insert(partitions);
        state.created_topics.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{classify_response, ResponseClass};
    use crate::show_queries::{find_query_id, parse};

    const CTAS: &str = "CREATE TABLE bar_1m_live WITH (KAFKA_TOPIC='bar_1m_live', PARTITIONS=4) \
                        AS SELECT t.Sym, COUNT(*) AS N FROM ticks t GROUP BY t.Sym EMIT CHANGES;";

    #[tokio::test]
    async fn test_create_as_select_starts_query() {
        let engine = MemoryEngine::new();
        assert!(engine.execute(CTAS).await.unwrap().success);

        let listing = engine.show_queries().await.unwrap();
        let rows = parse(&listing);
        let id = find_query_id(&rows, "BAR_1M_LIVE", None).unwrap();
        assert!(id.starts_with("CTAS_BAR_1M_LIVE_"));

        let [repartition, _] = internal_topic_names("default_", "query_", &id);
        let meta = engine.try_get_topic_metadata(&repartition).await.unwrap();
        assert_eq!(meta.map(|m| m.partitions), Some(4));
    }

    #[tokio::test]
    async fn test_second_create_already_exists() {
        let engine = MemoryEngine::new();
        engine.execute(CTAS).await.unwrap();
        let again = engine.execute(CTAS).await.unwrap();
        assert!(!again.success);
        assert_eq!(classify_response(&again), ResponseClass::AlreadyExists);
    }

    #[tokio::test]
    async fn test_terminate_and_drop() {
        let engine = MemoryEngine::new();
        engine.execute(CTAS).await.unwrap();
        let id = engine.queries().await[0].id.clone();

        assert!(engine.execute(&format!("TERMINATE {};", id)).await.unwrap().success);
        assert!(engine.queries().await.is_empty());
        assert!(engine.execute("DROP TABLE bar_1m_live;").await.unwrap().success);
        assert!(!engine.has_object("bar_1m_live").await);
        assert!(engine.execute(CTAS).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_scripted_rejection() {
        let engine = MemoryEngine::new();
        engine
            .reject("bar_1m_live", "Timeout while waiting for command topic", 1)
            .await;
        let first = engine.execute(CTAS).await.unwrap();
        assert_eq!(classify_response(&first), ResponseClass::Transient);
        assert!(engine.execute(CTAS).await.unwrap().success);
        assert_eq!(engine.statements().await.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_requires_target() {
        let engine = MemoryEngine::new();
        let response = engine
            .execute("INSERT INTO bar SELECT * FROM ticks EMIT CHANGES;")
            .await
            .unwrap();
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_status_script_plays_per_listing() {
        let engine = MemoryEngine::new();
        engine.script_statuses("bar_1m_live", &["RUNNING", "ERROR"]).await;
        let listing = engine.show_queries().await.unwrap();
        assert!(parse(&listing).is_empty());

        engine.execute(CTAS).await.unwrap();
        let statuses = [
            parse(&engine.show_queries().await.unwrap())[0].status.clone(),
            parse(&engine.show_queries().await.unwrap())[0].status.clone(),
            parse(&engine.show_queries().await.unwrap())[0].status.clone(),
        ];
        assert_eq!(statuses, ["RUNNING", "ERROR", "ERROR"]);
    }

    #[test]
    fn test_property() {
        let with = "WITH (KAFKA_TOPIC='X_Y', PARTITIONS=3)";
        assert_eq!(property(with, "KAFKA_TOPIC").as_deref(), Some("X_Y"));
        assert_eq!(property(with, "PARTITIONS").as_deref(), Some("3"));
        assert_eq!(property("WITH (VALUE_FORMAT='AVRO')", "PARTITIONS"), None);
    }
}
