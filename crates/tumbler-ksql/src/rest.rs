//! ksqlDB REST client
//!
//! Statements go to `POST /ksql`. Rejections come back as 4xx/5xx with a JSON
//! body carrying the engine's `message`; those become unsuccessful
//! [`ExecuteResponse`]s rather than errors so the caller can classify them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{KsqlError, Result};
use crate::executor::{ExecuteResponse, StatementExecutor};
use crate::show_queries::{normalize_identifier, render_table, QueryRow};
use crate::topics::{TopicAdmin, TopicMetadata};

const KSQL_CONTENT_TYPE: &str = "application/vnd.ksql.v1+json; charset=utf-8";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KsqlRequest<'a> {
    ksql: &'a str,
    streams_properties: Map<String, Value>,
}

/// REST client for a ksqlDB server
pub struct KsqlRestClient {
    base_url: String,
    client: Client,
}

impl KsqlRestClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KsqlError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_ksql(&self, statement: &str) -> Result<(StatusCode, String)> {
        let url = format!("{}/ksql", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, KSQL_CONTENT_TYPE)
            .json(&KsqlRequest {
                ksql: statement,
                streams_properties: Map::new(),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "ksql response");
        Ok((status, body))
    }
}

#[async_trait]
impl StatementExecutor for KsqlRestClient {
    async fn execute(&self, statement: &str) -> Result<ExecuteResponse> {
        let (status, body) = self.post_ksql(statement).await?;
        let parsed: Option<Value> = serde_json::from_str(&body).ok();
        if status.is_success() {
            let value = parsed.ok_or_else(|| KsqlError::Decode(body.clone()))?;
            return Ok(ExecuteResponse::ok(describe_entities(&value)));
        }

        match parsed.as_ref().and_then(error_message) {
            Some(message) => Ok(ExecuteResponse::failed(message)),
            None => Err(KsqlError::Http {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

/// Topic metadata through `SHOW TOPICS`, for deployments without a REST
/// proxy. Topics cannot be created this way.
#[async_trait]
impl TopicAdmin for KsqlRestClient {
    async fn try_get_topic_metadata(&self, name: &str) -> Result<Option<TopicMetadata>> {
        let (status, body) = self.post_ksql("SHOW TOPICS;").await?;
        if !status.is_success() {
            return Err(KsqlError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let value: Value = serde_json::from_str(&body)?;
        Ok(find_topic(&value, name))
    }

    async fn create_topic(
        &self,
        name: &str,
        _partitions: u32,
        _replication_factor: u16,
    ) -> Result<()> {
        Err(KsqlError::TopicAdmin(format!(
            "cannot create topic '{}' without a REST proxy",
            name
        )))
    }
}

/// Look `name` up in a `SHOW TOPICS` response. `replicaInfo` holds one entry
/// per partition.
fn find_topic(value: &Value, name: &str) -> Option<TopicMetadata> {
    let entities: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    entities
        .into_iter()
        .filter_map(|e| e.get("topics").and_then(Value::as_array))
        .flatten()
        .find(|t| t.get("name").and_then(Value::as_str) == Some(name))
        .map(|t| TopicMetadata {
            name: name.to_string(),
            partitions: t
                .get("replicaInfo")
                .and_then(Value::as_array)
                .map(|r| r.len() as u32)
                .unwrap_or(0),
        })
}

/// `message` of an engine error body.
fn error_message(value: &Value) -> Option<String> {
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Turn a successful `/ksql` response into the message text callers see.
///
/// Query listings render as a pipe-delimited table; command results yield the
/// command status message.
pub fn describe_entities(value: &Value) -> String {
    let entities: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut parts = Vec::new();
    for entity in entities {
        if let Some(queries) = entity.get("queries").and_then(Value::as_array) {
            let rows: Vec<QueryRow> = queries.iter().map(query_row).collect();
            parts.push(render_table(&rows));
        } else if let Some(message) = entity
            .pointer("/commandStatus/message")
            .and_then(Value::as_str)
        {
            parts.push(message.to_string());
        } else if let Some(kind) = entity.get("@type").and_then(Value::as_str) {
            parts.push(kind.to_string());
        }
    }
    parts.join("\n")
}

fn query_row(query: &Value) -> QueryRow {
    let text = |key: &str| {
        query
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let topics = query
        .get("sinkKafkaTopics")
        .or_else(|| query.get("sinks"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(normalize_identifier)
                .collect()
        })
        .unwrap_or_default();
    let status = query
        .get("state")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            query
                .get("statusCount")
                .and_then(Value::as_object)
                .and_then(|counts| counts.keys().next().cloned())
        })
        .unwrap_or_else(|| "UNKNOWN".to_string());

    QueryRow {
        id: text("id"),
        topics,
        statement: text("queryString"),
        status,
    }
}
