//! Engine adapters for the rollup orchestrator
//!
//! Everything here talks to, or stands in for, the remote streaming SQL
//! engine and the log underneath it:
//!
//! - [`StatementExecutor`] and [`TopicAdmin`]: the async seams the
//!   orchestrator depends on
//! - [`KsqlRestClient`]: ksqlDB `/ksql` endpoint
//! - [`RestProxyTopicAdmin`]: Kafka REST proxy v3 topic administration
//! - [`MemoryEngine`]: in-memory engine for tests and dry runs
//! - [`show_queries`]: parsing of the `SHOW QUERIES` listing
//! - [`classify`]: success / already-exists / transient / permanent
//! - [`retry_with_backoff`]: exponential backoff over [`Retryable`] errors

pub mod error;
pub mod executor;
pub mod memory;
pub mod response;
pub mod rest;
pub mod rest_proxy;
pub mod retry;
pub mod show_queries;
pub mod topics;

pub use error::{KsqlError, Result};
pub use executor::{ExecuteResponse, StatementExecutor};
pub use memory::MemoryEngine;
pub use response::{classify, classify_response, ResponseClass};
pub use rest::KsqlRestClient;
pub use rest_proxy::RestProxyTopicAdmin;
pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
pub use show_queries::{find_query_id, QueryRow};
pub use topics::{internal_topic_names, TopicAdmin, TopicMetadata};
