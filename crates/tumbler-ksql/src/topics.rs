//! Topic administration seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: u32,
}

/// Describe and create topics on the log underneath the engine.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// `Ok(None)` when the topic does not exist.
    async fn try_get_topic_metadata(&self, name: &str) -> Result<Option<TopicMetadata>>;

    async fn create_topic(&self, name: &str, partitions: u32, replication_factor: u16)
        -> Result<()>;
}

/// Internal topics the engine creates for a windowed aggregation query:
/// the group-by repartition topic and the materialization changelog.
pub fn internal_topic_names(service_id: &str, query_prefix: &str, query_id: &str) -> [String; 2] {
    let stem = format!("_confluent-ksql-{}{}{}", service_id, query_prefix, query_id);
    [
        format!("{}-Aggregate-GroupBy-repartition", stem),
        format!("{}-Aggregate-Materialize-changelog", stem),
    ]
}
