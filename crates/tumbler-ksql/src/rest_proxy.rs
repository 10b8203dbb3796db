//! Kafka REST proxy (v3) topic administration

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{KsqlError, Result};
use crate::topics::{TopicAdmin, TopicMetadata};

#[derive(Serialize)]
struct CreateTopicRequest<'a> {
    topic_name: &'a str,
    partitions_count: u32,
    replication_factor: u16,
}

#[derive(Deserialize)]
struct PartitionList {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Topic admin over `GET/POST /v3/clusters/{cluster_id}/topics`.
pub struct RestProxyTopicAdmin {
    base_url: String,
    cluster_id: String,
    client: Client,
}

impl RestProxyTopicAdmin {
    pub fn new(base_url: impl Into<String>, cluster_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| KsqlError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cluster_id: cluster_id.into(),
            client,
        })
    }

    fn topics_url(&self) -> String {
        format!("{}/v3/clusters/{}/topics", self.base_url, self.cluster_id)
    }
}

#[async_trait]
impl TopicAdmin for RestProxyTopicAdmin {
    async fn try_get_topic_metadata(&self, name: &str) -> Result<Option<TopicMetadata>> {
        let url = format!("{}/{}/partitions", self.topics_url(), name);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(topic = %name, "Topic not found");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KsqlError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let list: PartitionList = response.json().await?;
        Ok(Some(TopicMetadata {
            name: name.to_string(),
            partitions: list.data.len() as u32,
        }))
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.topics_url())
            .json(&CreateTopicRequest {
                topic_name: name,
                partitions_count: partitions,
                replication_factor,
            })
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            info!(topic = %name, partitions, replication_factor, "Created topic");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        // lost a race with the engine creating the same topic
        if status == StatusCode::CONFLICT || body.to_lowercase().contains("already exists") {
            debug!(topic = %name, "Topic already exists");
            return Ok(());
        }
        Err(KsqlError::TopicAdmin(format!(
            "failed to create topic '{}': HTTP {}: {}",
            name,
            status.as_u16(),
            body
        )))
    }
}
