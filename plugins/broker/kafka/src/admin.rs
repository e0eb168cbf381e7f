use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rdkafka::admin::{
    AdminClient, AdminOptions, AlterConfig, NewPartitions, NewTopic, ResourceSpecifier,
    TopicReplication,
};
use rdkafka::client::DefaultClientContext;
use rdkafka::metadata::Metadata;

use logbus_api::{BrokerError, ClusterAdmin, PartitionMetadata, TopicDetail, TopicMetadata};

use crate::{KafkaConfig, map_code, map_error};

/// [`ClusterAdmin`] over a librdkafka `AdminClient`.
pub struct KafkaAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
    config: KafkaConfig,
}

impl KafkaAdmin {
    pub fn new(config: KafkaConfig) -> Result<Self, BrokerError> {
        let client: AdminClient<DefaultClientContext> = config
            .client_config()
            .create()
            .map_err(|e| map_error(e, "create admin client"))?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn options(&self) -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(self.config.operation_timeout()))
    }

    async fn metadata(&self, topic: Option<String>) -> Result<Metadata, BrokerError> {
        let client = self.client.clone();
        let timeout = self.config.operation_timeout();
        tokio::task::spawn_blocking(move || {
            client
                .inner()
                .fetch_metadata(topic.as_deref(), timeout)
                .map_err(|e| map_error(e, "fetch metadata"))
        })
        .await
        .map_err(|e| BrokerError::logic(format!("metadata task failed: {e}")))?
    }

    /// Non-default config entries of `topic`.
    async fn topic_config(&self, topic: &str) -> Result<BTreeMap<String, String>, BrokerError> {
        let resource = ResourceSpecifier::Topic(topic);
        let results = self
            .client
            .describe_configs([&resource], &self.options())
            .await
            .map_err(|e| map_error(e, "describe configs"))?;
        let mut config = BTreeMap::new();
        for result in results {
            let resource = result.map_err(|code| map_code(code, &format!("describe config of '{topic}'")))?;
            for entry in resource.entries {
                if entry.is_default {
                    continue;
                }
                if let Some(value) = entry.value {
                    config.insert(entry.name, value);
                }
            }
        }
        Ok(config)
    }
}

impl ClusterAdmin for KafkaAdmin {
    fn list_topics(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, TopicDetail>, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let shapes: Vec<(String, i32, i16)> = self
                .metadata(None)
                .await?
                .topics()
                .iter()
                .filter(|t| t.error().is_none() && !t.name().starts_with("__"))
                .map(|t| {
                    let replication = t.partitions().first().map_or(0, |p| p.replicas().len());
                    (t.name().to_string(), t.partitions().len() as i32, replication as i16)
                })
                .collect();

            let mut topics = HashMap::new();
            for (name, partitions, replication_factor) in shapes {
                let config = self.topic_config(&name).await?;
                topics.insert(
                    name,
                    TopicDetail {
                        partitions,
                        replication_factor,
                        config,
                    },
                );
            }
            Ok(topics)
        })
    }

    fn describe_topics<'a>(
        &'a self,
        topics: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TopicMetadata>, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let metadata = self.metadata(None).await?;
            Ok(metadata
                .topics()
                .iter()
                .filter(|t| t.error().is_none() && topics.iter().any(|n| n == t.name()))
                .map(|t| TopicMetadata {
                    name: t.name().to_string(),
                    partitions: t
                        .partitions()
                        .iter()
                        .map(|p| PartitionMetadata {
                            id: p.id(),
                            leader: (p.leader() >= 0).then_some(p.leader()),
                            replicas: p.replicas().to_vec(),
                            isr: p.isr().to_vec(),
                        })
                        .collect(),
                })
                .collect())
        })
    }

    fn create_topic<'a>(
        &'a self,
        name: &'a str,
        detail: &'a TopicDetail,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let topic = detail.config.iter().fold(
                NewTopic::new(
                    name,
                    detail.partitions,
                    TopicReplication::Fixed(detail.replication_factor as i32),
                ),
                |t, (k, v)| t.set(k, v),
            );
            let results = self
                .client
                .create_topics([&topic], &self.options())
                .await
                .map_err(|e| map_error(e, "create topic"))?;
            for result in results {
                result.map_err(|(topic, code)| map_code(code, &format!("create topic '{topic}'")))?;
            }
            Ok(())
        })
    }

    fn create_partitions<'a>(
        &'a self,
        name: &'a str,
        count: i32,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let partitions = NewPartitions::new(name, count.max(0) as usize);
            let results = self
                .client
                .create_partitions([&partitions], &self.options())
                .await
                .map_err(|e| map_error(e, "create partitions"))?;
            for result in results {
                result.map_err(|(topic, code)| map_code(code, &format!("create partitions of '{topic}'")))?;
            }
            Ok(())
        })
    }

    fn delete_topic<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let results = self
                .client
                .delete_topics(&[name], &self.options())
                .await
                .map_err(|e| map_error(e, "delete topic"))?;
            for result in results {
                result.map_err(|(topic, code)| map_code(code, &format!("delete topic '{topic}'")))?;
            }
            Ok(())
        })
    }

    fn alter_topic_config<'a>(
        &'a self,
        name: &'a str,
        entries: &'a BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            // AlterConfigs replaces the whole set; merge with what is there.
            let mut merged = self.topic_config(name).await?;
            merged.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));

            let alter = merged
                .iter()
                .fold(AlterConfig::new(ResourceSpecifier::Topic(name)), |a, (k, v)| a.set(k, v));
            let results = self
                .client
                .alter_configs([&alter], &self.options())
                .await
                .map_err(|e| map_error(e, "alter config"))?;
            for result in results {
                result.map_err(|(_, code)| map_code(code, &format!("alter config of '{name}'")))?;
            }
            Ok(())
        })
    }
}
