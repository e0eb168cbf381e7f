use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use logbus_api::{BrokerError, ClusterAdmin, TopicDetail, TopicMetadata};

use crate::log::Topic;
use crate::{MemoryBroker, unknown_topic};

impl ClusterAdmin for MemoryBroker {
    fn list_topics(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, TopicDetail>, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let topics = match self.inner.topics.read() {
                Ok(t) => t.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            Ok(topics
                .into_iter()
                .map(|(name, t)| {
                    let detail = TopicDetail {
                        partitions: t.partition_count(),
                        replication_factor: t.replication,
                        config: t.config(),
                    };
                    (name, detail)
                })
                .collect())
        })
    }

    fn describe_topics<'a>(
        &'a self,
        topics: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TopicMetadata>, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(topics
                .iter()
                .filter_map(|name| self.topic(name))
                .map(|t| TopicMetadata {
                    name: t.name.clone(),
                    partitions: t.logs().iter().map(|log| log.metadata()).collect(),
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
            let brokers = self.inner.config.brokers;
            if detail.partitions < 1 {
                return Err(BrokerError::validation("number of partitions must be larger than 0"));
            }
            if detail.replication_factor < 1 || detail.replication_factor as i32 > brokers {
                return Err(BrokerError::validation(format!(
                    "replication factor {} larger than available brokers {brokers}",
                    detail.replication_factor
                )));
            }

            let mut topics = self.topics_mut();
            if topics.contains_key(name) {
                return Err(BrokerError::logic(format!("topic '{name}' already exists")));
            }
            topics.insert(
                name.to_string(),
                Arc::new(Topic::new(
                    name.to_string(),
                    detail.partitions,
                    detail.replication_factor,
                    brokers,
                    detail.config.clone(),
                )),
            );
            Ok(())
        })
    }

    fn create_partitions<'a>(
        &'a self,
        name: &'a str,
        count: i32,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let topic = self.topic(name).ok_or_else(|| unknown_topic(name))?;
            let current = topic.partition_count();
            if count <= current {
                return Err(BrokerError::validation(format!(
                    "topic '{name}' currently has {current} partitions, {count} would not be an increase"
                )));
            }
            topic.grow(count, self.inner.config.brokers);
            Ok(())
        })
    }

    fn delete_topic<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let removed = self.topics_mut().remove(name);
            let topic = removed.ok_or_else(|| unknown_topic(name))?;
            topic.deleted.cancel();
            Ok(())
        })
    }

    fn alter_topic_config<'a>(
        &'a self,
        name: &'a str,
        entries: &'a BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let topic = self.topic(name).ok_or_else(|| unknown_topic(name))?;
            let mut config = match topic.config.lock() {
                Ok(c) => c,
                Err(poisoned) => poisoned.into_inner(),
            };
            config.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(())
        })
    }
}
