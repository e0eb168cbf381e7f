use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

use crate::error::BrokerError;

/// Topic shape and configuration, as created or listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDetail {
    pub partitions: i32,
    pub replication_factor: i16,
    /// Topic-level config entries, e.g. `retention.ms`.
    pub config: BTreeMap<String, String>,
}

/// Replica placement of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub id: i32,
    /// `None` while the partition has no leader.
    pub leader: Option<i32>,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
}

/// Broker admin service. Single-shot request/response calls.
pub trait ClusterAdmin: Send + Sync {
    #[allow(clippy::type_complexity)]
    fn list_topics(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, TopicDetail>, BrokerError>> + Send + '_>>;

    #[allow(clippy::type_complexity)]
    fn describe_topics<'a>(
        &'a self,
        topics: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TopicMetadata>, BrokerError>> + Send + 'a>>;

    fn create_topic<'a>(
        &'a self,
        name: &'a str,
        detail: &'a TopicDetail,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;

    /// Grow the topic to `count` partitions in total.
    fn create_partitions<'a>(
        &'a self,
        name: &'a str,
        count: i32,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;

    fn delete_topic<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;

    /// Set topic config entries; keys not listed keep their values.
    fn alter_topic_config<'a>(
        &'a self,
        name: &'a str,
        entries: &'a BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;
}
