//! In-process broker implementing every logbus collaborator trait.
//!
//! Topics hold append-only partition logs; consumer groups assign
//! partitions round-robin and commit marked offsets immediately. Enough to
//! drive producers, claim loops and admin commands without a network.

mod admin;
mod group;
mod log;
mod partition;
mod producer;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tokio_util::sync::CancellationToken;

use logbus_api::{BrokerError, ClaimedMessage};

pub use group::MemoryGroupConsumer;
pub use producer::{Faults, MemoryProducer};

use crate::group::GroupState;
use crate::log::Topic;

// ═══════════════════════════════════════════════════════════════
//  MemoryBrokerConfig
// ═══════════════════════════════════════════════════════════════

fn default_brokers() -> i32 {
    3
}

fn default_partitions() -> i32 {
    3
}

fn default_auto_create() -> bool {
    true
}

fn default_max_message_bytes() -> usize {
    1_000_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryBrokerConfig {
    /// Simulated broker ids `1..=brokers`.
    #[serde(default = "default_brokers")]
    pub brokers: i32,
    /// Partitions of auto-created topics.
    #[serde(default = "default_partitions")]
    pub default_partitions: i32,
    #[serde(default = "default_auto_create")]
    pub auto_create_topics: bool,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            default_partitions: default_partitions(),
            auto_create_topics: default_auto_create(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// Shared handle to one in-process cluster. Clones see the same state.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Cluster>,
}

struct Cluster {
    config: MemoryBrokerConfig,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    groups: Mutex<HashMap<String, Arc<GroupState>>>,
    /// Closes every partition consumer stream.
    shutdown: CancellationToken,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(MemoryBrokerConfig::default())
    }
}

impl MemoryBroker {
    pub fn new(config: MemoryBrokerConfig) -> Self {
        Self {
            inner: Arc::new(Cluster {
                config,
                topics: RwLock::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &MemoryBrokerConfig {
        &self.inner.config
    }

    /// Close all partition consumer streams.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.inner.topics.read() {
            Ok(t) => t.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        names.sort();
        names
    }

    /// Every record of one partition, in offset order.
    pub async fn records(&self, topic: &str, partition: i32) -> Vec<ClaimedMessage> {
        match self.topic(topic).and_then(|t| t.partition(partition)) {
            Some(log) => log.read_all(topic).await,
            None => Vec::new(),
        }
    }

    /// Every record of a topic, partition by partition.
    pub async fn all_records(&self, topic: &str) -> Vec<ClaimedMessage> {
        let Some(t) = self.topic(topic) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for log in t.logs() {
            out.extend(log.read_all(topic).await);
        }
        out
    }

    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.group_state(group).committed(topic, partition)
    }

    /// Override the in-sync replica set of one partition.
    pub fn set_isr(&self, topic: &str, partition: i32, isr: Vec<i32>) -> Result<(), BrokerError> {
        let log = self.partition_log(topic, partition)?;
        log.update_placement(|p| p.isr = isr);
        Ok(())
    }

    pub fn set_leader(&self, topic: &str, partition: i32, leader: Option<i32>) -> Result<(), BrokerError> {
        let log = self.partition_log(topic, partition)?;
        log.update_placement(|p| p.leader = leader);
        Ok(())
    }

    fn partition_log(&self, topic: &str, partition: i32) -> Result<Arc<log::PartitionLog>, BrokerError> {
        self.topic(topic)
            .ok_or_else(|| unknown_topic(topic))?
            .partition(partition)
            .ok_or_else(|| {
                BrokerError::validation(format!("topic '{topic}' has no partition {partition}"))
            })
    }

    fn topic(&self, name: &str) -> Option<Arc<Topic>> {
        match self.inner.topics.read() {
            Ok(t) => t.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        }
    }

    /// Look up `name`, creating it with the default shape when allowed.
    fn topic_or_create(&self, name: &str) -> Result<Arc<Topic>, BrokerError> {
        if let Some(t) = self.topic(name) {
            return Ok(t);
        }
        if !self.inner.config.auto_create_topics {
            return Err(unknown_topic(name));
        }
        let config = &self.inner.config;
        let replication = config.brokers.min(i16::MAX as i32) as i16;
        let mut topics = self.topics_mut();
        let topic = topics
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(topic = %name, partitions = config.default_partitions, "auto-creating topic");
                Arc::new(Topic::new(
                    name.to_string(),
                    config.default_partitions,
                    replication,
                    config.brokers,
                    BTreeMap::new(),
                ))
            })
            .clone();
        Ok(topic)
    }

    fn topics_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Topic>>> {
        match self.inner.topics.write() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn group_state(&self, group: &str) -> Arc<GroupState> {
        let mut groups = match self.inner.groups.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        groups
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(GroupState::new(group)))
            .clone()
    }
}

fn unknown_topic(name: &str) -> BrokerError {
    BrokerError::config(format!("unknown topic '{name}'"))
}
