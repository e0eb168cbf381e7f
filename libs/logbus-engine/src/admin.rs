//! Validated topic administration on top of [`ClusterAdmin`].
//!
//! Every operation validates its arguments before the first broker call.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use logbus_api::{ClusterAdmin, PartitionMetadata, TopicDetail, TopicMetadata};

use crate::error::AdminError;

pub const MIN_INSYNC_REPLICAS: &str = "min.insync.replicas";
const CLEANUP_POLICY: &str = "cleanup.policy";
const RETENTION_MS: &str = "retention.ms";
/// Seven days.
const DEFAULT_RETENTION_MS: &str = "604800000";

/// Requested shape of a new topic.
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication: i16,
    pub min_isr: i16,
    /// Additional config entries; they override the defaults.
    pub extra_config: BTreeMap<String, String>,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: i32, replication: i16, min_isr: i16) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication,
            min_isr,
            extra_config: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), AdminError> {
        if self.name.is_empty() {
            return Err(AdminError::Validation("topic name must not be empty".into()));
        }
        if self.partitions < 1 {
            return Err(AdminError::Validation(format!(
                "partitions must be >= 1, got {}",
                self.partitions
            )));
        }
        if self.replication < 1 {
            return Err(AdminError::Validation(format!(
                "replication factor must be >= 1, got {}",
                self.replication
            )));
        }
        let min_isr = self.effective_min_isr()?;
        if min_isr < 1 || min_isr > self.replication {
            return Err(AdminError::Validation(format!(
                "min.insync.replicas must be between 1 and the replication factor {}, got {}",
                self.replication, min_isr
            )));
        }
        Ok(())
    }

    /// `min.insync.replicas` the topic is created with: an entry in
    /// `extra_config` wins over `min_isr`.
    fn effective_min_isr(&self) -> Result<i16, AdminError> {
        match self.extra_config.get(MIN_INSYNC_REPLICAS) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                AdminError::Validation(format!("min.insync.replicas must be an integer, got '{raw}'"))
            }),
            None => Ok(self.min_isr),
        }
    }

    /// Topic detail sent to the broker.
    pub fn detail(&self) -> TopicDetail {
        let mut config = BTreeMap::from([
            (CLEANUP_POLICY.to_string(), "delete".to_string()),
            (RETENTION_MS.to_string(), DEFAULT_RETENTION_MS.to_string()),
            (MIN_INSYNC_REPLICAS.to_string(), self.min_isr.to_string()),
        ]);
        config.extend(self.extra_config.clone());
        TopicDetail {
            partitions: self.partitions,
            replication_factor: self.replication,
            config,
        }
    }
}

pub async fn create_topic(admin: &dyn ClusterAdmin, spec: &TopicSpec) -> Result<(), AdminError> {
    spec.validate()?;
    admin.create_topic(&spec.name, &spec.detail()).await?;
    tracing::info!(
        topic = %spec.name,
        partitions = spec.partitions,
        replication = spec.replication,
        min_isr = spec.min_isr,
        "topic created"
    );
    Ok(())
}

/// Listed detail plus replica placement of one topic.
#[derive(Debug, Clone)]
pub struct TopicDescription {
    pub name: String,
    pub detail: TopicDetail,
    pub metadata: TopicMetadata,
}

/// `None` when the topic does not exist.
pub async fn topic_detail(
    admin: &dyn ClusterAdmin,
    name: &str,
) -> Result<Option<TopicDescription>, AdminError> {
    let topics = admin.list_topics().await?;
    let Some(detail) = topics.get(name).cloned() else {
        return Ok(None);
    };
    let metadata = admin
        .describe_topics(&[name.to_string()])
        .await?
        .into_iter()
        .find(|m| m.name == name)
        .unwrap_or_else(|| TopicMetadata {
            name: name.to_string(),
            partitions: Vec::new(),
        });
    Ok(Some(TopicDescription {
        name: name.to_string(),
        detail,
        metadata,
    }))
}

/// Grow `name` to `count` partitions. Partition counts never shrink.
pub async fn increase_partitions(
    admin: &dyn ClusterAdmin,
    name: &str,
    count: i32,
) -> Result<(), AdminError> {
    if count < 1 {
        return Err(AdminError::Validation(format!(
            "partition count must be >= 1, got {count}"
        )));
    }
    let topics = admin.list_topics().await?;
    if let Some(current) = topics.get(name).map(|d| d.partitions) {
        if count <= current {
            return Err(AdminError::Validation(format!(
                "topic '{name}' already has {current} partitions, requested {count}"
            )));
        }
    }
    admin.create_partitions(name, count).await?;
    tracing::info!(topic = %name, partitions = count, "partitions increased");
    Ok(())
}

pub async fn delete_topic(admin: &dyn ClusterAdmin, name: &str) -> Result<(), AdminError> {
    admin.delete_topic(name).await?;
    tracing::info!(topic = %name, "topic deleted");
    Ok(())
}

/// Set `min.insync.replicas` of an existing topic.
pub async fn update_min_isr(
    admin: &dyn ClusterAdmin,
    name: &str,
    value: i16,
) -> Result<(), AdminError> {
    if value < 1 {
        return Err(AdminError::Validation(format!(
            "min.insync.replicas must be >= 1, got {value}"
        )));
    }
    let topics = admin.list_topics().await?;
    let detail = topics
        .get(name)
        .ok_or_else(|| AdminError::TopicNotFound(name.to_string()))?;
    if value > detail.replication_factor {
        return Err(AdminError::Validation(format!(
            "min.insync.replicas {value} exceeds replication factor {}",
            detail.replication_factor
        )));
    }

    let entries = BTreeMap::from([(MIN_INSYNC_REPLICAS.to_string(), value.to_string())]);
    admin.alter_topic_config(name, &entries).await?;
    tracing::info!(topic = %name, min_isr = value, "min.insync.replicas updated");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaState {
    pub broker: i32,
    pub in_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionHealth {
    pub id: i32,
    pub leader: Option<i32>,
    pub replicas: Vec<ReplicaState>,
    pub isr: Vec<i32>,
    pub meets_min_isr: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicHealth {
    pub name: String,
    pub replication_factor: i16,
    pub min_isr: i16,
    pub partitions: Vec<PartitionHealth>,
}

impl TopicHealth {
    pub fn healthy(&self) -> bool {
        self.partitions.iter().all(|p| p.meets_min_isr && p.leader.is_some())
    }

    pub fn under_replicated(&self) -> impl Iterator<Item = &PartitionHealth> {
        self.partitions.iter().filter(|p| !p.meets_min_isr)
    }
}

fn partition_health(p: &PartitionMetadata, min_isr: i16) -> PartitionHealth {
    PartitionHealth {
        id: p.id,
        leader: p.leader,
        replicas: p
            .replicas
            .iter()
            .map(|&broker| ReplicaState {
                broker,
                in_sync: p.isr.contains(&broker),
            })
            .collect(),
        isr: p.isr.clone(),
        meets_min_isr: p.isr.len() >= min_isr.max(0) as usize,
    }
}

/// Replica health of `metadata`, partitions sorted by id.
pub fn replica_health(metadata: &TopicMetadata, replication_factor: i16, min_isr: i16) -> TopicHealth {
    let mut partitions: Vec<_> = metadata
        .partitions
        .iter()
        .map(|p| partition_health(p, min_isr))
        .collect();
    partitions.sort_by_key(|p| p.id);
    TopicHealth {
        name: metadata.name.clone(),
        replication_factor,
        min_isr,
        partitions,
    }
}

pub async fn describe_replica_health(
    admin: &dyn ClusterAdmin,
    name: &str,
    min_isr: i16,
) -> Result<TopicHealth, AdminError> {
    let description = topic_detail(admin, name)
        .await?
        .ok_or_else(|| AdminError::TopicNotFound(name.to_string()))?;
    Ok(replica_health(
        &description.metadata,
        description.detail.replication_factor,
        min_isr,
    ))
}

/// Check replica health every `interval` until the topic disappears or
/// `token` fires. A zero interval checks once. Returns the number of checks.
pub async fn watch_replica_health<F>(
    admin: &dyn ClusterAdmin,
    name: &str,
    min_isr: i16,
    interval: Duration,
    token: &CancellationToken,
    mut report: F,
) -> Result<u64, AdminError>
where
    F: FnMut(&TopicHealth) + Send,
{
    let mut checks = 0u64;
    loop {
        match describe_replica_health(admin, name, min_isr).await {
            Ok(health) => {
                checks += 1;
                if !health.healthy() {
                    tracing::warn!(
                        topic = %name,
                        under_replicated = health.under_replicated().count(),
                        "topic below min.insync.replicas"
                    );
                }
                report(&health);
            }
            Err(AdminError::TopicNotFound(_)) if checks > 0 => {
                tracing::info!(topic = %name, "topic gone, stopping health check");
                return Ok(checks);
            }
            Err(AdminError::Broker(e)) if checks > 0 => {
                tracing::warn!(topic = %name, error = %e, "health check failed");
            }
            Err(e) => return Err(e),
        }

        if interval.is_zero() {
            return Ok(checks);
        }
        tokio::select! {
            _ = token.cancelled() => return Ok(checks),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> TopicMetadata {
        TopicMetadata {
            name: "t".into(),
            partitions: vec![
                PartitionMetadata { id: 1, leader: None, replicas: vec![2, 3, 1], isr: vec![] },
                PartitionMetadata { id: 0, leader: Some(1), replicas: vec![1, 2, 3], isr: vec![1, 2] },
            ],
        }
    }

    #[test]
    fn health_marks_out_of_sync_replicas() {
        let health = replica_health(&metadata(), 3, 2);
        let p0 = &health.partitions[0];
        assert_eq!(p0.id, 0);
        assert_eq!(
            p0.replicas,
            vec![
                ReplicaState { broker: 1, in_sync: true },
                ReplicaState { broker: 2, in_sync: true },
                ReplicaState { broker: 3, in_sync: false },
            ]
        );
        assert!(p0.meets_min_isr);
        assert!(!replica_health(&metadata(), 3, 3).partitions[0].meets_min_isr);
    }

    #[test]
    fn leaderless_partition_is_unhealthy() {
        let health = replica_health(&metadata(), 3, 1);
        assert_eq!(health.partitions[1].leader, None);
        assert!(!health.healthy());
        assert_eq!(health.under_replicated().map(|p| p.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn topic_shape_validation() {
        assert!(TopicSpec::new("t", 3, 3, 2).validate().is_ok());
        for bad in [
            TopicSpec::new("t", 3, 2, 3),
            TopicSpec::new("t", 0, 3, 2),
            TopicSpec::new("t", 3, 0, 0),
            TopicSpec::new("t", 3, 3, 0),
            TopicSpec::new("", 3, 3, 2),
        ] {
            assert!(matches!(bad.validate(), Err(AdminError::Validation(_))), "{bad:?}");
        }
    }

    #[test]
    fn min_isr_in_extra_config_is_bounded_too() {
        let mut spec = TopicSpec::new("t", 1, 2, 2);
        spec.extra_config.insert(MIN_INSYNC_REPLICAS.into(), "3".into());
        assert!(matches!(spec.validate(), Err(AdminError::Validation(_))));

        spec.extra_config.insert(MIN_INSYNC_REPLICAS.into(), "two".into());
        assert!(matches!(spec.validate(), Err(AdminError::Validation(_))));

        spec.extra_config.insert(MIN_INSYNC_REPLICAS.into(), "1".into());
        assert!(spec.validate().is_ok());
        assert_eq!(spec.detail().config[MIN_INSYNC_REPLICAS], "1");
    }

    #[test]
    fn detail_has_default_entries_and_extras_win() {
        let mut spec = TopicSpec::new("t", 3, 3, 2);
        spec.extra_config.insert("retention.ms".into(), "1000".into());
        let detail = spec.detail();
        assert_eq!(detail.config["cleanup.policy"], "delete");
        assert_eq!(detail.config["retention.ms"], "1000");
        assert_eq!(detail.config[MIN_INSYNC_REPLICAS], "2");
        assert_eq!(detail.partitions, 3);
        assert_eq!(detail.replication_factor, 3);
    }
}
