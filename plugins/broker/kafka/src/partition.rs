use std::future::Future;
use std::pin::Pin;

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{Offset, TopicPartitionList};

use logbus_api::{BrokerError, Claim, ClaimedMessage, PartitionConsumer, StartOffset};

use crate::group::to_claimed;
use crate::{KafkaConfig, map_error};

/// Direct partition reads; one assigned `StreamConsumer` per stream.
pub struct KafkaPartitionConsumer {
    config: KafkaConfig,
}

impl KafkaPartitionConsumer {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    fn client(&self) -> Result<StreamConsumer, BrokerError> {
        let mut client = self.config.client_config();
        // Assigned consumers never join, the id only satisfies librdkafka.
        client
            .set("group.id", format!("{}-partition", self.config.client_id))
            .set("enable.auto.commit", "false");
        client.create().map_err(|e| map_error(e, "create partition consumer"))
    }
}

struct PartitionStream {
    consumer: StreamConsumer,
    topic: String,
    partition: i32,
    initial: i64,
}

impl Claim for PartitionStream {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    fn initial_offset(&self) -> i64 {
        self.initial
    }

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<ClaimedMessage>> + Send + '_>> {
        Box::pin(async move {
            loop {
                match self.consumer.recv().await {
                    Ok(m) => return Some(to_claimed(&m)),
                    Err(e) => {
                        let err = map_error(e, "poll");
                        if !err.is_retriable() {
                            tracing::error!(topic = %self.topic, partition = self.partition, error = %err, "partition stream closed");
                            return None;
                        }
                        tracing::warn!(topic = %self.topic, partition = self.partition, error = %err, "poll failed");
                    }
                }
            }
        })
    }
}

impl PartitionConsumer for KafkaPartitionConsumer {
    fn partitions<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<i32>, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let consumer = self.client()?;
            let name = topic.to_string();
            let timeout = self.config.operation_timeout();
            tokio::task::spawn_blocking(move || {
                let metadata = consumer
                    .fetch_metadata(Some(name.as_str()), timeout)
                    .map_err(|e| map_error(e, "fetch metadata"))?;
                let t = metadata
                    .topics()
                    .iter()
                    .find(|t| t.name() == name)
                    .ok_or_else(|| BrokerError::logic(format!("unknown topic '{name}'")))?;
                if let Some(err) = t.error() {
                    return Err(BrokerError::logic(format!("topic '{name}': {err:?}")));
                }
                Ok(t.partitions().iter().map(|p| p.id()).collect())
            })
            .await
            .map_err(|e| BrokerError::logic(format!("metadata task failed: {e}")))?
        })
    }

    fn consume_partition<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        start: StartOffset,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Claim>, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let consumer = self.client()?;
            let offset = match start {
                StartOffset::Oldest => Offset::Beginning,
                StartOffset::Newest => Offset::End,
                StartOffset::At(n) => Offset::Offset(n),
            };
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(topic, partition, offset)
                .map_err(|e| map_error(e, "assign"))?;
            consumer.assign(&tpl).map_err(|e| map_error(e, "assign"))?;
            tracing::debug!(topic, partition, ?offset, "partition assigned");

            let claim: Box<dyn Claim> = Box::new(PartitionStream {
                consumer,
                topic: topic.to_string(),
                partition,
                initial: match start {
                    StartOffset::At(n) => n,
                    _ => -1,
                },
            });
            Ok(claim)
        })
    }
}
