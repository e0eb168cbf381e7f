//! Partition consumers without group coordination.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use logbus_api::{BrokerError, PartitionConsumer, StartOffset};

use crate::claim::MessageProcessor;

/// Consume one partition from `start` until its stream ends or `token`
/// fires. Returns the number of processed messages.
pub async fn consume_partition(
    consumer: &dyn PartitionConsumer,
    topic: &str,
    partition: i32,
    start: StartOffset,
    processor: &dyn MessageProcessor,
    token: &CancellationToken,
) -> Result<u64, BrokerError> {
    let mut stream = consumer
        .consume_partition(topic, partition, start)
        .await
        .map_err(|e| e.with_context(format!("open {topic}/{partition}")))?;
    tracing::info!(topic, partition, offset = stream.initial_offset(), "partition consumer started");

    let mut consumed = 0u64;
    loop {
        let msg = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = stream.recv() => match next {
                Some(msg) => msg,
                None => break,
            },
        };
        processor.process(&msg).await?;
        consumed += 1;
    }

    tracing::info!(topic, partition, consumed, "partition consumer stopped");
    Ok(consumed)
}

/// Consume every partition of `topic` concurrently, one task per partition.
///
/// A failing partition is logged and does not stop the others. Returns the
/// processed count of each partition that finished cleanly.
pub async fn consume_all_partitions(
    consumer: Arc<dyn PartitionConsumer>,
    topic: &str,
    start: StartOffset,
    processor: Arc<dyn MessageProcessor>,
    token: CancellationToken,
) -> Result<BTreeMap<i32, u64>, BrokerError> {
    let partitions = consumer.partitions(topic).await?;
    tracing::info!(topic, partitions = partitions.len(), "consuming all partitions");

    let mut tasks = JoinSet::new();
    for partition in partitions {
        let consumer = consumer.clone();
        let processor = processor.clone();
        let token = token.clone();
        let topic = topic.to_string();
        tasks.spawn(async move {
            let result = consume_partition(
                consumer.as_ref(),
                &topic,
                partition,
                start,
                processor.as_ref(),
                &token,
            )
            .await;
            (partition, result)
        });
    }

    let mut consumed = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((partition, Ok(n))) => {
                consumed.insert(partition, n);
            }
            Ok((partition, Err(e))) => {
                tracing::error!(topic, partition, error = %e, "partition consumer failed");
            }
            Err(e) => {
                tracing::error!(topic, error = %e, "partition task panicked");
            }
        }
    }
    Ok(consumed)
}
