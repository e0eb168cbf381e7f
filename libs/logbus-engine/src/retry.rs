//! Backoff policies for producer sends and group rejoins, built on `backon`.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use logbus_api::{BrokerError, Delivered, Record, RecordSink, Sequence};

use crate::config::{ConsumerConfig, ProducerConfig};

/// Policy for retrying a single record send.
///
/// Only connectivity errors are retried; `retry_max = 0` disables retries.
pub fn send_policy(cfg: &ProducerConfig) -> ExponentialBuilder {
    let min = cfg.retry_backoff();
    ExponentialBuilder::default()
        .with_min_delay(min)
        .with_max_delay(min.saturating_mul(10))
        .with_max_times(cfg.retry_max)
        .with_jitter()
}

/// Policy for rejoining a consumer group after a failed generation.
/// Never gives up; the runner stops only on cancellation or fatal errors.
pub fn rejoin_policy(cfg: &ConsumerConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(cfg.rejoin_backoff_min())
        .with_max_delay(cfg.rejoin_backoff_max())
        .without_max_times()
}

/// Send one record, retrying retriable failures under `policy`.
///
/// The same `sequence` is used for every attempt.
pub async fn send_with_retry(
    sink: &dyn RecordSink,
    record: &Record,
    sequence: Sequence,
    policy: ExponentialBuilder,
) -> Result<Delivered, BrokerError> {
    (|| sink.send(record, sequence))
        .retry(policy)
        .when(BrokerError::is_retriable)
        .notify(|e: &BrokerError, after: Duration| {
            tracing::warn!(
                topic = %record.topic,
                producer = sequence.producer,
                sequence = sequence.number,
                error = %e,
                retry_in_ms = after.as_millis() as u64,
                "send failed, retrying"
            );
        })
        .await
}
