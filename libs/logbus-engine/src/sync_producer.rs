use std::sync::Arc;
use std::time::Duration;

use backon::ExponentialBuilder;

use logbus_api::{DeliveryOutcome, Record, RecordSink, Sequencer};

use crate::config::ProducerConfig;
use crate::error::ConfigError;
use crate::retry::{send_policy, send_with_retry};

/// Totals of a [`SyncProducer::send_all`] batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendTally {
    pub successes: u64,
    /// Failed and timed-out sends.
    pub errors: u64,
}

impl SendTally {
    pub fn total(&self) -> u64 {
        self.successes + self.errors
    }
}

/// Sends one record at a time and waits for its acknowledgment.
pub struct SyncProducer {
    sink: Arc<dyn RecordSink>,
    timeout: Duration,
    policy: ExponentialBuilder,
    sequencer: Sequencer,
}

impl SyncProducer {
    pub fn new(sink: Arc<dyn RecordSink>, config: &ProducerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            sink,
            timeout: config.submit_timeout(),
            policy: send_policy(config),
            sequencer: Sequencer::new(),
        })
    }

    /// Send `record` and wait up to the submit timeout (retries included).
    pub async fn send(&mut self, record: Record) -> DeliveryOutcome {
        let sequence = self.sequencer.next();
        let attempt = send_with_retry(self.sink.as_ref(), &record, sequence, self.policy.clone());

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(delivered)) => delivered.into(),
            Ok(Err(cause)) => DeliveryOutcome::Failure { record, cause },
            Err(_) => DeliveryOutcome::TimedOut { record },
        }
    }

    /// Send every record in order, logging each outcome.
    pub async fn send_all<I>(&mut self, records: I) -> SendTally
    where
        I: IntoIterator<Item = Record>,
    {
        let mut tally = SendTally::default();
        for (i, record) in records.into_iter().enumerate() {
            match self.send(record).await {
                DeliveryOutcome::Success { partition, offset } => {
                    tally.successes += 1;
                    tracing::info!(partition, offset, "record delivered");
                }
                DeliveryOutcome::Failure { cause, .. } => {
                    tally.errors += 1;
                    tracing::warn!(index = i, error = %cause, "send failed");
                }
                DeliveryOutcome::TimedOut { record } => {
                    tally.errors += 1;
                    tracing::warn!(index = i, topic = %record.topic, "send timed out");
                }
            }
        }
        tally
    }

    pub async fn close(self) {
        if let Err(e) = self.sink.flush().await {
            tracing::warn!(error = %e, "sink flush failed");
        }
    }
}
