//! Asynchronous delivery pipeline.
//!
//! ```text
//!  submit() ──▶ [outbound channel, capacity C] ──▶ dispatcher ──▶ RecordSink
//!                                                     │
//!                                   ┌─────────────────┴────────────────┐
//!                                   ▼                                  ▼
//!                          successes stream                    failures stream
//!                                   │                                  │
//!                           success drain task                failure drain task
//! ```
//!
//! Every counter has exactly one owner: `enqueued`/`timed_out` belong to the
//! [`DeliveryPipeline`] handle, `succeeded` and `failed` to their drain task.
//! They meet only in [`DeliveryReport::new`], after the drain tasks joined.

use std::sync::Arc;
use std::time::Duration;

use backon::ExponentialBuilder;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use logbus_api::{Delivered, FailedDelivery, Record, RecordSink, Sequencer};

use crate::config::ProducerConfig;
use crate::error::PipelineError;
use crate::retry::{send_policy, send_with_retry};

/// Result of a bounded-wait submission.
#[derive(Debug)]
pub enum Submission {
    Enqueued,
    /// The outbound channel stayed full until the deadline. The record is
    /// handed back; retrying it is the caller's decision.
    TimedOut(Record),
}

/// Submission-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitCounts {
    pub enqueued: u64,
    pub timed_out: u64,
}

impl SubmitCounts {
    pub fn submitted(&self) -> u64 {
        self.enqueued + self.timed_out
    }
}

/// Receiving halves of the two outcome streams. Both close only after the
/// pipeline was closed and every enqueued record reached an outcome.
///
/// Keep both receivers until they close: outcomes sent to a dropped
/// receiver are logged and lost, and the counters no longer reconcile.
pub struct OutcomeStreams {
    pub successes: mpsc::Receiver<Delivered>,
    pub failures: mpsc::Receiver<FailedDelivery>,
}

/// Producer handle owning the outbound channel.
pub struct DeliveryPipeline {
    input: mpsc::Sender<Record>,
    counts: SubmitCounts,
    dispatcher: JoinHandle<()>,
}

impl DeliveryPipeline {
    /// Start the dispatcher task. The caller must drain the returned streams
    /// (see [`drain_outcomes`]); undrained streams stall the dispatcher.
    pub fn spawn(
        sink: Arc<dyn RecordSink>,
        config: &ProducerConfig,
    ) -> Result<(Self, OutcomeStreams), PipelineError> {
        config.validate()?;

        let capacity = config.channel_capacity;
        let (input, records) = mpsc::channel::<Record>(capacity);
        let (success_tx, successes) = mpsc::channel::<Delivered>(capacity);
        let (failure_tx, failures) = mpsc::channel::<FailedDelivery>(capacity);

        let max_in_flight = config.effective_max_in_flight();
        let policy = send_policy(config);
        tracing::info!(
            capacity,
            max_in_flight,
            idempotent = config.idempotent,
            acks = config.acks.as_str(),
            "delivery pipeline started"
        );

        let dispatcher = tokio::spawn(dispatch(
            records,
            sink,
            max_in_flight,
            policy,
            success_tx,
            failure_tx,
        ));

        Ok((
            Self {
                input,
                counts: SubmitCounts::default(),
                dispatcher,
            },
            OutcomeStreams {
                successes,
                failures,
            },
        ))
    }

    /// Place `record` on the outbound channel, waiting at most `deadline`.
    ///
    /// A zero deadline never waits: a full channel yields `TimedOut`.
    pub async fn submit(
        &mut self,
        record: Record,
        deadline: Duration,
    ) -> Result<Submission, PipelineError> {
        match tokio::time::timeout(deadline, self.input.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(record);
                self.counts.enqueued += 1;
                Ok(Submission::Enqueued)
            }
            Ok(Err(_)) => Err(PipelineError::Closed(Box::new(record))),
            Err(_) => {
                self.counts.timed_out += 1;
                Ok(Submission::TimedOut(record))
            }
        }
    }

    pub fn counts(&self) -> SubmitCounts {
        self.counts
    }

    /// Stop accepting records. Already enqueued records are still sent,
    /// then the sink is flushed and both outcome streams close.
    ///
    /// Returns immediately; final outcome counts are only valid once the
    /// drain tasks have finished.
    pub fn close(self) -> SubmitCounts {
        drop(self.input);
        drop(self.dispatcher);
        tracing::debug!(
            enqueued = self.counts.enqueued,
            timed_out = self.counts.timed_out,
            "delivery pipeline closing"
        );
        self.counts
    }
}

/// Move records from the outbound channel to the sink with at most
/// `max_in_flight` concurrent sends.
async fn dispatch(
    mut records: mpsc::Receiver<Record>,
    sink: Arc<dyn RecordSink>,
    max_in_flight: usize,
    policy: ExponentialBuilder,
    success_tx: mpsc::Sender<Delivered>,
    failure_tx: mpsc::Sender<FailedDelivery>,
) {
    let mut sequencer = Sequencer::new();
    let incoming = futures::stream::poll_fn(move |cx| records.poll_recv(cx))
        .map(move |record| (sequencer.next(), record));

    incoming
        .for_each_concurrent(max_in_flight, |(sequence, record)| {
            let sink = sink.clone();
            let success_tx = success_tx.clone();
            let failure_tx = failure_tx.clone();
            let policy = policy.clone();
            async move {
                match send_with_retry(sink.as_ref(), &record, sequence, policy).await {
                    Ok(delivered) => {
                        if let Err(lost) = success_tx.send(delivered).await {
                            tracing::warn!(
                                partition = lost.0.partition,
                                offset = lost.0.offset,
                                "success stream dropped, outcome not reported"
                            );
                        }
                    }
                    Err(cause) => {
                        tracing::debug!(topic = %record.topic, sequence = sequence.number, error = %cause, "delivery failed");
                        if let Err(lost) = failure_tx.send(FailedDelivery { record, cause }).await {
                            tracing::warn!(
                                topic = %lost.0.record.topic,
                                error = %lost.0.cause,
                                "failure stream dropped, outcome not reported"
                            );
                        }
                    }
                }
            }
        })
        .await;

    if let Err(e) = sink.flush().await {
        tracing::warn!(error = %e, "sink flush failed");
    }
    tracing::debug!("dispatcher finished");
}

/// Outcomes gathered by the two drain tasks.
#[derive(Debug, Default)]
pub struct DrainedOutcomes {
    pub succeeded: u64,
    /// Failed records with their cause, in arrival order.
    pub failed: Vec<FailedDelivery>,
}

/// Handle to the two drain tasks.
pub struct DrainHandle {
    successes: JoinHandle<u64>,
    failures: JoinHandle<Vec<FailedDelivery>>,
}

/// Drain both outcome streams on two independent tasks.
pub fn drain_outcomes(streams: OutcomeStreams) -> DrainHandle {
    let OutcomeStreams {
        mut successes,
        mut failures,
    } = streams;

    let successes = tokio::spawn(async move {
        let mut succeeded = 0u64;
        while successes.recv().await.is_some() {
            succeeded += 1;
        }
        succeeded
    });

    let failures = tokio::spawn(async move {
        let mut failed = Vec::new();
        while let Some(failure) = failures.recv().await {
            tracing::warn!(
                topic = %failure.record.topic,
                error = %failure.cause,
                "record not delivered"
            );
            failed.push(failure);
        }
        failed
    });

    DrainHandle {
        successes,
        failures,
    }
}

impl DrainHandle {
    /// Wait until both streams closed. A panicked drain task counts as zero.
    pub async fn join(self) -> DrainedOutcomes {
        let (succeeded, failed) = tokio::join!(self.successes, self.failures);
        DrainedOutcomes {
            succeeded: succeeded.unwrap_or_else(|e| {
                tracing::error!(error = %e, "success drain task failed");
                0
            }),
            failed: failed.unwrap_or_else(|e| {
                tracing::error!(error = %e, "failure drain task failed");
                Vec::new()
            }),
        }
    }
}

/// Final reconciled counters of one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub enqueued: u64,
    pub timed_out: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl DeliveryReport {
    pub fn new(counts: SubmitCounts, drained: &DrainedOutcomes) -> Self {
        Self {
            enqueued: counts.enqueued,
            timed_out: counts.timed_out,
            succeeded: drained.succeeded,
            failed: drained.failed.len() as u64,
        }
    }

    pub fn submitted(&self) -> u64 {
        self.enqueued + self.timed_out
    }

    /// Every enqueued record reached exactly one terminal outcome.
    pub fn is_reconciled(&self) -> bool {
        self.enqueued == self.succeeded + self.failed
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU64, Ordering};

    use logbus_api::{BrokerError, Sequence};

    use super::*;

    /// Sink that acknowledges everything except payloads starting with "bad".
    struct PickySink {
        next_offset: AtomicU64,
    }

    impl RecordSink for PickySink {
        fn send<'a>(
            &'a self,
            record: &'a Record,
            _sequence: Sequence,
        ) -> Pin<Box<dyn Future<Output = Result<Delivered, BrokerError>> + Send + 'a>> {
            Box::pin(async move {
                if record.payload.starts_with(b"bad") {
                    return Err(BrokerError::delivery("message too large"));
                }
                let offset = self.next_offset.fetch_add(1, Ordering::Relaxed) as i64;
                Ok(Delivered { partition: 0, offset })
            })
        }

        fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Sink that never answers.
    struct StuckSink;

    impl RecordSink for StuckSink {
        fn send<'a>(
            &'a self,
            _record: &'a Record,
            _sequence: Sequence,
        ) -> Pin<Box<dyn Future<Output = Result<Delivered, BrokerError>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }

        fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn config(capacity: usize, max_in_flight: usize) -> ProducerConfig {
        ProducerConfig {
            channel_capacity: capacity,
            max_in_flight,
            retry_max: 0,
            ..ProducerConfig::default()
        }
    }

    #[tokio::test]
    async fn failures_keep_record_and_cause() {
        let sink = Arc::new(PickySink { next_offset: AtomicU64::new(0) });
        let (mut pipeline, streams) = DeliveryPipeline::spawn(sink, &config(16, 4)).unwrap();
        let drain = drain_outcomes(streams);

        for payload in ["ok-1", "bad-1", "ok-2", "bad-2", "ok-3"] {
            let submission = pipeline
                .submit(Record::new("events", payload), Duration::from_secs(1))
                .await
                .unwrap();
            assert!(matches!(submission, Submission::Enqueued));
        }

        let counts = pipeline.close();
        let drained = drain.join().await;
        let report = DeliveryReport::new(counts, &drained);

        assert_eq!(report, DeliveryReport { enqueued: 5, timed_out: 0, succeeded: 3, failed: 2 });
        assert!(report.is_reconciled());
        let mut failed: Vec<_> = drained
            .failed
            .iter()
            .map(|f| String::from_utf8_lossy(&f.record.payload).into_owned())
            .collect();
        failed.sort();
        assert_eq!(failed, vec!["bad-1", "bad-2"]);
        assert!(drained.failed.iter().all(|f| f.cause.message == "message too large"));
    }

    #[tokio::test]
    async fn dropped_failure_stream_does_not_stall_successes() {
        let sink = Arc::new(PickySink { next_offset: AtomicU64::new(0) });
        let (mut pipeline, streams) = DeliveryPipeline::spawn(sink, &config(16, 4)).unwrap();
        let OutcomeStreams { mut successes, failures } = streams;
        drop(failures);

        for payload in ["ok-1", "bad-1", "ok-2"] {
            pipeline
                .submit(Record::new("events", payload), Duration::from_secs(1))
                .await
                .unwrap();
        }
        let counts = pipeline.close();

        let mut succeeded = 0;
        while successes.recv().await.is_some() {
            succeeded += 1;
        }
        assert_eq!(counts.enqueued, 3);
        assert_eq!(succeeded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_deadline_on_full_channel_times_out() {
        let (mut pipeline, _streams) = DeliveryPipeline::spawn(Arc::new(StuckSink), &config(1, 1)).unwrap();

        // One record stuck in the sink, one filling the channel.
        let mut accepted = 0;
        while accepted < 2 {
            if let Submission::Enqueued = pipeline
                .submit(Record::new("t", "fill"), Duration::from_secs(1))
                .await
                .unwrap()
            {
                accepted += 1;
            }
            tokio::task::yield_now().await;
        }

        let timed_out = pipeline.counts().timed_out;
        let before = tokio::time::Instant::now();
        let submission = pipeline
            .submit(Record::new("t", "late"), Duration::ZERO)
            .await
            .unwrap();
        assert!(matches!(submission, Submission::TimedOut(ref r) if r.payload == b"late"));
        assert_eq!(tokio::time::Instant::now(), before);
        assert_eq!(pipeline.counts().timed_out, timed_out + 1);
    }

    #[tokio::test]
    async fn submit_after_dispatcher_gone_is_closed() {
        let sink = Arc::new(PickySink { next_offset: AtomicU64::new(0) });
        let (mut pipeline, streams) = DeliveryPipeline::spawn(sink, &config(4, 1)).unwrap();
        drop(streams);
        pipeline.dispatcher.abort();
        let _ = (&mut pipeline.dispatcher).await;

        let err = pipeline
            .submit(Record::new("t", "x"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Closed(r) if r.topic == "t"));
    }

    #[test]
    fn spawn_rejects_invalid_config() {
        let cfg = ProducerConfig { max_in_flight: 0, ..ProducerConfig::default() };
        let sink = Arc::new(StuckSink);
        assert!(matches!(DeliveryPipeline::spawn(sink, &cfg), Err(PipelineError::Config(_))));
    }
}
