use serde::Serialize;

use logbus_api::{DeliveryOutcome, Record};
use logbus_engine::{
    DeliveryPipeline, DeliveryReport, Submission, SyncProducer, drain_outcomes,
};

use super::backend::record_sink;
use super::config::{Effective, Mode};
use super::error::ProduceError;

/// Submission progress is logged every this many records in async mode.
const ASYNC_LOG_EVERY: u64 = 500;

fn progress_due(submitted: u64) -> bool {
    submitted > 0 && submitted % ASYNC_LOG_EVERY == 0
}

pub async fn run(args: &Effective) -> Result<(), ProduceError> {
    match args.mode {
        Mode::Sync => run_sync(args).await,
        Mode::Async => run_async(args).await,
        Mode::Idempotent => run_idempotent(args).await,
    }
}

/// Local wall-clock time with milliseconds, the payload of every demo record.
fn time_str() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

// ═══════════════════════════════════════════════════════════════
//  Sync
// ═══════════════════════════════════════════════════════════════

async fn run_sync(args: &Effective) -> Result<(), ProduceError> {
    let sink = record_sink(&args.config)?;
    let mut producer = SyncProducer::new(sink, &args.config.producer)?;

    let topic = args.topic.clone();
    let records = (0..args.count).map(move |_| Record::new(topic.clone(), time_str()).with_partition(0));
    let tally = producer.send_all(records).await;
    producer.close().await;

    tracing::info!(
        total = tally.total(),
        successes = tally.successes,
        errors = tally.errors,
        "sync produce finished"
    );
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Async
// ═══════════════════════════════════════════════════════════════

async fn run_async(args: &Effective) -> Result<(), ProduceError> {
    let sink = record_sink(&args.config)?;
    let (mut pipeline, streams) = DeliveryPipeline::spawn(sink, &args.config.producer)?;
    let drain = drain_outcomes(streams);
    let deadline = args.config.producer.submit_timeout();

    for i in 0..args.count {
        let record = Record::new(args.topic.clone(), time_str()).with_partition(0);
        if let Submission::TimedOut(record) = pipeline.submit(record, deadline).await? {
            tracing::debug!(topic = %record.topic, "submit timed out, record dropped");
        }
        let submitted = i + 1;
        if progress_due(submitted) {
            let counts = pipeline.counts();
            tracing::info!(submitted, timed_out = counts.timed_out, "async produce progress");
        }
    }

    let counts = pipeline.close();
    let drained = drain.join().await;
    let report = DeliveryReport::new(counts, &drained);
    tracing::info!(
        total = report.submitted(),
        enqueued = report.enqueued,
        timed_out = report.timed_out,
        successes = report.succeeded,
        errors = report.failed,
        reconciled = report.is_reconciled(),
        "async produce finished"
    );
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Idempotent
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct Person {
    name: &'static str,
    age: u32,
}

/// Keyed JSON records through an idempotent producer. Stops at the first
/// record that is not delivered.
async fn run_idempotent(args: &Effective) -> Result<(), ProduceError> {
    let sink = record_sink(&args.config)?;
    let mut producer = SyncProducer::new(sink, &args.config.producer)?;
    let payload = serde_json::to_vec(&Person { name: "yst", age: 10 })?;

    let mut delivered = 0u64;
    for _ in 0..args.count {
        let key = time_str();
        let record = Record::new(args.topic.clone(), payload.clone()).with_key(key.clone());
        match producer.send(record).await {
            DeliveryOutcome::Success { partition, offset } => {
                delivered += 1;
                tracing::info!(partition, offset, %key, "record delivered");
            }
            DeliveryOutcome::Failure { cause, .. } => {
                tracing::error!(%key, error = %cause, "idempotent send failed, stopping");
                break;
            }
            DeliveryOutcome::TimedOut { .. } => {
                tracing::error!(%key, "idempotent send timed out, stopping");
                break;
            }
        }
    }
    producer.close().await;

    tracing::info!(total = args.count, delivered, "idempotent produce finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_logged_after_each_full_batch() {
        let due: Vec<u64> = (1..=1500).filter(|n| progress_due(*n)).collect();
        assert_eq!(due, vec![500, 1000, 1500]);
        assert!(!progress_due(0));
    }
}
