use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use logbus_api::StartOffset;
use logbus_engine::{
    ClaimLoop, GroupRunner, LogProcessor, MessageProcessor,
    partition::{consume_all_partitions, consume_partition},
};

use super::backend::Cluster;
use super::config::{Effective, Mode};
use super::error::ConsumeError;

pub async fn run(args: &Effective) -> Result<(), ConsumeError> {
    let cluster = Cluster::connect(&args.config, &args.topic).await?;

    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down...");
        }
        on_signal.cancel();
    });

    match args.mode {
        Mode::Partition => run_partition(args, &cluster, &token).await,
        Mode::Partitions => run_partitions(args, &cluster, token).await,
        Mode::Group => run_group(args, &cluster, token).await,
    }
}

// ═══════════════════════════════════════════════════════════════
//  Partition consumers
// ═══════════════════════════════════════════════════════════════

async fn run_partition(
    args: &Effective,
    cluster: &Cluster,
    token: &CancellationToken,
) -> Result<(), ConsumeError> {
    let consumer = cluster.partition_consumer();
    let processor = LogProcessor::new(args.config.consumer.name.clone());
    let consumed = consume_partition(
        consumer.as_ref(),
        &args.topic,
        args.partition,
        StartOffset::Oldest,
        &processor,
        token,
    )
    .await?;
    tracing::info!(topic = %args.topic, partition = args.partition, consumed, "partition consumer done");
    Ok(())
}

async fn run_partitions(
    args: &Effective,
    cluster: &Cluster,
    token: CancellationToken,
) -> Result<(), ConsumeError> {
    let processor: Arc<dyn MessageProcessor> =
        Arc::new(LogProcessor::new(args.config.consumer.name.clone()));
    let consumed = consume_all_partitions(
        cluster.partition_consumer(),
        &args.topic,
        StartOffset::Oldest,
        processor,
        token,
    )
    .await?;
    for (partition, count) in &consumed {
        tracing::info!(topic = %args.topic, partition, consumed = count, "partition consumer done");
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Consumer group
// ═══════════════════════════════════════════════════════════════

async fn run_group(
    args: &Effective,
    cluster: &Cluster,
    token: CancellationToken,
) -> Result<(), ConsumeError> {
    let consumer_cfg = &args.config.consumer;
    let consumer = cluster.group_consumer(&args.config)?;
    let handler = Arc::new(ClaimLoop::new(
        consumer_cfg.name.clone(),
        consumer_cfg.progress_every,
        LogProcessor::new(consumer_cfg.name.clone()),
    ));

    tracing::info!(name = %consumer_cfg.name, group = %consumer_cfg.group, topic = %args.topic, "running");
    let runner = GroupRunner::new(
        consumer,
        vec![args.topic.clone()],
        handler.clone(),
        consumer_cfg.clone(),
    );
    runner.run(token).await?;

    tracing::info!(name = %consumer_cfg.name, consumed = handler.progress().count(), "group member stopped");
    Ok(())
}
