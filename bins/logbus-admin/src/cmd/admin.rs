use std::time::Duration;

use tokio_util::sync::CancellationToken;

use logbus_api::ClusterAdmin;
use logbus_engine::Backend;
use logbus_engine::admin::{
    TopicSpec, create_topic, delete_topic, increase_partitions, topic_detail, update_min_isr,
    watch_replica_health,
};

use super::backend::cluster_admin;
use super::config::{Effective, Operation};
use super::error::AdminCliError;
use super::report;

/// Time a real cluster needs to propagate new topic metadata.
const METADATA_SETTLE: Duration = Duration::from_secs(2);

pub async fn run(args: &Effective) -> Result<(), AdminCliError> {
    let admin = cluster_admin(&args.config)?;
    let admin = admin.as_ref();

    match args.operation {
        Operation::Create => {
            let spec = TopicSpec::new(&args.topic, args.partitions, args.replication, args.min_isr);
            create_topic(admin, &spec).await?;
            report::print_created(&args.topic, args.partitions, args.replication, args.min_isr);
            settle(args).await;
            list(admin, &args.topic).await
        }
        Operation::List => list(admin, &args.topic).await,
        Operation::Increase => {
            increase_partitions(admin, &args.topic, args.partitions).await?;
            println!("Topic '{}' now has {} partitions", args.topic, args.partitions);
            settle(args).await;
            list(admin, &args.topic).await
        }
        Operation::Delete => {
            delete_topic(admin, &args.topic).await?;
            println!("Deleted topic '{}'", args.topic);
            Ok(())
        }
        Operation::CheckReplica => check_replica(admin, args).await,
        Operation::UpdateIsr => {
            update_min_isr(admin, &args.topic, args.min_isr).await?;
            println!("Set min.insync.replicas of '{}' to {}", args.topic, args.min_isr);
            list(admin, &args.topic).await
        }
    }
}

async fn list(admin: &dyn ClusterAdmin, topic: &str) -> Result<(), AdminCliError> {
    let description = topic_detail(admin, topic).await?;
    report::print_description(description.as_ref(), topic);
    Ok(())
}

async fn check_replica(admin: &dyn ClusterAdmin, args: &Effective) -> Result<(), AdminCliError> {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down...");
        }
        on_signal.cancel();
    });

    let interval = args.check_interval;
    let checks = watch_replica_health(admin, &args.topic, args.min_isr, interval, &token, |health| {
        report::print_health(health);
        if !interval.is_zero() {
            println!("\nNext check in {} s...", interval.as_secs());
        }
    })
    .await?;
    tracing::debug!(topic = %args.topic, checks, "replica health check finished");
    Ok(())
}

async fn settle(args: &Effective) {
    if args.config.backend == Backend::Kafka {
        tokio::time::sleep(METADATA_SETTLE).await;
    }
}
