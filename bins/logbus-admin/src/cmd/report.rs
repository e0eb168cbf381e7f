use logbus_engine::admin::{TopicDescription, TopicHealth};

pub fn print_created(name: &str, partitions: i32, replication: i16, min_isr: i16) {
    println!("Created topic '{name}'");
    println!("- partitions: {partitions}");
    println!("- replication factor: {replication}");
    println!("- min.insync.replicas: {min_isr}");
}

pub fn print_description(description: Option<&TopicDescription>, name: &str) {
    let Some(d) = description else {
        println!("Topic '{name}' does not exist");
        return;
    };

    println!("\nTopic: {}", d.name);
    println!("Partitions: {}", d.detail.partitions);
    println!("Replication factor: {}", d.detail.replication_factor);
    for (key, value) in &d.detail.config {
        println!("  {key} = {value}");
    }

    println!("\nPartition placement:");
    for p in &d.metadata.partitions {
        println!("Partition {}:", p.id);
        match p.leader {
            Some(leader) => println!("  - leader: broker {leader}"),
            None => println!("  - leader: none"),
        }
        println!("  - replicas: {:?}", p.replicas);
        println!("  - in sync: {:?}", p.isr);
    }
}

pub fn print_health(health: &TopicHealth) {
    println!("\n=== Replica health ===");
    println!(
        "Topic: {} (replication factor: {}, min.insync.replicas: {})",
        health.name, health.replication_factor, health.min_isr
    );

    for p in &health.partitions {
        println!("\nPartition {}:", p.id);
        match p.leader {
            Some(leader) => println!("  OK   leader on broker {leader}"),
            None => println!("  WARN partition has no leader"),
        }
        println!("  replicas:");
        for r in &p.replicas {
            if r.in_sync {
                println!("    OK   broker {}: in sync", r.broker);
            } else {
                println!("    FAIL broker {}: out of sync", r.broker);
            }
        }
        if p.meets_min_isr {
            println!("  OK   in-sync replicas meet the minimum");
        } else {
            println!(
                "  WARN in-sync replicas ({}) below minimum ({})",
                p.isr.len(),
                health.min_isr
            );
        }
    }
}
