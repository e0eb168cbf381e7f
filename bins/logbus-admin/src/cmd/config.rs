use std::str::FromStr;
use std::time::Duration;

use clap::Args;

use logbus_engine::Config;

use super::error::AdminCliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    List,
    Increase,
    Delete,
    CheckReplica,
    UpdateIsr,
}

impl FromStr for Operation {
    type Err = AdminCliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "list" => Ok(Operation::List),
            "increase" => Ok(Operation::Increase),
            "delete" => Ok(Operation::Delete),
            "check-replica" => Ok(Operation::CheckReplica),
            "update-isr" => Ok(Operation::UpdateIsr),
            other => Err(AdminCliError::UnknownOperation(other.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct AdminArgs {
    /// Path to logbus.toml
    #[arg(long, default_value = "logbus.toml", env = "LOGBUS_CONFIG")]
    pub config: String,

    #[arg(long, default_value = "partition-test-topic", env = "LOGBUS_TOPIC")]
    pub topic: String,

    /// Partition count (create) or new total (increase)
    #[arg(long, default_value_t = 3, env = "LOGBUS_PARTITIONS")]
    pub partitions: i32,

    /// Copies of every partition, leader included
    #[arg(long, default_value_t = 3, env = "LOGBUS_REPLICATION")]
    pub replication: i16,

    /// Replicas that must stay in sync for a write to succeed
    #[arg(long, default_value_t = 2, env = "LOGBUS_MIN_ISR")]
    pub min_isr: i16,

    /// Seconds between replica health checks (0 = check once)
    #[arg(long, default_value_t = 10, env = "LOGBUS_CHECK_INTERVAL")]
    pub check_interval: u64,

    /// create | list | increase | delete | check-replica | update-isr
    #[arg(long, default_value = "create", env = "LOGBUS_ADMIN_OPERATION")]
    pub operation: String,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

pub struct Effective {
    pub operation: Operation,
    pub topic: String,
    pub partitions: i32,
    pub replication: i16,
    pub min_isr: i16,
    pub check_interval: Duration,
    pub config: Config,
}

impl Effective {
    pub fn new(args: &AdminArgs) -> Result<Self, AdminCliError> {
        let operation = args.operation.parse()?;
        let config = Config::load_or_default(&args.config)?;
        config.validate()?;

        Ok(Self {
            operation,
            topic: args.topic.clone(),
            partitions: args.partitions,
            replication: args.replication,
            min_isr: args.min_isr,
            check_interval: Duration::from_secs(args.check_interval),
            config,
        })
    }
}
