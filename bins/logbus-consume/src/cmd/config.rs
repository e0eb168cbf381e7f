use clap::{Args, ValueEnum};

use logbus_engine::Config;

use super::error::ConsumeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// A single partition, read from the oldest offset.
    Partition,
    /// Every partition of the topic, one task each.
    Partitions,
    /// Consumer-group member with rebalancing and committed offsets.
    Group,
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct ConsumeArgs {
    /// Path to logbus.toml
    #[arg(long, default_value = "logbus.toml", env = "LOGBUS_CONFIG")]
    pub config: String,

    #[arg(long, value_enum, default_value = "group", env = "LOGBUS_CONSUME_MODE")]
    pub mode: Mode,

    #[arg(long, default_value = "test-topic", env = "LOGBUS_TOPIC")]
    pub topic: String,

    /// Partition read in `partition` mode
    #[arg(long, default_value_t = 0, env = "LOGBUS_PARTITION")]
    pub partition: i32,

    /// Consumer group (overrides consumer.group)
    #[arg(long, env = "LOGBUS_GROUP")]
    pub group: Option<String>,

    /// Member name used in logs (overrides consumer.name)
    #[arg(long, env = "LOGBUS_NAME")]
    pub name: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

pub struct Effective {
    pub mode: Mode,
    pub topic: String,
    pub partition: i32,
    pub config: Config,
}

impl Effective {
    pub fn new(args: &ConsumeArgs) -> Result<Self, ConsumeError> {
        let mut config = Config::load_or_default(&args.config)?;
        if let Some(group) = &args.group {
            config.consumer.group = group.clone();
        }
        if let Some(name) = &args.name {
            config.consumer.name = name.clone();
        }
        config.validate()?;

        Ok(Self {
            mode: args.mode,
            topic: args.topic.clone(),
            partition: args.partition,
            config,
        })
    }
}
