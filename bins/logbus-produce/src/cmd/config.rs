use clap::{Args, ValueEnum};

use logbus_engine::Config;

use super::error::ProduceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One record at a time, waiting for each acknowledgment.
    Sync,
    /// Bounded submit through the delivery pipeline.
    Async,
    /// Keyed JSON records through an idempotent sync producer.
    Idempotent,
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct ProduceArgs {
    /// Path to logbus.toml
    #[arg(long, default_value = "logbus.toml", env = "LOGBUS_CONFIG")]
    pub config: String,

    #[arg(long, value_enum, default_value = "sync", env = "LOGBUS_PRODUCE_MODE")]
    pub mode: Mode,

    #[arg(long, default_value = "test-topic", env = "LOGBUS_TOPIC")]
    pub topic: String,

    /// Records to publish (idempotent mode defaults to 10)
    #[arg(long, env = "LOGBUS_COUNT")]
    pub count: Option<u64>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

pub struct Effective {
    pub mode: Mode,
    pub topic: String,
    pub count: u64,
    pub config: Config,
}

impl Effective {
    pub fn new(args: &ProduceArgs) -> Result<Self, ProduceError> {
        let mut config = Config::load_or_default(&args.config)?;
        if args.mode == Mode::Idempotent {
            config.producer.idempotent = true;
            config.producer.acks = logbus_api::Acks::All;
        }
        config.validate()?;

        let count = args.count.unwrap_or(match args.mode {
            Mode::Idempotent => 10,
            Mode::Sync | Mode::Async => 1000,
        });

        Ok(Self {
            mode: args.mode,
            topic: args.topic.clone(),
            count,
            config,
        })
    }
}
