use std::time::Duration;

use serde::Deserialize;

use logbus_api::{Acks, StartOffset};

use crate::error::ConfigError;

/// Which broker binding the demos talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process broker, no network.
    #[default]
    Memory,
    /// librdkafka client against `brokers`.
    Kafka,
}

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,

    /// Bootstrap servers (`host:port`).
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub producer: ProducerConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_brokers() -> Vec<String> {
    vec!["127.0.0.1:9092".into()]
}
fn default_client_id() -> String {
    "logbus".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            brokers: default_brokers(),
            client_id: default_client_id(),
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Capacity of the outbound channel (and of each outcome stream).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Per-record wait for the outbound channel to accept a record.
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    /// Concurrent unacknowledged sends.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Exactly-once per session. Requires `acks = "all"`.
    #[serde(default)]
    pub idempotent: bool,
    #[serde(default)]
    pub acks: Acks,
    /// Retries for connectivity errors before a record counts as failed.
    #[serde(default = "default_retry_max")]
    pub retry_max: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_channel_capacity() -> usize {
    256
}
fn default_submit_timeout_ms() -> u64 {
    1000
}
fn default_max_in_flight() -> usize {
    5
}
fn default_retry_max() -> usize {
    3
}
fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            submit_timeout_ms: default_submit_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            idempotent: false,
            acks: Acks::default(),
            retry_max: default_retry_max(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ProducerConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Idempotent delivery allows a single in-flight send.
    pub fn effective_max_in_flight(&self) -> usize {
        if self.idempotent { 1 } else { self.max_in_flight }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("producer.channel_capacity must be > 0".into()));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("producer.max_in_flight must be > 0".into()));
        }
        if self.idempotent && self.acks != Acks::All {
            return Err(ConfigError::Invalid(
                "producer.idempotent requires acks = \"all\"".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_group")]
    pub group: String,
    /// Member name used in logs.
    #[serde(default = "default_consumer_name")]
    pub name: String,
    #[serde(default)]
    pub offset_reset: StartOffset,
    /// Log a progress marker every N acknowledged messages.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    #[serde(default = "default_rejoin_backoff_min_ms")]
    pub rejoin_backoff_min_ms: u64,
    #[serde(default = "default_rejoin_backoff_max_ms")]
    pub rejoin_backoff_max_ms: u64,
}

fn default_group() -> String {
    "my-group".into()
}
fn default_consumer_name() -> String {
    "consumer-1".into()
}
fn default_progress_every() -> u64 {
    10_000
}
fn default_rejoin_backoff_min_ms() -> u64 {
    100
}
fn default_rejoin_backoff_max_ms() -> u64 {
    5000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            name: default_consumer_name(),
            offset_reset: StartOffset::default(),
            progress_every: default_progress_every(),
            rejoin_backoff_min_ms: default_rejoin_backoff_min_ms(),
            rejoin_backoff_max_ms: default_rejoin_backoff_max_ms(),
        }
    }
}

impl ConsumerConfig {
    pub fn rejoin_backoff_min(&self) -> Duration {
        Duration::from_millis(self.rejoin_backoff_min_ms)
    }

    pub fn rejoin_backoff_max(&self) -> Duration {
        Duration::from_millis(self.rejoin_backoff_max_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group.is_empty() {
            return Err(ConfigError::Invalid("consumer.group must not be empty".into()));
        }
        if self.progress_every == 0 {
            return Err(ConfigError::Invalid("consumer.progress_every must be > 0".into()));
        }
        if self.rejoin_backoff_min_ms > self.rejoin_backoff_max_ms {
            return Err(ConfigError::Invalid(
                "consumer.rejoin_backoff_min_ms must not exceed rejoin_backoff_max_ms".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Number of simulated brokers (ids start at 1).
    #[serde(default = "default_memory_brokers")]
    pub brokers: i32,
    /// Partitions of auto-created topics.
    #[serde(default = "default_memory_partitions")]
    pub partitions: i32,
    /// Records published to the consumed topic before a consume demo starts.
    #[serde(default)]
    pub seed_records: usize,
}

fn default_memory_brokers() -> i32 {
    3
}
fn default_memory_partitions() -> i32 {
    3
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            brokers: default_memory_brokers(),
            partitions: default_memory_partitions(),
            seed_records: 0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> Result<Self, ConfigError> {
        if !std::path::Path::new(path).exists() {
            tracing::debug!(config = %path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == Backend::Kafka && self.brokers.is_empty() {
            return Err(ConfigError::Invalid("kafka backend requires at least one broker".into()));
        }
        if self.memory.brokers < 1 || self.memory.partitions < 1 {
            return Err(ConfigError::Invalid(
                "memory.brokers and memory.partitions must be > 0".into(),
            ));
        }
        self.producer.validate()?;
        self.consumer.validate()
    }
}
