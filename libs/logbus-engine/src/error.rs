use logbus_api::{BrokerError, Record};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The dispatcher is gone; the record was not enqueued.
    #[error("delivery pipeline closed, record for topic '{}' not accepted", .0.topic)]
    Closed(Box<Record>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// Rejected before any broker call.
    #[error("validation: {0}")]
    Validation(String),

    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),
}

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("group '{group}' stopped: {source}")]
    Fatal { group: String, source: BrokerError },
}
