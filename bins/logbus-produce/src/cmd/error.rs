use logbus_api::BrokerError;
use logbus_engine::{ConfigError, PipelineError};

#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("{0}")]
    Broker(#[from] BrokerError),

    #[error("{0}")]
    Payload(#[from] serde_json::Error),
}
