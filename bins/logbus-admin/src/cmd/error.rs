use logbus_api::BrokerError;
use logbus_engine::{AdminError, ConfigError};

#[derive(Debug, thiserror::Error)]
pub enum AdminCliError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Admin(#[from] AdminError),

    #[error("{0}")]
    Broker(#[from] BrokerError),
}
