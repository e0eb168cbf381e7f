use logbus_api::BrokerError;
use logbus_engine::{ConfigError, GroupError};

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Broker(#[from] BrokerError),

    #[error("{0}")]
    Group(#[from] GroupError),
}
