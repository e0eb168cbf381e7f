use std::fmt;

/// Error kind for broker errors.
///
/// The kind decides what the caller does next: fail fast, retry the same
/// request, or count the failure and move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid client configuration. Permanent.
    Config,
    /// Broker unreachable, connection reset, leader not available. Transient.
    Connectivity,
    /// Broker rejected or failed to persist a record.
    Delivery,
    /// Request rejected by validation (locally or by the broker).
    Validation,
    /// Not found, already exists, invalid state.
    Logic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Connectivity => f.write_str("connectivity"),
            ErrorKind::Delivery => f.write_str("delivery"),
            ErrorKind::Validation => f.write_str("validation"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Broker error returned by all collaborator trait methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Connectivity, message: msg.into() }
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Delivery, message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Validation, message: msg.into() }
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Only connectivity errors are worth repeating the same request for.
    pub fn is_retriable(&self) -> bool {
        self.kind == ErrorKind::Connectivity
    }

    /// Configuration errors stop long-running loops.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Config
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BrokerError {}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        Self::connectivity(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = BrokerError::connectivity("connection refused").with_context("broker 1");
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert_eq!(err.message, "broker 1: connection refused");
        assert!(err.is_retriable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn only_config_is_fatal() {
        assert!(BrokerError::config("bad acks").is_fatal());
        assert!(!BrokerError::delivery("record too large").is_fatal());
        assert!(!BrokerError::delivery("record too large").is_retriable());
    }
}
