use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Configuration Errors
    #[error("Resolver configuration unavailable: {source}")]
    ConfigUnavailable { source: Arc<io::Error> },
    #[error("Resolver configuration lists no nameservers")]
    NoNameservers,
    #[error("Resolver configuration source not available on this platform")]
    Unsupported,

    // Connection Errors
    #[error("{op}: all {attempted} connections failed: {source}")]
    AllConnectionsFailed {
        op: &'static str,
        attempted: usize,
        source: Arc<io::Error>,
    },
    #[error("Connection to nameserver {addr} failed: {source}")]
    NameserverFailed { addr: String, source: Arc<io::Error> },
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timed out")]
    ConnectionTimedOut,

    // Resolution Errors
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Could not resolve {domain}: {source}")]
    NameNotResolvedFor { domain: String, source: Arc<io::Error> },
    #[error("Invalid DNS response")]
    InvalidResponse,
}

impl NetError {
    /// Aggregate error for an operation that failed on every candidate.
    pub fn all_failed(op: &'static str, attempted: usize, source: io::Error) -> Self {
        NetError::AllConnectionsFailed { op, attempted, source: Arc::new(source) }
    }

    pub fn config_unavailable(source: io::Error) -> Self {
        NetError::ConfigUnavailable { source: Arc::new(source) }
    }

    pub fn nameserver_failed(addr: impl Into<String>, source: io::Error) -> Self {
        NetError::NameserverFailed { addr: addr.into(), source: Arc::new(source) }
    }

    pub fn dns_failed(domain: impl Into<String>, source: io::Error) -> Self {
        NetError::NameNotResolvedFor { domain: domain.into(), source: Arc::new(source) }
    }

    /// Returns the operation name if this is an all-connections-failed error.
    pub fn failed_op(&self) -> Option<&'static str> {
        match self {
            NetError::AllConnectionsFailed { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// The `io::ErrorKind` that best describes this error when it has to
    /// travel through an `io::Error`.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            NetError::ConfigUnavailable { source }
            | NetError::AllConnectionsFailed { source, .. }
            | NetError::NameserverFailed { source, .. }
            | NetError::NameNotResolvedFor { source, .. } => source.kind(),
            NetError::NoNameservers | NetError::NameNotResolved => io::ErrorKind::NotFound,
            NetError::Unsupported => io::ErrorKind::Unsupported,
            NetError::ConnectionClosed => io::ErrorKind::NotConnected,
            NetError::ConnectionTimedOut => io::ErrorKind::TimedOut,
            NetError::InvalidResponse => io::ErrorKind::InvalidData,
        }
    }

    /// Recover a `NetError` carried inside an `io::Error`.
    pub fn from_io_ref(err: &io::Error) -> Option<&NetError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<NetError>())
    }
}

impl From<NetError> for io::Error {
    fn from(err: NetError) -> Self {
        io::Error::new(err.kind(), err)
    }
}
