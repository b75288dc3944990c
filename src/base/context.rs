//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors into context-rich `NetError` variants.

use crate::base::neterror::NetError;
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Add nameserver context to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use fanoutdns::base::context::IoResultExt;
    ///
    /// let conn = UdpConnect::new(addr).connect().await
    ///     .nameserver_context("8.8.8.8:53")?;
    /// // Error: "Connection to nameserver 8.8.8.8:53 failed: network unreachable"
    /// ```
    fn nameserver_context(self, addr: &str) -> Result<T, NetError>;

    /// Add DNS resolution context to an IO error.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;

    /// Mark an IO error as a failure to obtain resolver configuration.
    fn config_context(self) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn nameserver_context(self, addr: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::nameserver_failed(addr, e))
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(domain, e))
    }

    fn config_context(self) -> Result<T, NetError> {
        self.map_err(NetError::config_unavailable)
    }
}
