//! Platform default resolver.
//!
//! Hands names to the operating system's `getaddrinfo` on the blocking
//! thread pool. Used directly off macOS, and as the fallback of the stub
//! resolver when the fan-out dialer cannot produce a connection.

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
};

/// Resolves through `getaddrinfo` in `spawn_blocking`.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    pub fn new() -> Self {
        Self
    }
}

fn lookup(host: &str) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<_> = (host, 0u16).to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses returned by getaddrinfo",
        ));
    }
    Ok(addrs)
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            if let Some(ip) = name.ip_literal() {
                return Ok(Box::new(std::iter::once(SocketAddr::new(ip, 0))) as Addrs);
            }

            let host = name.as_str().to_string();
            let addrs = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                lookup(&host)
            })
            .await
            // Join error: the blocking task panicked or was cancelled.
            .map_err(|e| {
                tracing::error!(error = %e, "getaddrinfo task failed");
                NetError::NameNotResolved
            })?
            .dns_context(name.as_str())
            .inspect_err(|e| tracing::debug!(error = %e, "getaddrinfo failed"))?;

            tracing::debug!(domain = %name, count = addrs.len(), "getaddrinfo complete");
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}
