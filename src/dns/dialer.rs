//! Staggered dialer.
//!
//! Implements the [`Dial`] hook a stub resolver calls for every query. The
//! network and address it is handed are ignored: instead the dialer opens a
//! UDP connection to every nameserver of the OS resolver configuration and
//! returns them wrapped in a [`FanoutConnection`], primary first.
//!
//! The configuration is loaded on first use and kept for the dialer's
//! lifetime; connections are never reused across queries.

use super::scutil::{ConfigSource, ResolverConfig};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::{BoxedDatagram, Escalation, FanoutConnection, UdpConnect};
use futures::future::{self, BoxFuture};
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

pub type DialFuture<'a> = BoxFuture<'a, Result<BoxedDatagram, NetError>>;

/// Custom dial hook: produce a connection for one DNS exchange.
pub trait Dial: Send + Sync {
    fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> DialFuture<'a>;
}

impl<D: Dial + ?Sized> Dial for Arc<D> {
    fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> DialFuture<'a> {
        (**self).dial(network, address)
    }
}

/// Staggering and timeout settings for [`StaggeredDialer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialerConfig {
    /// Head start of the first nameserver before the second joins.
    /// `None` never enables more than the first.
    pub initial_delay: Option<Duration>,
    /// Gap between enabling each further nameserver.
    pub interval: Duration,
    /// Upper bound on opening the connections.
    pub dial_timeout: Duration,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Some(Duration::from_millis(150)),
            interval: Duration::from_millis(100),
            dial_timeout: Duration::from_secs(2),
        }
    }
}

impl DialerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only ever use the first nameserver.
    pub fn never_escalate() -> Self {
        Self { initial_delay: None, ..Default::default() }
    }

    /// Query every nameserver at once.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Some(Duration::ZERO),
            interval: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn escalation(&self) -> Escalation {
        match self.initial_delay {
            None => Escalation::Never,
            Some(delay) if delay.is_zero() && self.interval.is_zero() => Escalation::Immediate,
            Some(delay) => Escalation::ticker(delay, self.interval),
        }
    }
}

/// Dials every configured nameserver at once, staggering their use.
pub struct StaggeredDialer {
    source: Arc<dyn ConfigSource>,
    config: OnceCell<Arc<ResolverConfig>>,
    settings: DialerConfig,
}

impl StaggeredDialer {
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            config: OnceCell::new(),
            settings: DialerConfig::default(),
        }
    }

    pub fn with_config(mut self, settings: DialerConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &DialerConfig {
        &self.settings
    }

    /// The resolver configuration, loaded once.
    ///
    /// Concurrent first calls share a single load. A failed load is not
    /// cached; the next call tries again.
    pub async fn config(&self) -> Result<Arc<ResolverConfig>, NetError> {
        self.config
            .get_or_try_init(|| async {
                let config = ResolverConfig::load(self.source.as_ref()).await?;
                Ok::<_, NetError>(Arc::new(config))
            })
            .await
            .cloned()
    }

    /// Open a fan-out connection over all nameservers.
    pub async fn dial_fanout(&self) -> Result<FanoutConnection, NetError> {
        tokio::time::timeout(self.settings.dial_timeout, self.open())
            .await
            .map_err(|_| NetError::ConnectionTimedOut)?
    }

    async fn open(&self) -> Result<FanoutConnection, NetError> {
        let config = self.config().await?;
        let targets = nameserver_targets(&config);
        if targets.is_empty() {
            return Err(NetError::NoNameservers);
        }

        let results = future::join_all(targets.iter().map(|(ns, addr)| async move {
            match addr {
                Some(addr) => UdpConnect::new(*addr).connect().await.nameserver_context(ns),
                None => Err(NetError::nameserver_failed(
                    ns.as_str(),
                    io::Error::new(io::ErrorKind::InvalidInput, "not an IP address"),
                )),
            }
        }))
        .await;

        let mut conns: Vec<BoxedDatagram> = Vec::with_capacity(targets.len());
        let mut last_err = None;
        for result in results {
            match result {
                Ok(conn) => conns.push(Box::new(conn)),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping nameserver");
                    last_err = Some(err);
                }
            }
        }

        if conns.is_empty() {
            let err = last_err
                .map_or_else(|| io::Error::from(io::ErrorKind::NotConnected), io::Error::from);
            return Err(NetError::all_failed("dial", targets.len(), err));
        }

        tracing::debug!(
            connections = conns.len(),
            escalation = ?self.settings.escalation(),
            "dialed nameservers"
        );
        Ok(FanoutConnection::new(conns, self.settings.escalation()))
    }
}

/// Flattened nameserver list; a destination listed twice is dialed once.
fn nameserver_targets(config: &ResolverConfig) -> Vec<(String, Option<SocketAddr>)> {
    let mut seen = HashSet::new();
    config
        .nameservers()
        .map(|(resolver, ns)| (ns.to_string(), resolver.socket_addr(ns)))
        .filter(|(_, addr)| addr.map_or(true, |addr| seen.insert(addr)))
        .collect()
}

impl Dial for StaggeredDialer {
    fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> DialFuture<'a> {
        Box::pin(async move {
            tracing::trace!(network, address, "dial hook invoked");
            let conn = self.dial_fanout().await?;
            Ok(Box::new(conn) as BoxedDatagram)
        })
    }
}

impl std::fmt::Debug for StaggeredDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaggeredDialer")
            .field("settings", &self.settings)
            .field("loaded", &self.config.initialized())
            .finish_non_exhaustive()
    }
}
