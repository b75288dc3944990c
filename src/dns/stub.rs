//! Minimal stub resolver driven by a [`Dial`] hook.
//!
//! Every lookup dials two connections through the hook, one for the `A`
//! question and one for `AAAA`, and runs both exchanges concurrently. A
//! family that fails or times out is dropped as long as the other one
//! produced addresses. The hook decides where the packets actually go; the network and address it
//! is given are placeholders.
//!
//! Messages are encoded with the `hickory-resolver` protocol types. No
//! search-domain expansion, caching, or TCP retry on truncation is done.

use super::dialer::Dial;
use super::{Addrs, Name, Resolve, Resolving};
use crate::base::neterror::NetError;
use crate::socket::{BoxedDatagram, DatagramSocket};
use futures::future;
use std::future::Future;
use hickory_resolver::proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_resolver::proto::rr::{Name as DnsName, RecordType};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Network handed to the dial hook.
pub const STUB_NETWORK: &str = "udp";
/// Address handed to the dial hook. Hooks that fan out ignore it.
pub const STUB_ADDRESS: &str = "127.0.0.1:53";

/// Largest response accepted over UDP.
const MAX_RESPONSE_SIZE: usize = 4096;

/// Timeout and retry settings for [`StubResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubResolverConfig {
    /// Bound on each question of an attempt; both run concurrently.
    pub timeout: Duration,
    /// Attempts before giving up; each dials fresh connections.
    pub attempts: usize,
}

impl Default for StubResolverConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(5), attempts: 2 }
    }
}

impl StubResolverConfig {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Resolver that queries whatever connection the dial hook returns.
#[derive(Clone)]
pub struct StubResolver {
    dialer: Arc<dyn Dial>,
    fallback: Option<Arc<dyn Resolve>>,
    config: StubResolverConfig,
}

impl StubResolver {
    pub fn new(dialer: impl Dial + 'static) -> Self {
        Self {
            dialer: Arc::new(dialer),
            fallback: None,
            config: StubResolverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: StubResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver used when the dial hook cannot produce a connection.
    pub fn with_fallback(mut self, fallback: impl Resolve + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn config(&self) -> &StubResolverConfig {
        &self.config
    }

    async fn lookup(&self, name: Name) -> Result<Addrs, NetError> {
        if let Some(ip) = name.ip_literal() {
            return Ok(Box::new(std::iter::once(SocketAddr::new(ip, 0))));
        }

        let qname = DnsName::from_ascii(name.fqdn()).map_err(|e| {
            NetError::dns_failed(
                name.as_str(),
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            )
        })?;

        let mut last = NetError::NameNotResolved;
        for attempt in 1..=self.config.attempts.max(1) {
            let (v4_conn, v6_conn) = match future::try_join(self.dial(), self.dial()).await {
                Ok(conns) => conns,
                Err(err) => return self.fall_back(name, err).await,
            };

            let (v4, v6) = future::join(
                self.bounded(exchange(v4_conn.as_ref(), &qname, RecordType::A)),
                self.bounded(exchange(v6_conn.as_ref(), &qname, RecordType::AAAA)),
            )
            .await;
            // Both connections are per-attempt.
            let _ = v4_conn.close();
            let _ = v6_conn.close();

            match merge(&name, v4, v6) {
                Ok(ips) => return addresses(&name, ips),
                Err(err) => {
                    tracing::debug!(domain = %name, attempt, error = %err, "DNS exchange failed");
                    last = err;
                }
            }
        }
        Err(last)
    }

    async fn bounded<F>(&self, exchange: F) -> Result<Vec<IpAddr>, NetError>
    where
        F: Future<Output = Result<Vec<IpAddr>, NetError>>,
    {
        tokio::time::timeout(self.config.timeout, exchange)
            .await
            .unwrap_or_else(|_| Err(NetError::ConnectionTimedOut))
    }

    async fn dial(&self) -> Result<BoxedDatagram, NetError> {
        self.dialer.dial(STUB_NETWORK, STUB_ADDRESS).await
    }

    async fn fall_back(&self, name: Name, err: NetError) -> Result<Addrs, NetError> {
        match &self.fallback {
            Some(fallback) => {
                tracing::warn!(domain = %name, error = %err, "dial hook failed, using fallback resolver");
                fallback.resolve(name).await
            }
            None => Err(err),
        }
    }
}

impl Resolve for StubResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let this = self.clone();
        Box::pin(async move { this.lookup(name).await })
    }
}

impl std::fmt::Debug for StubResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubResolver")
            .field("config", &self.config)
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

/// Combine the two families. A failed family is ignored when the other
/// returned addresses; when both failed, a timeout is reported only if
/// nothing more specific is available.
fn merge(
    name: &Name,
    v4: Result<Vec<IpAddr>, NetError>,
    v6: Result<Vec<IpAddr>, NetError>,
) -> Result<Vec<IpAddr>, NetError> {
    match (v4, v6) {
        (Ok(mut ips), Ok(v6)) => {
            ips.extend(v6);
            Ok(ips)
        }
        (Ok(ips), Err(err)) | (Err(err), Ok(ips)) if !ips.is_empty() => {
            tracing::debug!(domain = %name, error = %err, "one address family failed");
            Ok(ips)
        }
        (Ok(_), Err(err)) | (Err(err), Ok(_)) => Err(err),
        (Err(NetError::ConnectionTimedOut), Err(err)) | (Err(err), Err(_)) => Err(err),
    }
}

fn addresses(name: &Name, ips: Vec<IpAddr>) -> Result<Addrs, NetError> {
    if ips.is_empty() {
        return Err(NetError::dns_failed(
            name.as_str(),
            io::Error::new(io::ErrorKind::NotFound, "no A or AAAA records"),
        ));
    }
    tracing::debug!(domain = %name, count = ips.len(), "DNS resolution complete");
    Ok(Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0))))
}

/// One question, one answer. Replies with a foreign id or that fail to
/// parse are skipped.
async fn exchange(
    conn: &dyn DatagramSocket,
    qname: &DnsName,
    rtype: RecordType,
) -> Result<Vec<IpAddr>, NetError> {
    let id: u16 = rand::random();
    let mut query = Message::new();
    query
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(qname.clone(), rtype));
    let packet = query.to_vec().map_err(|_| NetError::InvalidResponse)?;

    conn.send(&packet).await.map_err(|e| into_net_error(conn, e))?;

    let mut buf = vec![0u8; MAX_RESPONSE_SIZE];
    loop {
        let n = conn.recv(&mut buf).await.map_err(|e| into_net_error(conn, e))?;
        let response = match Message::from_vec(&buf[..n]) {
            Ok(response) => response,
            Err(e) => {
                tracing::trace!(error = %e, "discarding malformed reply");
                continue;
            }
        };
        if response.id() != id || response.message_type() != MessageType::Response {
            tracing::trace!(expected = id, got = response.id(), "discarding unrelated reply");
            continue;
        }

        return match response.response_code() {
            ResponseCode::NoError | ResponseCode::NXDomain => Ok(response
                .answers()
                .iter()
                .filter(|record| record.record_type() == rtype)
                .filter_map(|record| record.data().ip_addr())
                .collect()),
            code => Err(NetError::dns_failed(
                qname.to_string(),
                io::Error::new(io::ErrorKind::Other, format!("server answered {code}")),
            )),
        };
    }
}

/// Errors from a fan-out connection already carry a `NetError`; anything
/// else is attributed to the peer.
fn into_net_error(conn: &dyn DatagramSocket, err: io::Error) -> NetError {
    if let Some(inner) = NetError::from_io_ref(&err) {
        return inner.clone();
    }
    if err.kind() == io::ErrorKind::TimedOut {
        return NetError::ConnectionTimedOut;
    }
    let peer = conn
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
    NetError::nameserver_failed(peer, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::dialer::DialFuture;
    use crate::socket::SocketFuture;
    use hickory_resolver::proto::rr::rdata::{A, AAAA};
    use hickory_resolver::proto::rr::{RData, Record};
    use std::collections::VecDeque;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Behavior {
        Answer,
        /// A reply with the wrong id precedes the real one.
        StrayFirst,
        Refuse,
        Silent,
        /// `A` is answered, `AAAA` gets SERVFAIL.
        FailAaaa,
        /// `A` is answered, `AAAA` never is.
        SilentAaaa,
    }

    #[derive(Debug)]
    struct FakeConn {
        ips: Vec<IpAddr>,
        behavior: Behavior,
        replies: Mutex<VecDeque<Vec<u8>>>,
    }

    fn reply(query: &Message, ips: &[IpAddr], code: ResponseCode) -> Vec<u8> {
        let mut resp = Message::new();
        resp.set_id(query.id())
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_response_code(code)
            .add_queries(query.queries().to_vec());
        let q = &query.queries()[0];
        for ip in ips {
            let rdata = match (ip, q.query_type()) {
                (IpAddr::V4(v4), RecordType::A) => RData::A(A::from(*v4)),
                (IpAddr::V6(v6), RecordType::AAAA) => RData::AAAA(AAAA::from(*v6)),
                _ => continue,
            };
            resp.add_answer(Record::from_rdata(q.name().clone(), 60, rdata));
        }
        resp.to_vec().unwrap()
    }

    impl DatagramSocket for FakeConn {
        fn send<'a>(&'a self, buf: &'a [u8]) -> SocketFuture<'a, usize> {
            Box::pin(async move {
                let query = Message::from_vec(buf).unwrap();
                let mut replies = self.replies.lock().unwrap();
                match self.behavior {
                    Behavior::Silent => {}
                    Behavior::Refuse => {
                        replies.push_back(reply(&query, &[], ResponseCode::Refused))
                    }
                    Behavior::StrayFirst => {
                        let mut stray = query.clone();
                        stray.set_id(query.id().wrapping_add(1));
                        replies.push_back(reply(&stray, &self.ips, ResponseCode::NoError));
                        replies.push_back(reply(&query, &self.ips, ResponseCode::NoError));
                    }
                    Behavior::Answer => {
                        replies.push_back(reply(&query, &self.ips, ResponseCode::NoError))
                    }
                    Behavior::FailAaaa | Behavior::SilentAaaa => {
                        match (query.queries()[0].query_type(), self.behavior) {
                            (RecordType::A, _) => {
                                replies.push_back(reply(&query, &self.ips, ResponseCode::NoError))
                            }
                            (_, Behavior::FailAaaa) => {
                                replies.push_back(reply(&query, &[], ResponseCode::ServFail))
                            }
                            _ => {}
                        }
                    }
                }
                Ok(buf.len())
            })
        }

        fn recv<'a>(&'a self, buf: &'a mut [u8]) -> SocketFuture<'a, usize> {
            Box::pin(async move {
                let next = self.replies.lock().unwrap().pop_front();
                match next {
                    Some(packet) => {
                        buf[..packet.len()].copy_from_slice(&packet);
                        Ok(packet.len())
                    }
                    None => future::pending().await,
                }
            })
        }

        fn close(&self) -> io::Result<()> {
            Ok(())
        }

        fn set_read_deadline(&self, _: Option<Instant>) -> io::Result<()> {
            Ok(())
        }

        fn set_write_deadline(&self, _: Option<Instant>) -> io::Result<()> {
            Ok(())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 40000)))
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 53)))
        }
    }

    struct FakeDialer {
        ips: Vec<IpAddr>,
        behavior: Behavior,
        fail: bool,
        dials: Arc<AtomicUsize>,
    }

    impl FakeDialer {
        fn new(behavior: Behavior) -> Self {
            Self {
                ips: vec![
                    IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
                    IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 10)),
                ],
                behavior,
                fail: false,
                dials: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::new(Behavior::Answer) }
        }
    }

    impl Dial for FakeDialer {
        fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> DialFuture<'a> {
            Box::pin(async move {
                assert_eq!((network, address), (STUB_NETWORK, STUB_ADDRESS));
                self.dials.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(NetError::NoNameservers);
                }
                Ok(Box::new(FakeConn {
                    ips: self.ips.clone(),
                    behavior: self.behavior,
                    replies: Mutex::new(VecDeque::new()),
                }) as BoxedDatagram)
            })
        }
    }

    struct FixedResolver(SocketAddr);

    impl Resolve for FixedResolver {
        fn resolve(&self, _name: Name) -> Resolving {
            let addr = self.0;
            Box::pin(async move { Ok(Box::new(std::iter::once(addr)) as Addrs) })
        }
    }

    async fn resolve_all(resolver: &StubResolver, host: &str) -> Result<Vec<IpAddr>, NetError> {
        let addrs = resolver.resolve(Name::new(host)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }

    #[tokio::test]
    async fn test_resolves_both_families() {
        let resolver = StubResolver::new(FakeDialer::new(Behavior::Answer));
        let ips = resolve_all(&resolver, "www.example.com").await.unwrap();
        assert_eq!(ips.len(), 2);
        assert!(ips[0].is_ipv4());
        assert!(ips[1].is_ipv6());
    }

    #[tokio::test]
    async fn test_skips_reply_with_foreign_id() {
        let resolver = StubResolver::new(FakeDialer::new(Behavior::StrayFirst));
        let ips = resolve_all(&resolver, "www.example.com").await.unwrap();
        assert_eq!(ips.len(), 2);
    }

    #[tokio::test]
    async fn test_ip_literal_never_dials() {
        let dialer = FakeDialer::failing();
        let dials = dialer.dials.clone();
        let resolver = StubResolver::new(dialer);

        let ips = resolve_all(&resolver, "192.0.2.1").await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))]);
        assert_eq!(dials.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_answer_is_not_found() {
        let mut dialer = FakeDialer::new(Behavior::Answer);
        dialer.ips.clear();
        let resolver = StubResolver::new(dialer);

        let err = resolve_all(&resolver, "nothing.example").await.unwrap_err();
        assert!(matches!(
            err,
            NetError::NameNotResolvedFor { ref domain, .. } if domain == "nothing.example"
        ));
    }

    #[tokio::test]
    async fn test_refused_is_retried_then_reported() {
        let dialer = FakeDialer::new(Behavior::Refuse);
        let dials = dialer.dials.clone();
        let resolver = StubResolver::new(dialer)
            .with_config(StubResolverConfig::default().attempts(3));

        let err = resolve_all(&resolver, "www.example.com").await.unwrap_err();
        assert!(err.to_string().contains("Refused"), "{err}");
        assert_eq!(dials.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_server_times_out() {
        let dialer = FakeDialer::new(Behavior::Silent);
        let dials = dialer.dials.clone();
        let resolver = StubResolver::new(dialer).with_config(
            StubResolverConfig::default()
                .timeout(Duration::from_millis(300))
                .attempts(2),
        );

        let err = resolve_all(&resolver, "www.example.com").await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionTimedOut));
        assert_eq!(dials.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_servfail_for_one_family_keeps_the_other() {
        let dialer = FakeDialer::new(Behavior::FailAaaa);
        let dials = dialer.dials.clone();
        let resolver = StubResolver::new(dialer);

        let ips = resolve_all(&resolver, "www.example.com").await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))]);
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_family_does_not_discard_answer() {
        let resolver = StubResolver::new(FakeDialer::new(Behavior::SilentAaaa))
            .with_config(StubResolverConfig::default().timeout(Duration::from_millis(300)));

        let start = tokio::time::Instant::now();
        let ips = resolve_all(&resolver, "www.example.com").await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))]);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_failure_beats_empty_answer() {
        let mut dialer = FakeDialer::new(Behavior::FailAaaa);
        dialer.ips.clear();
        let resolver = StubResolver::new(dialer)
            .with_config(StubResolverConfig::default().attempts(1));

        let err = resolve_all(&resolver, "www.example.com").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Server Failure") || msg.contains("ServFail"), "{msg}");
    }

    #[tokio::test]
    async fn test_dial_failure_uses_fallback() {
        let fallback = SocketAddr::from(([198, 51, 100, 1], 0));
        let resolver =
            StubResolver::new(FakeDialer::failing()).with_fallback(FixedResolver(fallback));

        let ips = resolve_all(&resolver, "www.example.com").await.unwrap();
        assert_eq!(ips, vec![fallback.ip()]);
    }

    #[tokio::test]
    async fn test_dial_failure_without_fallback() {
        let resolver = StubResolver::new(FakeDialer::failing());
        let err = resolve_all(&resolver, "www.example.com").await.unwrap_err();
        assert!(matches!(err, NetError::NoNameservers));
    }

    #[test]
    fn test_config_builder() {
        let config = StubResolverConfig::default()
            .timeout(Duration::from_secs(1))
            .attempts(4);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.attempts, 4);
    }
}
