//! Fan-out connection: one logical datagram connection over many.
//!
//! Reads and writes race across every *enabled* underlying connection. A
//! read completes with the first answer and drops the losers; a write
//! reports the first success once every send it started has finished. Only the first
//! connection is enabled at construction, the rest are enabled one at a time
//! by the [`Escalation`] signal, so the primary nameserver is preferred and
//! the secondaries only join once it has had a head start.
//!
//! An operation whose enabled connections have all failed keeps waiting
//! while escalation can still enable more, and fails once it cannot.
//!
//! Every write is recorded. A connection enabled after a write first receives
//! the most recent payload and only then joins the race, so a query sent
//! while only the primary was eligible still reaches the secondaries.
//! Nothing is read from a connection before it is enabled.
//!
//! Close and deadline changes go to *all* connections, enabled or not.

use super::datagram::{BoxedDatagram, DatagramSocket, SocketFuture};
use super::escalation::Escalation;
use crate::base::neterror::NetError;
use bytes::Bytes;
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A write payload tagged with its position in the write sequence.
#[derive(Clone)]
struct Payload {
    generation: u64,
    data: Bytes,
}

/// Escalation progress shared with the background escalator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Stage {
    /// Connections currently eligible, a prefix of `conns`.
    enabled: usize,
    /// No further connection will be enabled.
    exhausted: bool,
}

/// Datagram connection that races I/O across several underlying ones.
pub struct FanoutConnection {
    conns: Vec<BoxedDatagram>,
    /// Highest payload generation each connection has been sent.
    delivered: Vec<AtomicU64>,
    last_write: Mutex<Option<Payload>>,
    stage: Arc<watch::Sender<Stage>>,
    escalator: Option<JoinHandle<()>>,
}

impl FanoutConnection {
    /// Wrap `conns`, enabling them according to `escalation`.
    ///
    /// # Panics
    ///
    /// Panics if `conns` is empty. Must be called from within a Tokio
    /// runtime when `escalation` can enable further connections.
    pub fn new(conns: Vec<BoxedDatagram>, escalation: Escalation) -> Self {
        assert!(!conns.is_empty(), "FanoutConnection requires at least one connection");

        let total = conns.len();
        let initial = escalation.initially_enabled(total);
        let ticks = escalation.into_ticks().filter(|_| initial < total);
        let stage = Arc::new(
            watch::channel(Stage { enabled: initial, exhausted: ticks.is_none() }).0,
        );
        let escalator = ticks.map(|ticks| tokio::spawn(escalate(ticks, stage.clone(), total)));

        Self {
            delivered: conns.iter().map(|_| AtomicU64::new(0)).collect(),
            conns,
            last_write: Mutex::new(None),
            stage,
            escalator,
        }
    }

    /// Total number of underlying connections.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Always false; a fan-out connection is never empty.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Number of connections currently eligible for reads and writes.
    pub fn enabled(&self) -> usize {
        self.stage.borrow().enabled.min(self.conns.len())
    }

    /// Send `buf` on every enabled connection.
    ///
    /// Returns the byte count of the first successful send once every send
    /// started alongside it has completed. Fails only when every enabled
    /// connection failed and escalation cannot enable another.
    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let payload = self.record(buf);
        let mut stage = self.stage.subscribe();
        let mut attempts = FuturesUnordered::new();
        let mut started = 0;
        let mut last_err = None;

        loop {
            let now = *stage.borrow_and_update();
            while started < now.enabled.min(self.conns.len()) {
                attempts.push(self.deliver(started, payload.clone()));
                started += 1;
            }
            if attempts.is_empty() && self.settled(now, started) {
                break;
            }

            tokio::select! {
                Some(res) = attempts.next() => match res {
                    Ok(n) => {
                        // Siblings already started still get the payload.
                        while attempts.next().await.is_some() {}
                        return Ok(n);
                    }
                    Err(err) => last_err = Some(err),
                },
                Ok(()) = stage.changed() => {}
                else => break,
            }
        }

        Err(self.all_failed("write", started, last_err))
    }

    /// Receive one datagram from whichever enabled connection answers first.
    ///
    /// Fails only when every enabled connection failed and escalation cannot
    /// enable another.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        let mut stage = self.stage.subscribe();
        let mut attempts = FuturesUnordered::new();
        let mut started = 0;
        let mut last_err = None;

        loop {
            let now = *stage.borrow_and_update();
            while started < now.enabled.min(self.conns.len()) {
                attempts.push(self.receive(started, len));
                started += 1;
            }
            if attempts.is_empty() && self.settled(now, started) {
                break;
            }

            tokio::select! {
                Some(res) = attempts.next() => match res {
                    Ok(data) => {
                        let n = data.len().min(len);
                        buf[..n].copy_from_slice(&data[..n]);
                        return Ok(n);
                    }
                    Err(err) => last_err = Some(err),
                },
                Ok(()) = stage.changed() => {}
                else => break,
            }
        }

        Err(self.all_failed("read", started, last_err))
    }

    /// True when no connection beyond the `started` ones can join.
    fn settled(&self, stage: Stage, started: usize) -> bool {
        stage.exhausted || started >= self.conns.len()
    }

    fn record(&self, buf: &[u8]) -> Payload {
        let mut last = self.last_write.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = last.as_ref().map_or(1, |p| p.generation + 1);
        let payload = Payload { generation, data: Bytes::copy_from_slice(buf) };
        *last = Some(payload.clone());
        payload
    }

    /// The last payload if connection `idx` has not been sent it yet.
    fn undelivered(&self, idx: usize) -> Option<Payload> {
        let last = self.last_write.lock().unwrap_or_else(PoisonError::into_inner);
        last.as_ref()
            .filter(|p| self.delivered[idx].load(Ordering::Acquire) < p.generation)
            .cloned()
    }

    async fn deliver(&self, idx: usize, payload: Payload) -> io::Result<usize> {
        let result = self.conns[idx].send(&payload.data).await;
        match &result {
            Ok(_) => {
                self.delivered[idx].fetch_max(payload.generation, Ordering::AcqRel);
            }
            Err(err) => tracing::debug!(conn = idx, error = %err, "fan-out send failed"),
        }
        result
    }

    async fn receive(&self, idx: usize, len: usize) -> io::Result<Vec<u8>> {
        if let Some(payload) = self.undelivered(idx) {
            tracing::trace!(conn = idx, "replaying last write");
            self.deliver(idx, payload).await?;
        }

        let mut data = vec![0u8; len];
        match self.conns[idx].recv(&mut data).await {
            Ok(n) => {
                data.truncate(n);
                Ok(data)
            }
            Err(err) => {
                tracing::debug!(conn = idx, error = %err, "fan-out recv failed");
                Err(err)
            }
        }
    }

    /// Apply `f` to every connection; fails only if it failed everywhere.
    fn broadcast<F>(&self, op: &'static str, f: F) -> io::Result<()>
    where
        F: Fn(&dyn DatagramSocket) -> io::Result<()>,
    {
        let mut succeeded = false;
        let mut last_err = None;
        for conn in &self.conns {
            match f(conn.as_ref()) {
                Ok(()) => succeeded = true,
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) if !succeeded => Err(self.all_failed(op, self.conns.len(), Some(err))),
            _ => Ok(()),
        }
    }

    fn all_failed(&self, op: &'static str, attempted: usize, last_err: Option<io::Error>) -> io::Error {
        let source = last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no connection attempted"));
        tracing::debug!(op, attempted, error = %source, "all fan-out connections failed");
        NetError::all_failed(op, attempted, source).into()
    }
}

async fn escalate(mut ticks: BoxStream<'static, ()>, stage: Arc<watch::Sender<Stage>>, total: usize) {
    while ticks.next().await.is_some() {
        let mut now = 0;
        stage.send_modify(|stage| {
            stage.enabled = (stage.enabled + 1).min(total);
            stage.exhausted = stage.enabled >= total;
            now = stage.enabled;
        });
        tracing::trace!(enabled = now, total, "fan-out escalated");
        if now >= total {
            return;
        }
    }
    stage.send_modify(|stage| stage.exhausted = true);
    tracing::trace!(total, "escalation signal ended");
}

impl DatagramSocket for FanoutConnection {
    fn send<'a>(&'a self, buf: &'a [u8]) -> SocketFuture<'a, usize> {
        Box::pin(self.write(buf))
    }

    fn recv<'a>(&'a self, buf: &'a mut [u8]) -> SocketFuture<'a, usize> {
        Box::pin(self.read(buf))
    }

    fn close(&self) -> io::Result<()> {
        if let Some(escalator) = &self.escalator {
            escalator.abort();
        }
        self.stage.send_modify(|stage| stage.exhausted = true);
        self.broadcast("close", |conn| conn.close())
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.broadcast("set_deadline", |conn| conn.set_deadline(deadline))
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.broadcast("set_read_deadline", |conn| conn.set_read_deadline(deadline))
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.broadcast("set_write_deadline", |conn| conn.set_write_deadline(deadline))
    }

    /// Local address of the first connection; advisory only.
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.conns[0].local_addr()
    }

    /// Peer address of the first connection; advisory only.
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.conns[0].peer_addr()
    }
}

impl Drop for FanoutConnection {
    fn drop(&mut self) {
        if let Some(escalator) = &self.escalator {
            escalator.abort();
        }
    }
}

impl fmt::Debug for FanoutConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutConnection")
            .field("total", &self.conns.len())
            .field("enabled", &self.enabled())
            .finish_non_exhaustive()
    }
}
