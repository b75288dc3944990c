//! Datagram connection abstraction.
//!
//! [`DatagramSocket`] is the connection shape handed back by a dial hook: a
//! connected, message-oriented socket with read/write/close and deadline
//! control. [`UdpDatagram`] is the plain UDP implementation and
//! [`FanoutConnection`](super::fanout::FanoutConnection) the racing one.

use crate::base::neterror::NetError;
use futures::future::BoxFuture;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// How many times to retry binding an ephemeral local port.
const RETRY_RANDOM_PORT: usize = 10;

/// Future returned by the async [`DatagramSocket`] operations.
pub type SocketFuture<'a, T> = BoxFuture<'a, io::Result<T>>;

/// Owned, type-erased datagram connection.
pub type BoxedDatagram = Box<dyn DatagramSocket>;

/// A connected datagram socket.
///
/// Mirrors an ordinary connection: `send`/`recv` move whole datagrams,
/// `close` releases the socket and aborts I/O in flight, and deadlines bound
/// future operations. A deadline of `None` clears it.
pub trait DatagramSocket: Send + Sync + fmt::Debug {
    /// Send one datagram, returning the number of bytes written.
    fn send<'a>(&'a self, buf: &'a [u8]) -> SocketFuture<'a, usize>;

    /// Receive one datagram into `buf`, returning its length.
    fn recv<'a>(&'a self, buf: &'a mut [u8]) -> SocketFuture<'a, usize>;

    /// Close the socket. Closing twice is an error.
    fn close(&self) -> io::Result<()>;

    /// Set both the read and the write deadline.
    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl<S: DatagramSocket + ?Sized> DatagramSocket for Box<S> {
    fn send<'a>(&'a self, buf: &'a [u8]) -> SocketFuture<'a, usize> {
        (**self).send(buf)
    }

    fn recv<'a>(&'a self, buf: &'a mut [u8]) -> SocketFuture<'a, usize> {
        (**self).recv(buf)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        (**self).set_deadline(deadline)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        (**self).set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        (**self).set_write_deadline(deadline)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        (**self).peer_addr()
    }
}

/// Opens connected UDP sockets to a single remote address.
#[derive(Clone, Copy, Debug)]
pub struct UdpConnect {
    addr: SocketAddr,
}

impl UdpConnect {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind an ephemeral local port of the right family and connect it.
    pub async fn connect(&self) -> io::Result<UdpDatagram> {
        let sock = Self::udp_bind(self.addr.is_ipv4()).await?;
        sock.connect(self.addr).await?;
        Ok(UdpDatagram::new(sock))
    }

    async fn udp_bind(v4: bool) -> io::Result<UdpSocket> {
        let local: SocketAddr = if v4 {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let mut i = 0;
        loop {
            match UdpSocket::bind(local).await {
                Ok(sock) => return Ok(sock),
                Err(err) if i == RETRY_RANDOM_PORT => return Err(err),
                Err(_) => i += 1,
            }
        }
    }
}

/// A connected UDP socket with deadlines and close semantics.
#[derive(Debug)]
pub struct UdpDatagram {
    /// Taken on close; in-flight operations hold their own clone until aborted.
    sock: Mutex<Option<Arc<UdpSocket>>>,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
    closed: watch::Sender<bool>,
}

impl UdpDatagram {
    /// Wrap an already connected socket.
    pub fn new(sock: UdpSocket) -> Self {
        Self {
            sock: Mutex::new(Some(Arc::new(sock))),
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
            closed: watch::channel(false).0,
        }
    }

    fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        self.sock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| NetError::ConnectionClosed.into())
    }

    /// Run `op` under `deadline`, aborting early if the socket gets closed.
    async fn guarded<T>(
        &self,
        deadline: Option<Instant>,
        op: impl std::future::Future<Output = io::Result<T>>,
    ) -> io::Result<T> {
        let mut closed = self.closed.subscribe();
        let is_closed = *closed.borrow_and_update();
        if is_closed {
            return Err(NetError::ConnectionClosed.into());
        }

        let bounded = async move {
            match deadline {
                Some(deadline) if deadline <= Instant::now() => Err(deadline_exceeded()),
                Some(deadline) => tokio::time::timeout_at(deadline.into(), op)
                    .await
                    .unwrap_or_else(|_| Err(deadline_exceeded())),
                None => op.await,
            }
        };

        tokio::select! {
            res = bounded => res,
            () = wait_closed(closed) => Err(NetError::ConnectionClosed.into()),
        }
    }
}

impl DatagramSocket for UdpDatagram {
    fn send<'a>(&'a self, buf: &'a [u8]) -> SocketFuture<'a, usize> {
        let deadline = load(&self.write_deadline);
        Box::pin(async move {
            let sock = self.socket()?;
            self.guarded(deadline, sock.send(buf)).await
        })
    }

    fn recv<'a>(&'a self, buf: &'a mut [u8]) -> SocketFuture<'a, usize> {
        let deadline = load(&self.read_deadline);
        Box::pin(async move {
            let sock = self.socket()?;
            self.guarded(deadline, sock.recv(buf)).await
        })
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.send_replace(true) {
            return Err(NetError::ConnectionClosed.into());
        }
        self.sock.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        store(&self.read_deadline, deadline);
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        store(&self.write_deadline, deadline);
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.peer_addr()
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o deadline exceeded")
}

fn load(slot: &Mutex<Option<Instant>>) -> Option<Instant> {
    *slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn store(slot: &Mutex<Option<Instant>>, deadline: Option<Instant>) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn echo_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((n, peer)) = server.recv_from(&mut buf).await {
                let _ = server.send_to(&buf[..n], peer).await;
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_udp_roundtrip() {
        let (addr, server) = echo_server().await;
        let conn = UdpConnect::new(addr).connect().await.unwrap();
        assert_eq!(conn.peer_addr().unwrap(), addr);

        assert_eq!(conn.send(b"ping").await.unwrap(), 4);
        let mut buf = [0u8; 16];
        let n = conn.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        server.abort();
    }

    #[tokio::test]
    async fn test_read_deadline() {
        // Nobody answers on this socket.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let conn = UdpConnect::new(silent.local_addr().unwrap()).connect().await.unwrap();
        conn.set_read_deadline(Some(Instant::now() + Duration::from_millis(50))).unwrap();

        let mut buf = [0u8; 16];
        let err = conn.recv(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_past_deadline_fails_immediately() {
        let (addr, server) = echo_server().await;
        let conn = UdpConnect::new(addr).connect().await.unwrap();
        conn.set_deadline(Some(Instant::now() - Duration::from_millis(1))).unwrap();

        let err = conn.send(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        conn.set_deadline(None).unwrap();
        assert!(conn.send(b"on time").await.is_ok());
        server.abort();
    }

    #[tokio::test]
    async fn test_close_aborts_pending_recv() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let conn = std::sync::Arc::new(
            UdpConnect::new(silent.local_addr().unwrap()).connect().await.unwrap(),
        );

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                conn.recv(&mut buf).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().unwrap();

        let err = reader.await.unwrap().unwrap_err();
        assert!(matches!(NetError::from_io_ref(&err), Some(NetError::ConnectionClosed)));

        // Second close reports the socket as already closed.
        assert!(conn.close().is_err());
    }

    #[tokio::test]
    async fn test_close_releases_socket() {
        let (addr, server) = echo_server().await;
        let conn = UdpConnect::new(addr).connect().await.unwrap();
        assert!(conn.local_addr().is_ok());

        conn.close().unwrap();

        let err = conn.local_addr().unwrap_err();
        assert!(matches!(NetError::from_io_ref(&err), Some(NetError::ConnectionClosed)));
        assert!(conn.peer_addr().is_err());
        let err = conn.send(b"late").await.unwrap_err();
        assert!(matches!(NetError::from_io_ref(&err), Some(NetError::ConnectionClosed)));
        server.abort();
    }
}
