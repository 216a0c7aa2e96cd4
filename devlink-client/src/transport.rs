//! UDP datagram transport.
//!
//! One socket, one peer. The peer is either configured up front or learned
//! from the source address of the first datagram received.

use crate::error::ClientError;
use bytes::Bytes;
use devlink_protocol::MAX_DATAGRAM_SIZE;
use parking_lot::{Mutex, RwLock};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Shortest read timeout handed to the socket; a zero timeout means "poll".
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How the transport picks the address it sends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Always send to this address.
    Fixed(SocketAddr),
    /// Send to whoever sent the first datagram we received.
    Learn,
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local address to bind.
    pub local_addr: SocketAddr,
    /// Peer selection.
    pub target: Target,
    /// Receive buffer size; datagrams larger than this are truncated by the OS.
    pub recv_buffer_size: usize,
}

impl TransportConfig {
    pub fn new(local_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            target: Target::Learn,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
        }
    }

    pub fn with_target(mut self, addr: SocketAddr) -> Self {
        self.target = Target::Fixed(addr);
        self
    }

    pub fn with_learned_target(mut self) -> Self {
        self.target = Target::Learn;
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.clamp(1, MAX_DATAGRAM_SIZE);
        self
    }
}

/// A received datagram and its source address.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Bytes,
    pub peer: SocketAddr,
}

/// A bound UDP socket tracking a single peer.
///
/// All methods take `&self` so one transport can be shared between a
/// receiving thread and a sending thread.
#[derive(Debug)]
pub struct DatagramTransport {
    socket: UdpSocket,
    mode: RwLock<Target>,
    target: RwLock<Option<SocketAddr>>,
    recv_buf: Mutex<Vec<u8>>,
}

impl DatagramTransport {
    /// Binds the socket. Failure is reported, never retried.
    pub fn bind(config: TransportConfig) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind(config.local_addr).map_err(|source| ClientError::Bind {
            addr: config.local_addr,
            source,
        })?;

        let target = match config.target {
            Target::Fixed(addr) => Some(addr),
            Target::Learn => None,
        };

        tracing::debug!(
            local = %socket.local_addr()?,
            target = ?config.target,
            "transport bound"
        );

        Ok(Self {
            socket,
            mode: RwLock::new(config.target),
            target: RwLock::new(target),
            recv_buf: Mutex::new(vec![0u8; config.recv_buffer_size]),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    /// Current peer address, if fixed or already learned.
    pub fn target(&self) -> Option<SocketAddr> {
        *self.target.read()
    }

    pub fn mode(&self) -> Target {
        *self.mode.read()
    }

    /// Switches peer selection.
    pub fn set_target(&self, target: Target) {
        *self.mode.write() = target;
        *self.target.write() = match target {
            Target::Fixed(addr) => Some(addr),
            Target::Learn => None,
        };
    }

    /// Forgets a learned peer so the next inbound datagram sets a new one.
    ///
    /// Has no effect on a fixed target.
    pub fn reset_target(&self) {
        if *self.mode.read() == Target::Learn {
            *self.target.write() = None;
        }
    }

    /// Sends one datagram to the current peer.
    pub fn send(&self, data: &[u8]) -> Result<usize, ClientError> {
        let addr = self.target().ok_or(ClientError::NoTarget)?;
        self.send_to(data, addr)
    }

    /// Sends one datagram to an explicit address.
    pub fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<usize, ClientError> {
        Ok(self.socket.send_to(data, addr)?)
    }

    /// Waits up to `timeout` for one datagram.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A zero timeout polls
    /// briefly instead of blocking.
    pub fn receive(&self, timeout: Duration) -> Result<Option<Datagram>, ClientError> {
        self.socket
            .set_read_timeout(Some(timeout.max(MIN_POLL_INTERVAL)))?;

        let mut buf = self.recv_buf.lock();
        let (len, peer) = match self.socket.recv_from(buf.as_mut_slice()) {
            Ok(result) => result,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };

        self.learn(peer);

        Ok(Some(Datagram {
            data: Bytes::copy_from_slice(&buf[..len]),
            peer,
        }))
    }

    /// Discards queued datagrams until `timeout` passes with nothing received.
    ///
    /// Returns the number of datagrams discarded.
    pub fn drain(&self, timeout: Duration) -> Result<usize, ClientError> {
        let mut discarded = 0;
        while self.receive(timeout)?.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "drained socket");
        }
        Ok(discarded)
    }

    fn learn(&self, peer: SocketAddr) {
        if *self.mode.read() != Target::Learn {
            return;
        }
        let mut target = self.target.write();
        if target.is_none() {
            tracing::info!(%peer, "learned target address");
            *target = Some(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_send_without_target() {
        let transport = DatagramTransport::bind(TransportConfig::new(loopback())).unwrap();
        assert!(transport.target().is_none());
        assert!(matches!(transport.send(b"x"), Err(ClientError::NoTarget)));
    }

    #[test]
    fn test_zero_timeout_returns() {
        let transport = DatagramTransport::bind(TransportConfig::new(loopback())).unwrap();
        let start = Instant::now();
        assert!(transport.receive(Duration::ZERO).unwrap().is_none());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_bind_failure() {
        let first = DatagramTransport::bind(TransportConfig::new(loopback())).unwrap();
        let taken = first.local_addr().unwrap();
        let result = DatagramTransport::bind(TransportConfig::new(taken));
        assert!(matches!(result, Err(ClientError::Bind { addr, .. }) if addr == taken));
    }

    #[test]
    fn test_learned_target_is_sticky() {
        let b = DatagramTransport::bind(TransportConfig::new(loopback())).unwrap();
        let b_addr = b.local_addr().unwrap();

        let a1 = DatagramTransport::bind(TransportConfig::new(loopback()).with_target(b_addr))
            .unwrap();
        let a2 = DatagramTransport::bind(TransportConfig::new(loopback()).with_target(b_addr))
            .unwrap();

        a1.send(b"one").unwrap();
        let got = b.receive(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(got.data.as_ref(), b"one");
        assert_eq!(b.target(), Some(a1.local_addr().unwrap()));

        a2.send(b"two").unwrap();
        let got = b.receive(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(got.peer, a2.local_addr().unwrap());
        assert_eq!(b.target(), Some(a1.local_addr().unwrap()));

        b.reset_target();
        assert!(b.target().is_none());
        a2.send(b"three").unwrap();
        b.receive(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(b.target(), Some(a2.local_addr().unwrap()));
    }

    #[test]
    fn test_fixed_target_not_overwritten() {
        let b = DatagramTransport::bind(TransportConfig::new(loopback())).unwrap();
        let elsewhere: SocketAddr = "127.0.0.1:9".parse().unwrap();
        b.set_target(Target::Fixed(elsewhere));

        let a = DatagramTransport::bind(
            TransportConfig::new(loopback()).with_target(b.local_addr().unwrap()),
        )
        .unwrap();
        a.send(b"hi").unwrap();
        b.receive(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(b.target(), Some(elsewhere));

        b.reset_target();
        assert_eq!(b.target(), Some(elsewhere));
    }

    #[test]
    fn test_drain() {
        let b = DatagramTransport::bind(TransportConfig::new(loopback())).unwrap();
        let a = DatagramTransport::bind(
            TransportConfig::new(loopback()).with_target(b.local_addr().unwrap()),
        )
        .unwrap();
        for _ in 0..3 {
            a.send(b"junk").unwrap();
        }
        let drained = b.drain(Duration::from_millis(100)).unwrap();
        assert_eq!(drained, 3);
        assert!(b.receive(Duration::ZERO).unwrap().is_none());
    }
}
