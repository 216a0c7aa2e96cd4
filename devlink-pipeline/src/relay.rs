//! UDP relay stages.
//!
//! `client -> front socket -> back socket -> target`, and replies from the
//! target go back out of the front socket to whichever client spoke last.

use crate::error::PipelineError;
use crate::stage::{CancelToken, Stage};
use devlink_client::DatagramTransport;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirection {
    /// Front socket to target.
    Forward,
    /// Target back to the last front-side client.
    Backward,
}

impl RelayDirection {
    fn label(self) -> &'static str {
        match self {
            RelayDirection::Forward => "relay-forward",
            RelayDirection::Backward => "relay-backward",
        }
    }
}

/// Counters for one relay direction.
#[derive(Debug, Default)]
pub struct RelayStats {
    datagrams: AtomicU64,
    bytes: AtomicU64,
    dropped: AtomicU64,
}

impl RelayStats {
    pub fn datagrams(&self) -> u64 {
        self.datagrams.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Datagrams that arrived before any client was known.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record(&self, len: usize) {
        self.datagrams.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }
}

/// One direction of the relay.
#[derive(Debug)]
pub struct Relay {
    direction: RelayDirection,
    front: Arc<DatagramTransport>,
    back: Arc<DatagramTransport>,
    client: Arc<Mutex<Option<SocketAddr>>>,
    stats: Arc<RelayStats>,
    poll: Duration,
    verbose: bool,
}

impl Relay {
    /// Builds both directions over the same sockets.
    ///
    /// `back` must have a fixed target.
    pub fn pair(
        front: Arc<DatagramTransport>,
        back: Arc<DatagramTransport>,
        poll: Duration,
    ) -> (Relay, Relay) {
        let client = Arc::new(Mutex::new(None));
        let make = |direction| Relay {
            direction,
            front: front.clone(),
            back: back.clone(),
            client: client.clone(),
            stats: Arc::new(RelayStats::default()),
            poll,
            verbose: false,
        };
        (make(RelayDirection::Forward), make(RelayDirection::Backward))
    }

    /// Logs every relayed datagram at info instead of trace.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn direction(&self) -> RelayDirection {
        self.direction
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    fn relay_once(&self) -> Result<(), PipelineError> {
        let inbound = match self.direction {
            RelayDirection::Forward => &self.front,
            RelayDirection::Backward => &self.back,
        };
        let Some(datagram) = inbound.receive(self.poll)? else {
            return Ok(());
        };
        let len = datagram.data.len();

        let sent_to = match self.direction {
            RelayDirection::Forward => {
                *self.client.lock() = Some(datagram.peer);
                self.back.send(&datagram.data)?;
                self.back.target()
            }
            RelayDirection::Backward => {
                let client = *self.client.lock();
                let Some(client) = client else {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(from = %datagram.peer, len, "no client yet, dropping");
                    return Ok(());
                };
                self.front.send_to(&datagram.data, client)?;
                Some(client)
            }
        };

        self.stats.record(len);
        if self.verbose {
            tracing::info!(from = %datagram.peer, to = ?sent_to, len, "relayed");
        } else {
            tracing::trace!(from = %datagram.peer, to = ?sent_to, len, "relayed");
        }
        Ok(())
    }
}

impl Stage for Relay {
    fn name(&self) -> &str {
        self.direction.label()
    }

    fn run(&mut self, token: &CancelToken) -> Result<(), PipelineError> {
        while token.is_running() {
            if let Err(e) = self.relay_once() {
                if !e.is_recoverable() {
                    return Err(e);
                }
                tracing::warn!(direction = ?self.direction, error = %e, "relay failed");
            }
        }
        tracing::info!(
            direction = ?self.direction,
            datagrams = self.stats.datagrams(),
            bytes = self.stats.bytes(),
            "relay stopped"
        );
        Ok(())
    }
}
