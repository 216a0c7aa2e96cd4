//! Command channel: message ids, segmentation and synchronous calls.

use crate::error::ClientError;
use crate::transport::{DatagramTransport, TransportConfig};
use devlink_protocol::message::encode_payload;
use devlink_protocol::{
    Body, CommandCode, Decoder, Encoder, Message, Progress, DEFAULT_FRAME_MAX_BYTES,
    DEFAULT_PAYLOAD_MAX_BYTES,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default synchronous call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of unrelated messages kept while a call waits.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 32;

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Ceiling on one datagram, header included.
    pub frame_max_bytes: usize,
    /// Ceiling on a reassembled message before an error is logged.
    pub payload_max_bytes: usize,
    /// Timeout used by callers that do not pass their own.
    pub call_timeout: Duration,
    /// Messages parked by [`CommandChannel::call`] for later [`CommandChannel::receive`].
    pub backlog_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frame_max_bytes: DEFAULT_FRAME_MAX_BYTES,
            payload_max_bytes: DEFAULT_PAYLOAD_MAX_BYTES,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_max_bytes(mut self, size: usize) -> Self {
        self.frame_max_bytes = size;
        self
    }

    pub fn with_payload_max_bytes(mut self, size: usize) -> Self {
        self.payload_max_bytes = size;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_backlog_capacity(mut self, capacity: usize) -> Self {
        self.backlog_capacity = capacity;
        self
    }
}

/// Message layer over a [`DatagramTransport`].
///
/// Each outbound message gets the next id from a per-channel counter.
/// Responses echo the id of the request they answer, which is how
/// [`call`](Self::call) tells its own response apart from anything else
/// arriving on the socket.
pub struct CommandChannel {
    transport: Arc<DatagramTransport>,
    encoder: Encoder,
    decoder: Mutex<Decoder>,
    next_id: AtomicU32,
    backlog: Mutex<VecDeque<Message>>,
    config: ChannelConfig,
}

impl CommandChannel {
    /// Wraps an already bound transport.
    pub fn new(transport: Arc<DatagramTransport>, config: ChannelConfig) -> Result<Self, ClientError> {
        let encoder = Encoder::new(config.frame_max_bytes)?;
        Ok(Self {
            transport,
            encoder,
            decoder: Mutex::new(Decoder::new(config.payload_max_bytes)),
            next_id: AtomicU32::new(0),
            backlog: Mutex::new(VecDeque::new()),
            config,
        })
    }

    /// Binds a transport and wraps it.
    pub fn bind(transport: TransportConfig, config: ChannelConfig) -> Result<Self, ClientError> {
        let transport = Arc::new(DatagramTransport::bind(transport)?);
        Self::new(transport, config)
    }

    pub fn transport(&self) -> &Arc<DatagramTransport> {
        &self.transport
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Id the next outbound message will carry.
    pub fn next_message_id(&self) -> u32 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Sends a request and returns the message id it was given.
    pub fn send(&self, command: CommandCode, body: &[u8]) -> Result<u32, ClientError> {
        self.send_payload(command, None, body)
    }

    pub fn send_body<B: Body>(&self, command: CommandCode, body: &B) -> Result<u32, ClientError> {
        self.send(command, &body.to_bytes()?)
    }

    /// Answers `request`, echoing its id.
    pub fn reply(&self, request: &Message, body: &[u8]) -> Result<u32, ClientError> {
        self.send_payload(request.command.response(), Some(request.id), body)
    }

    pub fn reply_body<B: Body>(&self, request: &Message, body: &B) -> Result<u32, ClientError> {
        self.reply(request, &body.to_bytes()?)
    }

    fn send_payload(
        &self,
        command: CommandCode,
        reply_to: Option<u32>,
        body: &[u8],
    ) -> Result<u32, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = encode_payload(command, reply_to, body);

        let segments = self.encoder.segment(id, &payload)?;
        let total = segments.total();
        for frame in segments {
            self.transport.send(&frame)?;
        }

        tracing::trace!(id, %command, total, bytes = payload.len(), "sent message");
        Ok(id)
    }

    /// Receives the next message, waiting up to `timeout`.
    ///
    /// Messages parked by an earlier [`call`](Self::call) are returned first.
    /// Once the first frame of a message is in, each further frame gets the
    /// full `timeout`, so a message straddling the deadline is not lost.
    /// Malformed datagrams are skipped; a broken frame sequence aborts this
    /// attempt and is returned as an error.
    pub fn receive(&self, timeout: Duration) -> Result<Option<Message>, ClientError> {
        if let Some(msg) = self.backlog.lock().pop_front() {
            return Ok(Some(msg));
        }
        self.receive_until(Instant::now() + timeout, Some(timeout))
    }

    /// Reassembles until a message completes or `deadline` passes.
    ///
    /// With `frame_timeout`, every accepted frame of a partial message pushes
    /// the deadline out to `now + frame_timeout`.
    fn receive_until(
        &self,
        mut deadline: Instant,
        frame_timeout: Option<Duration>,
    ) -> Result<Option<Message>, ClientError> {
        let mut decoder = self.decoder.lock();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(datagram) = self.transport.receive(remaining)? else {
                decoder.reset();
                return Ok(None);
            };

            match decoder.push(datagram.data) {
                Ok(Progress::Complete(done)) => {
                    let msg = Message::decode(done.message_id(), done.payload)?;
                    return Ok(Some(msg));
                }
                Ok(Progress::Incomplete) => {
                    if let Some(wait) = frame_timeout {
                        deadline = deadline.max(Instant::now() + wait);
                    }
                }
                Err(e) if e.is_malformed() => {
                    tracing::warn!(peer = %datagram.peer, error = %e, "skipping malformed datagram");
                }
                Err(e) => {
                    tracing::warn!(peer = %datagram.peer, error = %e, "reassembly aborted");
                    decoder.reset();
                    return Err(e.into());
                }
            }

            if Instant::now() >= deadline {
                decoder.reset();
                return Ok(None);
            }
        }
    }

    /// Sends a request and waits for the response that echoes its id.
    ///
    /// Stale responses to earlier requests are dropped and unrelated
    /// messages are parked for [`receive`](Self::receive). Only the deadline
    /// ends the wait without a match.
    pub fn call(
        &self,
        command: CommandCode,
        body: &[u8],
        timeout: Duration,
    ) -> Result<Message, ClientError> {
        let id = self.send(command, body)?;
        let expected = command.response();
        let deadline = Instant::now() + timeout;
        let mut unexpected = None;

        while Instant::now() < deadline {
            let msg = match self.receive_until(deadline, None) {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(ClientError::Protocol(e)) => {
                    tracing::debug!(id, error = %e, "ignoring broken message while waiting");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if msg.answers(id, command) {
                return Ok(msg);
            }

            if msg.command == expected {
                tracing::debug!(
                    id,
                    reply_to = ?msg.reply_to,
                    %command,
                    "discarding stale response"
                );
            } else if msg.is_response() {
                tracing::warn!(id, %expected, actual = %msg.command, "unexpected response");
                unexpected = Some(msg.command);
            } else {
                self.park(msg);
            }
        }

        match unexpected {
            Some(actual) => Err(ClientError::UnexpectedResponse { expected, actual }),
            None => {
                tracing::warn!(id, %command, ?timeout, "call timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    /// Typed [`call`](Self::call).
    pub fn call_body<Req: Body, Rsp: Body>(
        &self,
        command: CommandCode,
        request: &Req,
        timeout: Duration,
    ) -> Result<Rsp, ClientError> {
        let msg = self.call(command, &request.to_bytes()?, timeout)?;
        Ok(msg.body::<Rsp>()?)
    }

    /// Number of parked messages.
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    fn park(&self, msg: Message) {
        let mut backlog = self.backlog.lock();
        if backlog.len() >= self.config.backlog_capacity.max(1) {
            if let Some(dropped) = backlog.pop_front() {
                tracing::debug!(id = dropped.id, command = %dropped.command, "backlog full, dropping oldest");
            }
        }
        tracing::debug!(id = msg.id, command = %msg.command, "parking message received during call");
        backlog.push_back(msg);
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("local", &self.transport.local_addr().ok())
            .field("target", &self.transport.target())
            .field("next_id", &self.next_message_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_protocol::message::encode_payload;
    use devlink_protocol::Encoder;
    use std::net::SocketAddr;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn pair(config: ChannelConfig) -> (CommandChannel, CommandChannel) {
        let server = CommandChannel::bind(TransportConfig::new(loopback()), config.clone()).unwrap();
        let server_addr = server.transport().local_addr().unwrap();
        let client = CommandChannel::bind(
            TransportConfig::new(loopback()).with_target(server_addr),
            config,
        )
        .unwrap();
        (client, server)
    }

    #[test]
    fn test_invalid_frame_size_rejected() {
        let config = ChannelConfig::new().with_frame_max_bytes(16);
        let result = CommandChannel::bind(TransportConfig::new(loopback()), config);
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_message_ids_increment() {
        let (client, server) = pair(ChannelConfig::new());
        assert_eq!(client.send(CommandCode::STREAM_HUMAN_POSE, b"a").unwrap(), 0);
        assert_eq!(client.send(CommandCode::STREAM_HUMAN_POSE, b"b").unwrap(), 1);
        assert_eq!(client.next_message_id(), 2);

        let first = server.receive(Duration::from_secs(2)).unwrap().unwrap();
        let second = server.receive(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!((first.id, first.body.as_ref()), (0, &b"a"[..]));
        assert_eq!((second.id, second.body.as_ref()), (1, &b"b"[..]));
    }

    #[test]
    fn test_message_id_wraps() {
        let (client, _server) = pair(ChannelConfig::new());
        client.next_id.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(client.send(CommandCode::GET_PROPERTY, b"").unwrap(), u32::MAX);
        assert_eq!(client.next_message_id(), 0);
    }

    #[test]
    fn test_multi_frame_message() {
        let (client, server) = pair(ChannelConfig::new().with_frame_max_bytes(100));
        let body: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        client.send(CommandCode::MEDIA_SOURCE_STREAM, &body).unwrap();

        let msg = server.receive(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(msg.command, CommandCode::MEDIA_SOURCE_STREAM);
        assert_eq!(msg.body.as_ref(), body.as_slice());
    }

    #[test]
    fn test_malformed_datagram_skipped() {
        let (client, server) = pair(ChannelConfig::new());
        client.transport().send(b"tiny").unwrap();
        client.send(CommandCode::SET_PROPERTY, b"{}").unwrap();

        let msg = server.receive(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(msg.command, CommandCode::SET_PROPERTY);
    }

    #[test]
    fn test_bad_first_frame_is_error() {
        let (client, server) = pair(ChannelConfig::new());
        let payload = encode_payload(CommandCode::SET_PROPERTY, None, &[0u8; 200]);
        let frames: Vec<_> = Encoder::new(64).unwrap().segment(5, &payload).unwrap().collect();
        client.transport().send(&frames[1]).unwrap();

        let result = server.receive(Duration::from_secs(2));
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_receive_timeout() {
        let (_client, server) = pair(ChannelConfig::new());
        let start = Instant::now();
        assert!(server.receive(Duration::from_millis(50)).unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_call_times_out_without_peer_response() {
        let (client, _server) = pair(ChannelConfig::new());
        let result = client.call(CommandCode::GET_PROPERTY, b"{}", Duration::from_millis(50));
        assert!(matches!(result, Err(ClientError::Timeout)));
    }

    #[test]
    fn test_backlog_evicts_oldest() {
        let (client, _server) = pair(ChannelConfig::new().with_backlog_capacity(2));
        for id in 0..3 {
            client.park(Message {
                id,
                command: CommandCode::STREAM_HUMAN_POSE,
                reply_to: None,
                body: bytes::Bytes::new(),
            });
        }
        assert_eq!(client.backlog_len(), 2);
        let first = client.receive(Duration::ZERO).unwrap().unwrap();
        assert_eq!(first.id, 1);
    }
}
