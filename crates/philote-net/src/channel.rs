// philote-net::channel — client-side connection factory.
//
// A `Channel` opens one fresh stream per call through a `Connect`
// implementation: TCP for remote disciplines, an in-memory duplex pipe for
// disciplines hosted in the same process.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;

use philote_types::config::DEFAULT_MAX_FRAME_BYTES;
use philote_types::{PhiloteError, Result, Status};

use crate::call::ClientCall;
use crate::rpc::{CallKind, Message, Method};
use crate::server::{serve_connection, CallLimits, Service};

/// Buffer size of each direction of an in-process pipe.
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Deadline used when the configured timeout overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Byte stream a call runs over.
pub trait Io: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite + ?Sized> Io for T {}

pub type BoxedIo = Box<dyn Io + Send + Unpin>;

/// Opens the byte stream for one call.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self) -> io::Result<BoxedIo>;
}

// ── Connectors ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl Connect for TcpConnector {
    async fn connect(&self) -> io::Result<BoxedIo> {
        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Serves each call on a spawned task in this process.
pub struct InProcessConnector {
    service: Arc<dyn Service>,
    limits: CallLimits,
}

impl InProcessConnector {
    pub fn new(service: Arc<dyn Service>, limits: CallLimits) -> Self {
        Self { service, limits }
    }
}

#[async_trait]
impl Connect for InProcessConnector {
    async fn connect(&self) -> io::Result<BoxedIo> {
        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
        tokio::spawn(serve_connection(server, Arc::clone(&self.service), self.limits));
        Ok(Box::new(client))
    }
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// Cheap to clone; every clone shares the connector.
#[derive(Clone)]
pub struct Channel {
    connector: Arc<dyn Connect>,
    max_frame_bytes: usize,
}

impl Channel {
    pub fn new(connector: Arc<dyn Connect>) -> Self {
        Self { connector, max_frame_bytes: DEFAULT_MAX_FRAME_BYTES }
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        Self::new(Arc::new(TcpConnector::new(addr)))
    }

    pub fn in_process(service: Arc<dyn Service>) -> Self {
        Self::new(Arc::new(InProcessConnector::new(service, CallLimits::default())))
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Open a call. The deadline starts now and covers connecting.
    pub async fn open(&self, method: Method, timeout: Duration) -> Result<ClientCall> {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
        let io = match tokio::time::timeout_at(deadline, self.connector.connect()).await {
            Ok(Ok(io)) => io,
            Ok(Err(e)) => {
                return Err(PhiloteError::Transport(format!("{method}: connect failed: {e}")))
            }
            Err(_) => {
                let status = Status::deadline_exceeded(format!("{method}: connect timed out"));
                return Err(PhiloteError::from_status(status, timeout));
            }
        };
        ClientCall::open(io, method, timeout, deadline, self.max_frame_bytes).await
    }

    /// One request, one response.
    pub async fn unary(&self, method: Method, request: Message, timeout: Duration) -> Result<Message> {
        debug_assert_eq!(method.kind(), CallKind::Unary);
        let mut responses = self.request(method, request, timeout).await?;
        match responses.len() {
            1 => Ok(responses.remove(0)),
            n => Err(PhiloteError::Protocol(format!("{method} returned {n} responses, expected 1"))),
        }
    }

    /// One request, every response until the server closes.
    pub async fn server_streaming(
        &self,
        method: Method,
        request: Message,
        timeout: Duration,
    ) -> Result<Vec<Message>> {
        debug_assert_eq!(method.kind(), CallKind::ServerStreaming);
        self.request(method, request, timeout).await
    }

    async fn request(&self, method: Method, request: Message, timeout: Duration) -> Result<Vec<Message>> {
        let mut call = self.open(method, timeout).await?;
        call.send(request).await?;
        call.half_close().await?;
        let mut responses = Vec::new();
        while let Some(msg) = call.recv().await? {
            responses.push(msg);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::ServerCall;

    struct Slow(Duration);

    #[async_trait]
    impl Service for Slow {
        async fn call(&self, mut call: ServerCall) -> std::result::Result<(), Status> {
            call.recv_request().await.map_err(Status::from)?;
            tokio::time::sleep(self.0).await;
            call.send(Message::Empty).await.map_err(Status::from)
        }
    }

    struct Refuse;

    #[async_trait]
    impl Service for Refuse {
        async fn call(&self, _call: ServerCall) -> std::result::Result<(), Status> {
            Err(Status::failed_precondition("Discipline is not linked"))
        }
    }

    #[tokio::test]
    async fn unary_round_trip_in_process() {
        let channel = Channel::in_process(Arc::new(Slow(Duration::ZERO)));
        let resp = channel
            .unary(Method::Setup, Message::Empty, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp, Message::Empty);
    }

    #[tokio::test]
    async fn unbounded_timeout_does_not_overflow_deadline() {
        let channel = Channel::in_process(Arc::new(Slow(Duration::ZERO)));
        let resp = channel
            .unary(Method::Setup, Message::Empty, Duration::MAX)
            .await
            .unwrap();
        assert_eq!(resp, Message::Empty);
    }

    #[tokio::test]
    async fn frame_limit_applies_to_responses() {
        let channel = Channel::in_process(Arc::new(Slow(Duration::ZERO))).with_max_frame_bytes(0);
        let err = channel
            .unary(Method::Setup, Message::Empty, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PhiloteError::Serialization(_)), "{err}");
    }

    #[tokio::test]
    async fn slow_service_times_out_with_configured_deadline() {
        let channel = Channel::in_process(Arc::new(Slow(Duration::from_secs(2))));
        let err = channel
            .unary(Method::Setup, Message::Empty, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PhiloteError::Timeout { timeout_ms: 50, .. }), "{err}");
        assert!(err.to_string().contains("50ms"));
    }

    #[tokio::test]
    async fn server_status_reaches_client() {
        let channel = Channel::in_process(Arc::new(Refuse));
        let err = channel
            .unary(Method::GetInfo, Message::Empty, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            PhiloteError::Rpc { code, message } => {
                assert_eq!(code, philote_types::StatusCode::FailedPrecondition);
                assert!(message.contains("not linked"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn connect_failure_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Channel::tcp(addr)
            .unary(Method::GetInfo, Message::Empty, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PhiloteError::Transport(_)), "{err}");
    }
}
