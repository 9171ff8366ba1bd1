//! Per-call handles.
//!
//! [`ServerCall`] is what a [`Service`](crate::Service) sees: a receiver of
//! decoded client messages, a sender for responses and a cancellation token.
//! [`ClientCall`] is the client end of one call stream.

use std::io;
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use philote_types::{PhiloteError, Result, Status};

use crate::channel::BoxedIo;
use crate::codec::{read_frame, write_frame, Frame, PROTOCOL_VERSION};
use crate::rpc::{Message, Method};

// ── Server side ───────────────────────────────────────────────────────────────

/// Server end of one call.
///
/// The inbound stream ends (`recv` returns `Ok(None)`) when the client
/// half-closes. If the client disconnects or cancels first, `recv` yields a
/// `Cancelled` error instead and the cancellation token fires.
pub struct ServerCall {
    method: Method,
    inbound: mpsc::Receiver<Result<Message>>,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl ServerCall {
    pub fn new(
        method: Method,
        inbound: mpsc::Receiver<Result<Message>>,
        outbound: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self { method, inbound, outbound, cancel }
    }

    /// Call whose inbound stream is `messages` followed by a half-close.
    /// Responses collect in the returned receiver, which buffers up to
    /// `capacity` messages.
    pub fn from_messages(
        method: Method,
        messages: Vec<Message>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (in_tx, in_rx) = mpsc::channel(messages.len().max(1));
        for msg in messages {
            // Capacity equals the message count, so this never fails.
            let _ = in_tx.try_send(Ok(msg));
        }
        drop(in_tx);
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
        (Self::new(method, in_rx, out_tx, CancellationToken::new()), out_rx)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next client message, `Ok(None)` once the client has half-closed.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        match self.inbound.recv().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// The single request of a unary or server-streaming call. Extra
    /// messages after it are a protocol error.
    pub async fn recv_request(&mut self) -> Result<Message> {
        let request = self.recv().await?.ok_or_else(|| {
            PhiloteError::Protocol(format!("{} call closed without a request", self.method))
        })?;
        if let Some(extra) = self.recv().await? {
            return Err(PhiloteError::Protocol(format!(
                "{} expects one request, got an extra {} message",
                self.method,
                extra.kind_name()
            )));
        }
        Ok(request)
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| PhiloteError::Transport(format!("{} response stream closed", self.method)))
    }
}

// ── Client side ───────────────────────────────────────────────────────────────

/// Client end of one call. Every operation is bounded by the call deadline.
pub struct ClientCall {
    method: Method,
    reader: ReadHalf<BoxedIo>,
    writer: WriteHalf<BoxedIo>,
    timeout: Duration,
    deadline: Instant,
    max_frame_bytes: usize,
    /// Set once the server's `Close` frame has been consumed.
    finished: bool,
}

impl ClientCall {
    pub(crate) async fn open(
        io: BoxedIo,
        method: Method,
        timeout: Duration,
        deadline: Instant,
        max_frame_bytes: usize,
    ) -> Result<Self> {
        let (reader, writer) = tokio::io::split(io);
        let mut call = Self {
            method,
            reader,
            writer,
            timeout,
            deadline,
            max_frame_bytes,
            finished: false,
        };
        let open = Frame::Open {
            version: PROTOCOL_VERSION,
            method,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        call.write(&open).await?;
        Ok(call)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn send(&mut self, msg: Message) -> Result<()> {
        self.write(&Frame::Message(msg)).await
    }

    /// Signal that no more messages follow.
    pub async fn half_close(&mut self) -> Result<()> {
        self.write(&Frame::HalfClose).await
    }

    /// Next server message. `Ok(None)` means the server closed the call with
    /// an OK status; a non-OK status becomes an error.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        if self.finished {
            return Ok(None);
        }
        match self.read().await? {
            Some(Frame::Message(msg)) => Ok(Some(msg)),
            Some(Frame::Close(status)) => {
                self.finished = true;
                if status.is_ok() {
                    Ok(None)
                } else {
                    Err(self.classify(status))
                }
            }
            Some(other) => Err(PhiloteError::Protocol(format!(
                "unexpected {} frame from server",
                other.name()
            ))),
            None => Err(PhiloteError::Transport(format!(
                "{} stream ended without a status",
                self.method
            ))),
        }
    }

    /// Abandon the call. The server's cancellation token fires.
    pub async fn cancel(mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.write(&Frame::Cancel).await {
            debug!(method = %self.method, error = %e, "cancel frame not delivered");
        }
    }

    fn classify(&self, status: Status) -> PhiloteError {
        PhiloteError::from_status(status, self.timeout)
    }

    fn deadline_error(&self) -> PhiloteError {
        self.classify(Status::deadline_exceeded(format!("{} deadline exceeded", self.method)))
    }

    async fn read(&mut self) -> Result<Option<Frame>> {
        match tokio::time::timeout_at(
            self.deadline,
            read_frame(&mut self.reader, self.max_frame_bytes),
        )
        .await
        {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e)) => Err(io_error(self.method, e)),
            Err(_) => Err(self.deadline_error()),
        }
    }

    async fn write(&mut self, frame: &Frame) -> Result<()> {
        let written =
            tokio::time::timeout_at(self.deadline, write_frame(&mut self.writer, frame)).await;
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.status_after_write_failure(e).await),
            Err(_) => Err(self.deadline_error()),
        }
    }

    /// A write fails when the server has already finished the call and
    /// dropped the stream. Its `Close` frame, if one made it out, explains
    /// why and is more useful than the I/O error.
    async fn status_after_write_failure(&mut self, err: io::Error) -> PhiloteError {
        loop {
            match self.read().await {
                Ok(Some(Frame::Close(status))) if !status.is_ok() => {
                    self.finished = true;
                    return self.classify(status);
                }
                Ok(Some(Frame::Message(_))) => continue,
                Err(e @ PhiloteError::Timeout { .. }) => return e,
                _ => return io_error(self.method, err),
            }
        }
    }
}

fn io_error(method: Method, err: io::Error) -> PhiloteError {
    match err.kind() {
        io::ErrorKind::InvalidData => PhiloteError::Serialization(format!("{method}: {err}")),
        _ => PhiloteError::Transport(format!("{method}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_request_rejects_extra_messages() {
        let (mut call, _out) =
            ServerCall::from_messages(Method::Setup, vec![Message::Empty, Message::Empty], 1);
        let err = call.recv_request().await.unwrap_err();
        assert!(err.to_string().contains("extra empty message"));
    }

    #[tokio::test]
    async fn recv_request_rejects_missing_request() {
        let (mut call, _out) = ServerCall::from_messages(Method::GetInfo, vec![], 1);
        assert!(matches!(call.recv_request().await, Err(PhiloteError::Protocol(_))));
    }

    #[tokio::test]
    async fn open_frame_saturates_huge_timeouts() {
        let (client, mut server) = tokio::io::duplex(1024);
        let deadline = Instant::now() + Duration::from_secs(5);
        let _call = ClientCall::open(Box::new(client), Method::Setup, Duration::MAX, deadline, 1024)
            .await
            .unwrap();
        match read_frame(&mut server, 1024).await.unwrap() {
            Some(Frame::Open { timeout_ms, .. }) => assert_eq!(timeout_ms, u64::MAX),
            other => panic!("expected open frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_fails_once_response_stream_dropped() {
        let (call, out) = ServerCall::from_messages(Method::GetInfo, vec![Message::Empty], 1);
        drop(out);
        assert!(matches!(
            call.send(Message::Empty).await,
            Err(PhiloteError::Transport(_))
        ));
    }
}
