// philote-net::server — accept loop and per-call driver.
//
// Each accepted stream carries exactly one call. The driver splits the stream
// into a reader task (frames → `ServerCall` inbound channel) and a writer task
// (`ServerCall` outbound channel → frames), runs the service handler between
// them, then writes the final `Close` status.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use philote_types::config::ServerConfig;
use philote_types::{PhiloteError, Result, Status};

use crate::call::ServerCall;
use crate::codec::{read_frame, write_frame, Frame, PHILOTE_PROTOCOL, PROTOCOL_VERSION};
use crate::rpc::Message;

/// How long the reader keeps draining after the final status is written, so
/// a client still mid-send sees the status rather than a reset.
const LINGER: Duration = Duration::from_secs(1);

/// A call handler. One `call` per accepted call stream; calls may run
/// concurrently.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Handle one call. `Err` becomes the call's final status.
    async fn call(&self, call: ServerCall) -> std::result::Result<(), Status>;
}

/// Buffering and size limits applied to every call stream.
#[derive(Debug, Clone, Copy)]
pub struct CallLimits {
    pub channel_capacity: usize,
    pub max_frame_bytes: usize,
}

impl From<&ServerConfig> for CallLimits {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            channel_capacity: cfg.channel_capacity.max(1),
            max_frame_bytes: cfg.max_frame_bytes,
        }
    }
}

impl Default for CallLimits {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// TCP front end for a [`Service`].
pub struct Server {
    listener: TcpListener,
    service: Arc<dyn Service>,
    limits: CallLimits,
}

impl Server {
    pub async fn bind(config: &ServerConfig, service: Arc<dyn Service>) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|e| PhiloteError::Transport(format!("bind {}: {e}", config.listen_addr)))?;
        Ok(Self { listener, service, limits: CallLimits::from(config) })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| PhiloteError::Transport(e.to_string()))
    }

    /// Serve until the task is dropped.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves. Calls already in flight run to
    /// completion on their own tasks.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!(addr = %self.local_addr()?, protocol = PHILOTE_PROTOCOL, "discipline server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, %e, "set_nodelay failed");
                        }
                        debug!(%peer, "call stream accepted");
                        tokio::spawn(serve_connection(stream, Arc::clone(&self.service), self.limits));
                    }
                    Err(e) => warn!(%e, "accept failed"),
                },
                _ = &mut shutdown => {
                    info!("discipline server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

// ── Call driver ───────────────────────────────────────────────────────────────

/// Run one call over `io` against `service`.
pub async fn serve_connection<IO>(io: IO, service: Arc<dyn Service>, limits: CallLimits)
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(io);

    let (method, timeout_ms) = match read_frame(&mut reader, limits.max_frame_bytes).await {
        Ok(Some(Frame::Open { version, method, timeout_ms })) if version == PROTOCOL_VERSION => {
            (method, timeout_ms)
        }
        Ok(Some(Frame::Open { version, .. })) => {
            let status = Status::unimplemented(format!(
                "protocol version {version} not supported (server speaks {PROTOCOL_VERSION})"
            ));
            close(&mut writer, status).await;
            return;
        }
        Ok(Some(other)) => {
            let status = Status::invalid_argument(format!(
                "expected open frame, got {}",
                other.name()
            ));
            close(&mut writer, status).await;
            return;
        }
        Ok(None) => return,
        Err(e) => {
            warn!(%e, "failed to read call header");
            return;
        }
    };

    let call_id = Uuid::new_v4();
    debug!(%call_id, %method, timeout_ms, "call opened");

    let (in_tx, in_rx) = mpsc::channel(limits.channel_capacity);
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(limits.channel_capacity);
    let cancel = CancellationToken::new();

    let mut inbound_task = tokio::spawn(pump_inbound(
        reader,
        in_tx,
        cancel.clone(),
        limits.max_frame_bytes,
    ));
    let outbound_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            write_frame(&mut writer, &Frame::Message(msg)).await?;
        }
        Ok::<_, std::io::Error>(writer)
    });

    let call = ServerCall::new(method, in_rx, out_tx, cancel.clone());
    let result = if timeout_ms > 0 {
        let limit = Duration::from_millis(timeout_ms);
        match tokio::time::timeout(limit, service.call(call)).await {
            Ok(r) => r,
            Err(_) => {
                cancel.cancel();
                Err(Status::deadline_exceeded(format!(
                    "{method} did not finish within {timeout_ms}ms"
                )))
            }
        }
    } else {
        service.call(call).await
    };
    let status = result.err().unwrap_or_else(Status::ok);

    match outbound_task.await {
        Ok(Ok(mut writer)) => {
            close(&mut writer, status.clone()).await;
        }
        Ok(Err(e)) => debug!(%call_id, %e, "client stopped reading responses"),
        Err(e) => warn!(%call_id, %e, "response writer task failed"),
    }

    let _ = tokio::time::timeout(LINGER, &mut inbound_task).await;
    inbound_task.abort();

    if status.is_ok() {
        debug!(%call_id, %method, "call completed");
    } else {
        warn!(%call_id, %method, code = %status.code, message = %status.message, "call failed");
    }
}

async fn close<W>(writer: &mut W, status: Status)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = write_frame(writer, &Frame::Close(status)).await {
        debug!(%e, "final status not delivered");
    }
    let _ = writer.shutdown().await;
}

/// Forward client frames into the call's inbound channel.
///
/// `HalfClose` ends the inbound stream. `Cancel`, EOF before half-close and
/// read errors fire the cancellation token and, if the handler is still
/// reading, leave an error in the stream so it cannot mistake a truncated
/// stream for a complete one. After half-close the reader keeps draining so
/// a later `Cancel` or disconnect is still observed.
async fn pump_inbound<R>(
    mut reader: R,
    in_tx: mpsc::Sender<Result<Message>>,
    cancel: CancellationToken,
    max_frame_bytes: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut in_tx = Some(in_tx);
    loop {
        let failure = match read_frame(&mut reader, max_frame_bytes).await {
            Ok(Some(Frame::Message(msg))) => {
                if let Some(tx) = &in_tx {
                    if tx.send(Ok(msg)).await.is_err() {
                        in_tx = None;
                    }
                }
                continue;
            }
            Ok(Some(Frame::HalfClose)) => {
                in_tx = None;
                continue;
            }
            Ok(Some(Frame::Cancel)) => PhiloteError::Cancelled("call cancelled by client".into()),
            Ok(Some(other)) => {
                PhiloteError::Protocol(format!("unexpected {} frame from client", other.name()))
            }
            Ok(None) => PhiloteError::Cancelled("client closed the stream".into()),
            Err(e) => PhiloteError::Transport(format!("reading client stream: {e}")),
        };

        cancel.cancel();
        if let Some(tx) = in_tx.take() {
            let _ = tx.send(Err(failure)).await;
        }
        return;
    }
}
