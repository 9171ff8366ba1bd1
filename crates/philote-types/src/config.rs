// Client and server configuration. Plain structs with defaults; the client
// side can pick up overrides from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{PhiloteError, Result};
use crate::meta::StreamOptions;

/// Default per-call deadline: 60 seconds.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default upper bound on a single wire frame: 64 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline applied to every call, covering connect, writes and reads.
    pub rpc_timeout: Duration,

    /// Chunking used when sending values; also pushed to the server by
    /// `SetStreamOptions`.
    pub stream_options: StreamOptions,

    /// Largest frame accepted from the server.
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            stream_options: StreamOptions::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ClientConfig {
    /// Defaults, overridden by `PHILOTE_RPC_TIMEOUT_MS` and
    /// `PHILOTE_CHUNK_SIZE` when set.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(ms) = env_usize("PHILOTE_RPC_TIMEOUT_MS")? {
            cfg.rpc_timeout = Duration::from_millis(ms as u64);
        }
        if let Some(chunk_size) = env_usize("PHILOTE_CHUNK_SIZE")? {
            cfg.stream_options = StreamOptions::new(chunk_size)?;
        }
        Ok(cfg)
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| PhiloteError::Config(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// How compute calls against one discipline instance relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Calls run side by side; a discipline with shared mutable state
    /// synchronizes itself.
    #[default]
    Concurrent,
    /// Compute calls are admitted one at a time.
    Serialized,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen address. Port 0 = OS-assigned.
    pub listen_addr: SocketAddr,

    pub concurrency: ConcurrencyPolicy,

    /// Buffered messages per direction of a call.
    pub channel_capacity: usize,

    /// Largest frame accepted from a client.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            concurrency: ConcurrencyPolicy::default(),
            channel_capacity: 256,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
