//! `philote-net` — call transport for Philote disciplines.
//!
//! A call is one byte stream carrying length-prefixed bincode [`Frame`]s:
//! the client opens with the method and its deadline, streams request
//! messages, half-closes, then reads responses until the server's final
//! [`Status`](philote_types::Status). Unary, server-streaming and
//! bidirectional-streaming methods all share this shape.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use philote_net::{Channel, Message, Method, Service};
//!
//! # async fn demo(service: Arc<dyn Service>) -> philote_types::Result<()> {
//! let channel = Channel::in_process(service);
//! let info = channel
//!     .unary(Method::GetInfo, Message::Empty, Duration::from_secs(5))
//!     .await?
//!     .into_properties()?;
//! println!("connected to {}", info.name);
//! # Ok(())
//! # }
//! ```

pub mod array;
pub mod call;
pub mod channel;
pub mod codec;
pub mod rpc;
pub mod server;

pub use array::{send_variable, ChunkSink, ChunkTag};
pub use call::{ClientCall, ServerCall};
pub use channel::{BoxedIo, Channel, Connect, InProcessConnector, TcpConnector};
pub use codec::{Frame, PHILOTE_PROTOCOL, PROTOCOL_VERSION};
pub use rpc::{CallKind, Message, Method};
pub use server::{serve_connection, CallLimits, Server, Service};
