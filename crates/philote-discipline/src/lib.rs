//! `philote-discipline` — the server half of a Philote discipline.
//!
//! Implement [`ExplicitDiscipline`] or [`ImplicitDiscipline`], wrap it in a
//! [`DisciplineServer`], and hand that to a [`philote_net::Server`] (TCP) or
//! a [`philote_net::Channel::in_process`] channel.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use philote_discipline::{Discipline, DisciplineServer, ExplicitDiscipline};
//! # use philote_types::config::ServerConfig;
//! # struct Noop;
//! # impl Discipline for Noop {}
//! # impl ExplicitDiscipline for Noop {}
//! # async fn demo() -> philote_types::Result<()> {
//! let server = Arc::new(DisciplineServer::explicit(Noop)?);
//! philote_net::Server::bind(&ServerConfig::default(), server)
//!     .await?
//!     .serve()
//!     .await
//! # }
//! ```

pub mod discipline;
pub mod lifecycle;
pub mod meta;
pub mod server;
pub mod shape;

pub use discipline::{Discipline, ExplicitDiscipline, Hosted, ImplicitDiscipline};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use meta::{DisciplineKind, DisciplineMeta};
pub use server::DisciplineServer;
pub use shape::combine_partial_shape;
