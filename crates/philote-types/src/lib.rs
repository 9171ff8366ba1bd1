//! `philote-types` — data model shared by discipline servers and clients.
//!
//! Everything here is plain data: shaped variables and their chunk codec,
//! negotiation metadata, call status, the error taxonomy and configuration.
//! No I/O happens in this crate.

pub mod chunk;
pub mod config;
pub mod error;
pub mod meta;
pub mod status;
pub mod variable;

pub use chunk::Chunk;
pub use error::{PhiloteError, Result};
pub use meta::{
    DataType, DisciplineOptions, DisciplineProperties, OptionDescriptor, OptionValue,
    PartialsMetaData, StreamOptions, VariableMetaData,
};
pub use status::{Status, StatusCode};
pub use variable::{PartialKey, Partials, Variable, VariableType, Variables};
