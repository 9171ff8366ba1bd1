//! RPC catalogue: the methods a discipline server answers and the messages
//! that flow on a call.
//!
//! | Method                     | Kind             | Request            | Response                   |
//! |----------------------------|------------------|--------------------|----------------------------|
//! | `GetInfo`                  | unary            | `Empty`            | `Properties`               |
//! | `SetStreamOptions`         | unary            | `StreamOptions`    | `Empty`                    |
//! | `SetOptions`               | unary            | `Options`          | `Empty`                    |
//! | `Setup`                    | unary            | `Empty`            | `Empty`                    |
//! | `GetVariableDefinitions`   | server-streaming | `Empty`            | `VariableMeta`*            |
//! | `GetPartialDefinitions`    | server-streaming | `Empty`            | `PartialsMeta`*            |
//! | `GetAvailableOptions`      | unary            | `Empty`            | `OptionsList`              |
//! | `ComputeFunction`          | bidi             | input `Chunk`*     | output `Chunk`*            |
//! | `ComputeGradient`          | bidi             | input `Chunk`*     | partial `Chunk`*           |
//! | `ComputeResiduals`         | bidi             | in/out `Chunk`*    | residual `Chunk`*          |
//! | `SolveResiduals`           | bidi             | input `Chunk`*     | output `Chunk`*            |
//! | `ComputeResidualGradients` | bidi             | in/out `Chunk`*    | partial `Chunk`*           |

use std::fmt;

use serde::{Deserialize, Serialize};

use philote_types::{
    Chunk, DisciplineOptions, DisciplineProperties, OptionDescriptor, PartialsMetaData,
    PhiloteError, Result, StreamOptions, VariableMetaData,
};

// ── Methods ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    GetInfo,
    SetStreamOptions,
    SetOptions,
    Setup,
    GetVariableDefinitions,
    GetPartialDefinitions,
    GetAvailableOptions,
    ComputeFunction,
    ComputeGradient,
    ComputeResiduals,
    SolveResiduals,
    ComputeResidualGradients,
}

/// Message cardinality of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// One request, one response.
    Unary,
    /// One request, a stream of responses.
    ServerStreaming,
    /// A stream each way.
    Bidi,
}

impl Method {
    pub const ALL: [Method; 12] = [
        Method::GetInfo,
        Method::SetStreamOptions,
        Method::SetOptions,
        Method::Setup,
        Method::GetVariableDefinitions,
        Method::GetPartialDefinitions,
        Method::GetAvailableOptions,
        Method::ComputeFunction,
        Method::ComputeGradient,
        Method::ComputeResiduals,
        Method::SolveResiduals,
        Method::ComputeResidualGradients,
    ];

    pub fn kind(&self) -> CallKind {
        match self {
            Self::GetVariableDefinitions | Self::GetPartialDefinitions => CallKind::ServerStreaming,
            Self::ComputeFunction
            | Self::ComputeGradient
            | Self::ComputeResiduals
            | Self::SolveResiduals
            | Self::ComputeResidualGradients => CallKind::Bidi,
            _ => CallKind::Unary,
        }
    }

    /// Methods served by every discipline, explicit or implicit.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self.kind(), CallKind::Bidi)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetInfo                  => "GetInfo",
            Self::SetStreamOptions         => "SetStreamOptions",
            Self::SetOptions               => "SetOptions",
            Self::Setup                    => "Setup",
            Self::GetVariableDefinitions   => "GetVariableDefinitions",
            Self::GetPartialDefinitions    => "GetPartialDefinitions",
            Self::GetAvailableOptions      => "GetAvailableOptions",
            Self::ComputeFunction          => "ComputeFunction",
            Self::ComputeGradient          => "ComputeGradient",
            Self::ComputeResiduals         => "ComputeResiduals",
            Self::SolveResiduals           => "SolveResiduals",
            Self::ComputeResidualGradients => "ComputeResidualGradients",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Empty,
    Properties(DisciplineProperties),
    StreamOptions(StreamOptions),
    Options(DisciplineOptions),
    VariableMeta(VariableMetaData),
    PartialsMeta(PartialsMetaData),
    OptionsList(Vec<OptionDescriptor>),
    Chunk(Chunk),
}

impl Message {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Empty            => "empty",
            Self::Properties(_)    => "properties",
            Self::StreamOptions(_) => "stream options",
            Self::Options(_)       => "options",
            Self::VariableMeta(_)  => "variable metadata",
            Self::PartialsMeta(_)  => "partials metadata",
            Self::OptionsList(_)   => "option list",
            Self::Chunk(_)         => "chunk",
        }
    }

    fn unexpected(&self, wanted: &str) -> PhiloteError {
        PhiloteError::Protocol(format!("expected {wanted} message, got {}", self.kind_name()))
    }

    pub fn expect_empty(self) -> Result<()> {
        match self {
            Self::Empty => Ok(()),
            other => Err(other.unexpected("empty")),
        }
    }

    pub fn into_properties(self) -> Result<DisciplineProperties> {
        match self {
            Self::Properties(p) => Ok(p),
            other => Err(other.unexpected("properties")),
        }
    }

    pub fn into_stream_options(self) -> Result<StreamOptions> {
        match self {
            Self::StreamOptions(o) => Ok(o),
            other => Err(other.unexpected("stream options")),
        }
    }

    pub fn into_options(self) -> Result<DisciplineOptions> {
        match self {
            Self::Options(o) => Ok(o),
            other => Err(other.unexpected("options")),
        }
    }

    pub fn into_variable_meta(self) -> Result<VariableMetaData> {
        match self {
            Self::VariableMeta(m) => Ok(m),
            other => Err(other.unexpected("variable metadata")),
        }
    }

    pub fn into_partials_meta(self) -> Result<PartialsMetaData> {
        match self {
            Self::PartialsMeta(m) => Ok(m),
            other => Err(other.unexpected("partials metadata")),
        }
    }

    pub fn into_options_list(self) -> Result<Vec<OptionDescriptor>> {
        match self {
            Self::OptionsList(list) => Ok(list),
            other => Err(other.unexpected("option list")),
        }
    }

    pub fn into_chunk(self) -> Result<Chunk> {
        match self {
            Self::Chunk(c) => Ok(c),
            other => Err(other.unexpected("chunk")),
        }
    }
}
