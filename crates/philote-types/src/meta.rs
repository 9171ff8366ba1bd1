// Metadata exchanged during negotiation: variable and partial descriptors,
// discipline properties, stream options and discipline options.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PhiloteError, Result};
use crate::variable::VariableType;

/// Default number of `f64` values per chunk message.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

// ── Variable / Partials Metadata ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMetaData {
    pub name: String,
    /// `Input` or `Output`.
    pub kind: VariableType,
    pub shape: Vec<usize>,
    pub units: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialsMetaData {
    /// Output (or residual) name.
    pub name: String,
    /// Input name the block is taken with respect to.
    pub input_name: String,
    pub shape: Vec<usize>,
}

// ── Discipline Properties ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisciplineProperties {
    pub name: String,
    pub version: String,
    pub continuous: bool,
    pub differentiable: bool,
    pub provides_gradients: bool,
}

impl Default for DisciplineProperties {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            continuous: true,
            differentiable: true,
            provides_gradients: true,
        }
    }
}

// ── Stream Options ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Maximum number of `f64` values per chunk message.
    pub chunk_size: usize,
}

impl StreamOptions {
    pub fn new(chunk_size: usize) -> Result<Self> {
        let opts = Self { chunk_size };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PhiloteError::Config("stream chunk size must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

// ── Discipline Options ───────────────────────────────────────────────────────

/// A single heterogeneous option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl OptionValue {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_)   => DataType::Bool,
            Self::Int(_)    => DataType::Int,
            Self::Double(_) => DataType::Double,
            Self::String(_) => DataType::String,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Named option values applied to a discipline before setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisciplineOptions {
    pub values: BTreeMap<String, OptionValue>,
}

impl DisciplineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<OptionValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<OptionValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ── Option Discovery ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int,
    Double,
    String,
}

impl DataType {
    /// Map a loosely spelled type name onto a [`DataType`].
    /// Unknown names are advertised as strings.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "bool" => Self::Bool,
            "int" => Self::Int,
            "double" | "float" => Self::Double,
            _ => Self::String,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool   => write!(f, "bool"),
            Self::Int    => write!(f, "int"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
        }
    }
}

/// One entry of the option list returned by `GetAvailableOptions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    pub name: String,
    pub data_type: DataType,
}
