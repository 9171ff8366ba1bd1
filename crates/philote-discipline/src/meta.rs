//! Metadata declared by a discipline: variables, partials and options.
//!
//! Filled in by the `initialize`, `setup` and `setup_partials` hooks through
//! the `add_*` / `declare_partials` methods, and read back by the server when
//! it sizes buffers and resolves incoming chunks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use philote_types::{
    DataType, OptionDescriptor, PartialKey, Partials, PartialsMetaData, PhiloteError, Result,
    Variable, VariableMetaData, VariableType, Variables,
};

use crate::shape::combine_partial_shape;

/// Which compute surface a discipline exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisciplineKind {
    Explicit,
    Implicit,
}

impl DisciplineKind {
    /// Implicit disciplines may declare partials with respect to outputs.
    pub fn allows_output_as_input(&self) -> bool {
        matches!(self, Self::Implicit)
    }
}

impl fmt::Display for DisciplineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Implicit => write!(f, "implicit"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisciplineMeta {
    kind: DisciplineKind,
    var_meta: Vec<VariableMetaData>,
    partials_meta: Vec<PartialsMetaData>,
    /// name → position in `var_meta`. First declaration wins.
    index: HashMap<String, usize>,
    options: BTreeMap<String, DataType>,
}

impl DisciplineMeta {
    pub fn new(kind: DisciplineKind) -> Self {
        Self {
            kind,
            var_meta: Vec::new(),
            partials_meta: Vec::new(),
            index: HashMap::new(),
            options: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> DisciplineKind {
        self.kind
    }

    // ── Declaration ──────────────────────────────────────────────────────

    pub fn add_input(&mut self, name: &str, shape: &[usize], units: &str) -> Result<()> {
        self.add_variable(name, VariableType::Input, shape, units)
    }

    pub fn add_output(&mut self, name: &str, shape: &[usize], units: &str) -> Result<()> {
        self.add_variable(name, VariableType::Output, shape, units)
    }

    fn add_variable(
        &mut self,
        name: &str,
        kind: VariableType,
        shape: &[usize],
        units: &str,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(PhiloteError::Config(format!("{kind} name must not be empty")));
        }
        self.index.entry(name.to_string()).or_insert(self.var_meta.len());
        self.var_meta.push(VariableMetaData {
            name: name.to_string(),
            kind,
            shape: shape.to_vec(),
            units: units.to_string(),
        });
        Ok(())
    }

    /// Record an option the discipline accepts, for `GetAvailableOptions`.
    pub fn add_option(&mut self, name: &str, data_type: DataType) -> Result<()> {
        if name.is_empty() {
            return Err(PhiloteError::Config("option name must not be empty".into()));
        }
        self.options.insert(name.to_string(), data_type);
        Ok(())
    }

    /// Declare the Jacobian block d(output)/d(input) with an inferred shape.
    pub fn declare_partials(&mut self, output: &str, input: &str) -> Result<()> {
        let shape = self.infer_partial_shape(output, input, self.kind.allows_output_as_input())?;
        self.partials_meta.push(PartialsMetaData {
            name: output.to_string(),
            input_name: input.to_string(),
            shape,
        });
        Ok(())
    }

    /// Shape of d(output)/d(input). `output` must be a declared output;
    /// `input` must be a declared input, or any declared variable when
    /// `allow_output_as_input` is set.
    pub fn infer_partial_shape(
        &self,
        output: &str,
        input: &str,
        allow_output_as_input: bool,
    ) -> Result<Vec<usize>> {
        let shape_f = self
            .lookup(output)
            .filter(|m| m.kind == VariableType::Output)
            .map(|m| m.shape.as_slice())
            .ok_or_else(|| PhiloteError::NotFound(format!("output '{output}' is not declared")))?;

        let shape_x = self
            .lookup(input)
            .filter(|m| {
                m.kind == VariableType::Input
                    || (allow_output_as_input && m.kind == VariableType::Output)
            })
            .map(|m| m.shape.as_slice())
            .ok_or_else(|| {
                let wanted = if allow_output_as_input { "input or output" } else { "input" };
                PhiloteError::NotFound(format!("{wanted} '{input}' is not declared"))
            })?;

        Ok(combine_partial_shape(shape_f, shape_x))
    }

    pub fn clear_variables(&mut self) {
        self.var_meta.clear();
        self.index.clear();
    }

    pub fn clear_partials(&mut self) {
        self.partials_meta.clear();
    }

    /// Reject duplicate variable names and duplicate partial blocks.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for m in &self.var_meta {
            if !seen.insert(m.name.as_str()) {
                return Err(PhiloteError::Config(format!(
                    "variable '{}' is declared more than once",
                    m.name
                )));
            }
        }
        let mut seen = HashSet::new();
        for p in &self.partials_meta {
            if !seen.insert((p.name.as_str(), p.input_name.as_str())) {
                return Err(PhiloteError::Config(format!(
                    "partials d{}/d{} are declared more than once",
                    p.name, p.input_name
                )));
            }
        }
        Ok(())
    }

    // ── Lookup ───────────────────────────────────────────────────────────

    pub fn lookup(&self, name: &str) -> Option<&VariableMetaData> {
        self.index.get(name).map(|&i| &self.var_meta[i])
    }

    pub fn variables(&self) -> &[VariableMetaData] {
        &self.var_meta
    }

    pub fn partials(&self) -> &[PartialsMetaData] {
        &self.partials_meta
    }

    pub fn inputs(&self) -> impl Iterator<Item = &VariableMetaData> {
        self.var_meta.iter().filter(|m| m.kind == VariableType::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &VariableMetaData> {
        self.var_meta.iter().filter(|m| m.kind == VariableType::Output)
    }

    pub fn available_options(&self) -> Vec<OptionDescriptor> {
        self.options
            .iter()
            .map(|(name, &data_type)| OptionDescriptor { name: name.clone(), data_type })
            .collect()
    }

    // ── Buffers ──────────────────────────────────────────────────────────

    /// Zero-filled inputs, one per declared input.
    pub fn input_buffers(&self) -> Variables {
        self.inputs()
            .map(|m| (m.name.clone(), Variable::from_meta(m)))
            .collect()
    }

    /// Zero-filled outputs, one per declared output.
    pub fn output_buffers(&self) -> Variables {
        self.outputs()
            .map(|m| (m.name.clone(), Variable::from_meta(m)))
            .collect()
    }

    /// Zero-filled residuals, one per declared output.
    pub fn residual_buffers(&self) -> Variables {
        self.outputs()
            .map(|m| (m.name.clone(), Variable::residual_for(m)))
            .collect()
    }

    /// Zero-filled Jacobian blocks, one per declared partial.
    pub fn partial_buffers(&self) -> Partials {
        self.partials_meta
            .iter()
            .map(|p| (PartialKey::new(&p.name, &p.input_name), Variable::from_partials_meta(p)))
            .collect()
    }
}
