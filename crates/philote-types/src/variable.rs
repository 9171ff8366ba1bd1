//! Shaped `f64` arrays exchanged with a discipline.
//!
//! A [`Variable`] owns a flat row-major buffer whose length always equals the
//! product of its shape. Both the chunk producer ([`Variable::chunks`]) and the
//! chunk consumer ([`Variable::assign_chunk`]) live here so the two ends of a
//! transfer share the same arithmetic.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::chunk::{chunk_ranges, Chunk};
use crate::error::{PhiloteError, Result};
use crate::meta::{PartialsMetaData, VariableMetaData};

// ── Variable Type ─────────────────────────────────────────────────────────────

/// Role tag carried by metadata entries and chunk messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    Input,
    Output,
    Residual,
    Partial,
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input    => write!(f, "input"),
            Self::Output   => write!(f, "output"),
            Self::Residual => write!(f, "residual"),
            Self::Partial  => write!(f, "partial"),
        }
    }
}

// ── Partial Key ───────────────────────────────────────────────────────────────

/// Identity of a Jacobian block: d(output) / d(input).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartialKey {
    pub output: String,
    pub input: String,
}

impl PartialKey {
    pub fn new(output: impl Into<String>, input: impl Into<String>) -> Self {
        Self { output: output.into(), input: input.into() }
    }
}

impl fmt::Display for PartialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.output, self.input)
    }
}

/// Variables keyed by name.
pub type Variables = BTreeMap<String, Variable>;

/// Jacobian blocks keyed by `(output, input)`.
pub type Partials = BTreeMap<PartialKey, Variable>;

// ── Variable ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    kind: VariableType,
    shape: Vec<usize>,
    data: Vec<f64>,
}

/// Number of elements described by `shape`. The empty shape holds nothing.
pub fn shape_len(shape: &[usize]) -> usize {
    if shape.is_empty() {
        0
    } else {
        shape.iter().product()
    }
}

impl Variable {
    /// Zero-filled variable of the given shape.
    pub fn new(kind: VariableType, shape: &[usize]) -> Self {
        Self {
            kind,
            shape: shape.to_vec(),
            data: vec![0.0; shape_len(shape)],
        }
    }

    /// Variable holding `data`, which must match the shape exactly.
    pub fn with_data(kind: VariableType, shape: &[usize], data: Vec<f64>) -> Result<Self> {
        let expected = shape_len(shape);
        if data.len() != expected {
            return Err(PhiloteError::Bounds(format!(
                "shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { kind, shape: shape.to_vec(), data })
    }

    /// Scalar (`[1]`) variable.
    pub fn scalar(kind: VariableType, value: f64) -> Self {
        Self { kind, shape: vec![1], data: vec![value] }
    }

    pub fn from_meta(meta: &VariableMetaData) -> Self {
        Self::new(meta.kind, &meta.shape)
    }

    /// Residual buffer shaped like the output described by `meta`.
    pub fn residual_for(meta: &VariableMetaData) -> Self {
        Self::new(VariableType::Residual, &meta.shape)
    }

    pub fn from_partials_meta(meta: &PartialsMetaData) -> Self {
        Self::new(VariableType::Partial, &meta.shape)
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn kind(&self) -> VariableType {
        self.kind
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn get(&self, i: usize) -> Option<f64> {
        self.data.get(i).copied()
    }

    // ── Segments ─────────────────────────────────────────────────────────

    /// The inclusive range `[start, end]`.
    pub fn segment(&self, start: usize, end: usize) -> Result<&[f64]> {
        self.check_range(start, end)?;
        Ok(&self.data[start..=end])
    }

    /// Overwrite the inclusive range `[start, end]` with `values`.
    pub fn set_segment(&mut self, start: usize, end: usize, values: &[f64]) -> Result<()> {
        self.check_range(start, end)?;
        let expected = end - start + 1;
        if values.len() != expected {
            return Err(PhiloteError::Bounds(format!(
                "segment [{start}, {end}] needs {expected} values, got {}",
                values.len()
            )));
        }
        self.data[start..=end].copy_from_slice(values);
        Ok(())
    }

    fn check_range(&self, start: usize, end: usize) -> Result<()> {
        if start > end {
            return Err(PhiloteError::Bounds(format!(
                "start index {start} greater than end index {end}"
            )));
        }
        if end >= self.data.len() {
            return Err(PhiloteError::Bounds(format!(
                "end index {end} out of range for length {}",
                self.data.len()
            )));
        }
        Ok(())
    }

    // ── Chunk codec ──────────────────────────────────────────────────────

    /// One chunk covering the inclusive range `[start, end]`. On a
    /// zero-length buffer only the framing chunk `[0, 0]` exists.
    pub fn create_chunk(
        &self,
        name: &str,
        input_name: Option<&str>,
        kind: VariableType,
        start: usize,
        end: usize,
    ) -> Result<Chunk> {
        let data = if self.data.is_empty() && start == 0 && end == 0 {
            Vec::new()
        } else {
            self.segment(start, end)?.to_vec()
        };
        Ok(Chunk {
            name: name.to_string(),
            input_name: input_name.map(str::to_string),
            start: start as i64,
            end: end as i64,
            kind,
            data,
        })
    }

    /// Split the buffer into chunk messages, in increasing index order.
    /// Chunks are produced lazily so large buffers are not copied twice.
    pub fn chunks<'a>(
        &'a self,
        name: &str,
        input_name: Option<&str>,
        kind: VariableType,
        chunk_size: usize,
    ) -> Result<impl Iterator<Item = Chunk> + Send + 'a> {
        let ranges = chunk_ranges(self.data.len(), chunk_size)?;
        let name = name.to_string();
        let input_name = input_name.map(str::to_string);
        Ok(ranges.into_iter().map(move |range| {
            let start = range.start as i64;
            let end = if range.is_empty() { start } else { range.end as i64 - 1 };
            Chunk {
                name: name.clone(),
                input_name: input_name.clone(),
                start,
                end,
                kind,
                data: self.data[range].to_vec(),
            }
        }))
    }

    /// Write a received chunk into the buffer. Nothing is written unless the
    /// chunk's bounds and payload length are valid.
    pub fn assign_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        if self.data.is_empty() && chunk.is_framing_only() {
            return Ok(());
        }
        let range = chunk.target_range(self.data.len())?;
        self.data[range].copy_from_slice(&chunk.data);
        Ok(())
    }
}

impl Index<usize> for Variable {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.data[i]
    }
}

impl IndexMut<usize> for Variable {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.data[i]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Variable {
        let data = (0..len).map(|i| i as f64 * 0.5 - 3.0).collect();
        Variable::with_data(VariableType::Output, &[len], data).unwrap()
    }

    fn round_trip(len: usize, chunk_size: usize) {
        let sent = ramp(len);
        let chunks: Vec<Chunk> = sent
            .chunks("v", None, VariableType::Output, chunk_size)
            .unwrap()
            .collect();
        assert_eq!(chunks.len(), len.div_ceil(chunk_size).max(1));

        let mut received = Variable::new(VariableType::Output, &[len]);
        for c in &chunks {
            received.assign_chunk(c).unwrap();
        }
        assert_eq!(received, sent, "len={len} chunk_size={chunk_size}");
    }

    #[test]
    fn construction_sizes_from_shape() {
        assert_eq!(Variable::new(VariableType::Input, &[3, 4]).len(), 12);
        assert_eq!(Variable::new(VariableType::Input, &[1]).len(), 1);
    }

    #[test]
    fn empty_and_zero_dimension_shapes_do_not_fault() {
        assert!(Variable::new(VariableType::Input, &[]).is_empty());
        assert!(Variable::new(VariableType::Input, &[4, 0, 2]).is_empty());
    }

    #[test]
    fn with_data_checks_length() {
        assert!(Variable::with_data(VariableType::Input, &[2, 2], vec![1.0; 3]).is_err());
    }

    #[test]
    fn chunk_round_trip_grid() {
        for len in [0, 1, 2, 7, 10, 999, 1000, 1001, 2500] {
            for chunk_size in [1, 3, 7, 1000, 5000] {
                round_trip(len, chunk_size);
            }
        }
    }

    #[test]
    fn last_chunk_carries_the_remainder() {
        let chunks: Vec<Chunk> = ramp(10)
            .chunks("v", None, VariableType::Output, 4)
            .unwrap()
            .collect();
        let last = chunks.last().unwrap();
        assert_eq!((last.start, last.end), (8, 9));
        assert_eq!(last.data.len(), 2);
    }

    #[test]
    fn empty_variable_emits_one_framing_chunk() {
        let var = Variable::new(VariableType::Output, &[0]);
        let chunks: Vec<Chunk> = var
            .chunks("v", None, VariableType::Output, 10)
            .unwrap()
            .collect();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_framing_only());

        let mut target = Variable::new(VariableType::Output, &[0]);
        target.assign_chunk(&chunks[0]).unwrap();
    }

    #[test]
    fn partial_chunks_carry_input_name() {
        let chunks: Vec<Chunk> = ramp(3)
            .chunks("f", Some("x"), VariableType::Partial, 2)
            .unwrap()
            .collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.input_name.as_deref() == Some("x")));
        assert!(chunks.iter().all(|c| c.kind == VariableType::Partial));
    }

    #[test]
    fn create_chunk_slices_inclusive_range() {
        let chunk = ramp(6).create_chunk("v", None, VariableType::Output, 2, 4).unwrap();
        assert_eq!((chunk.start, chunk.end), (2, 4));
        assert_eq!(chunk.data, vec![-2.0, -1.5, -1.0]);

        assert!(ramp(6).create_chunk("v", None, VariableType::Output, 4, 6).is_err());
        let empty = Variable::new(VariableType::Output, &[0]);
        let framing = empty.create_chunk("v", None, VariableType::Output, 0, 0).unwrap();
        assert!(framing.is_framing_only());
    }

    #[test]
    fn rejected_chunk_leaves_buffer_untouched() {
        let mut var = Variable::with_data(VariableType::Input, &[3], vec![1.0, 2.0, 3.0]).unwrap();
        let bad = Chunk {
            name: "v".into(),
            input_name: None,
            start: 1,
            end: 3,
            kind: VariableType::Input,
            data: vec![9.0; 3],
        };
        assert!(var.assign_chunk(&bad).is_err());
        assert_eq!(var.data(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn segments() {
        let mut var = Variable::new(VariableType::Input, &[5]);
        var.set_segment(1, 3, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(var.segment(0, 4).unwrap(), &[0.0, 1.0, 2.0, 3.0, 0.0]);
        assert!(var.set_segment(3, 1, &[]).is_err());
        assert!(var.set_segment(4, 5, &[1.0, 2.0]).is_err());
        assert!(var.set_segment(0, 1, &[1.0]).is_err());
        assert!(var.segment(2, 9).is_err());
    }

    #[test]
    fn indexing() {
        let mut var = Variable::new(VariableType::Output, &[2]);
        var[1] = 4.5;
        assert_eq!(var[1], 4.5);
        assert_eq!(var.get(2), None);
    }

    #[test]
    fn partial_keys_order_by_output_then_input() {
        let mut partials = Partials::new();
        partials.insert(PartialKey::new("g", "a"), Variable::scalar(VariableType::Partial, 1.0));
        partials.insert(PartialKey::new("f", "y"), Variable::scalar(VariableType::Partial, 2.0));
        partials.insert(PartialKey::new("f", "x"), Variable::scalar(VariableType::Partial, 3.0));
        let keys: Vec<String> = partials.keys().map(ToString::to_string).collect();
        assert_eq!(keys, ["f/x", "f/y", "g/a"]);
    }
}
