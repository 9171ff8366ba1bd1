//! Chunk wire message and the slicing arithmetic shared by both ends.
//!
//! A variable of length `L` sent with chunk size `C` travels as
//! `max(1, ceil(L / C))` chunks. Chunk `i` covers the inclusive index range
//! `[i·C, min((i+1)·C, L) − 1]`. A zero-length variable still emits a single
//! chunk with an empty payload (`start = end = 0`) so the stream framing of
//! every variable is the same.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{PhiloteError, Result};
use crate::variable::VariableType;

/// One bounded slice of a variable's flat buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Variable name; for partials, the output (function) name.
    pub name: String,
    /// Input name for partials, `None` for plain variables.
    pub input_name: Option<String>,
    /// Inclusive start index. Signed on the wire so malformed offsets can be
    /// rejected instead of wrapping.
    pub start: i64,
    /// Inclusive end index.
    pub end: i64,
    /// Role of the variable this chunk belongs to.
    pub kind: VariableType,
    pub data: Vec<f64>,
}

impl Chunk {
    /// True for the empty-payload chunk emitted for zero-length variables.
    pub fn is_framing_only(&self) -> bool {
        self.data.is_empty() && self.start == 0 && self.end == 0
    }

    /// Validate `start`/`end` against a buffer of `len` elements and return
    /// the half-open range the payload should be written to.
    pub fn target_range(&self, len: usize) -> Result<Range<usize>> {
        if self.start < 0 {
            return Err(PhiloteError::Bounds(format!(
                "start index cannot be negative ({}) for variable '{}'",
                self.start, self.name
            )));
        }
        if self.end < 0 {
            return Err(PhiloteError::Bounds(format!(
                "end index cannot be negative ({}) for variable '{}'",
                self.end, self.name
            )));
        }
        let start = usize::try_from(self.start)
            .map_err(|_| PhiloteError::Bounds(format!("start index {} overflows", self.start)))?;
        let end = usize::try_from(self.end)
            .map_err(|_| PhiloteError::Bounds(format!("end index {} overflows", self.end)))?;

        if start > end {
            return Err(PhiloteError::Bounds(format!(
                "start index {start} greater than end index {end} for variable '{}'",
                self.name
            )));
        }
        if end >= len {
            return Err(PhiloteError::Bounds(format!(
                "end index {end} out of range for variable '{}' of length {len}",
                self.name
            )));
        }
        let expected = end - start + 1;
        if self.data.len() != expected {
            return Err(PhiloteError::Bounds(format!(
                "chunk for variable '{}' carries {} values but range [{start}, {end}] needs {expected}",
                self.name,
                self.data.len()
            )));
        }
        Ok(start..end + 1)
    }
}

// ── Slicing arithmetic ───────────────────────────────────────────────────────

/// Number of chunks needed to send `len` elements, never less than one.
pub fn chunk_count(len: usize, chunk_size: usize) -> Result<usize> {
    if chunk_size == 0 {
        return Err(PhiloteError::Bounds("chunk size must be > 0".into()));
    }
    Ok(len.div_ceil(chunk_size).max(1))
}

/// Half-open element ranges of every chunk, in increasing index order.
pub fn chunk_ranges(len: usize, chunk_size: usize) -> Result<Vec<Range<usize>>> {
    let count = chunk_count(len, chunk_size)?;
    Ok((0..count)
        .map(|i| {
            let start = (i * chunk_size).min(len);
            let end = ((i + 1) * chunk_size).min(len);
            start..end
        })
        .collect())
}
