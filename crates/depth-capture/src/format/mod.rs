// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch container format.
//!
//! Every batch file holds the same named arrays, which is the contract
//! external dataset tools rely on:
//!
//! | Name          | Type | Shape     |
//! |---------------|------|-----------|
//! | `depths`      | f32  | [N, H, W] |
//! | `poses`       | f32  | [N, 6]    |
//! | `frames`      | i64  | [N]       |
//! | `distances`   | f32  | [N]       |
//! | `actions`     | u8   | [N]       |
//! | `victim_dirs` | f32  | [N, 3]    |
//! | `split`       | text | scalar    |

pub mod dcap;

pub use dcap::{
    read_batch, BatchEncoder, BatchFile, BatchReader, FileHeader, FLAG_ZLIB, FORMAT_VERSION,
    MAGIC,
};

use std::io;
use thiserror::Error;

/// File extension of batch containers.
pub const EXTENSION: &str = "dcap";

/// Array names every batch file must contain.
pub const REQUIRED_ARRAYS: [&str; 6] = [
    "depths",
    "poses",
    "frames",
    "distances",
    "actions",
    "victim_dirs",
];

/// Name of the scalar split field.
pub const SPLIT_FIELD: &str = "split";

/// Container format errors.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },

    #[error("Missing array '{0}'")]
    MissingArray(String),

    #[error("Array '{field}' has irregular per-sample shapes: {shapes:?}")]
    IrregularShape {
        field: &'static str,
        shapes: Vec<Vec<usize>>,
    },

    #[error("Invalid batch: {0}")]
    Batch(#[from] crate::batch::BatchError),
}

/// Element type of a stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DType {
    F32 = 1,
    I64 = 2,
    U8 = 3,
}

impl DType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::F32),
            2 => Some(Self::I64),
            3 => Some(Self::U8),
            _ => None,
        }
    }

    /// Element size in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::I64 => 8,
            Self::U8 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::I64 => "i64",
            Self::U8 => "u8",
        }
    }
}

/// Flat element storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    F32(Vec<f32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
}

impl ArrayData {
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::I64(_) => DType::I64,
            Self::U8(_) => DType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            Self::I64(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            Self::U8(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// One named entry of a container.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Uniform array with a single shape.
    Dense { shape: Vec<usize>, data: ArrayData },
    /// Per-item shapes, used when items could not be stacked.
    Ragged {
        shapes: Vec<Vec<usize>>,
        data: ArrayData,
    },
    /// Scalar string.
    Text(String),
}

impl Entry {
    /// Number of items along the first axis (1 for scalars).
    pub fn item_count(&self) -> usize {
        match self {
            Self::Dense { shape, .. } => shape.first().copied().unwrap_or(1),
            Self::Ragged { shapes, .. } => shapes.len(),
            Self::Text(_) => 1,
        }
    }

    pub fn data(&self) -> Option<&ArrayData> {
        match self {
            Self::Dense { data, .. } | Self::Ragged { data, .. } => Some(data),
            Self::Text(_) => None,
        }
    }

    /// Human-readable shape, e.g. `f32[3, 48, 64]` or `f32[ragged x 3]`.
    pub fn describe(&self) -> String {
        match self {
            Self::Dense { shape, data } => {
                let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
                format!("{}[{}]", data.dtype().name(), dims.join(", "))
            }
            Self::Ragged { shapes, data } => {
                format!("{}[ragged x {}]", data.dtype().name(), shapes.len())
            }
            Self::Text(s) => format!("text({:?})", s),
        }
    }
}

/// Product of dimensions, saturating at `usize::MAX` for corrupt shapes.
pub(crate) fn element_count(shape: &[usize]) -> usize {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_codes() {
        for dtype in [DType::F32, DType::I64, DType::U8] {
            assert_eq!(DType::from_u8(dtype as u8), Some(dtype));
        }
        assert_eq!(DType::from_u8(0), None);
        assert_eq!(DType::I64.size(), 8);
    }

    #[test]
    fn test_entry_describe() {
        let dense = Entry::Dense {
            shape: vec![3, 6],
            data: ArrayData::F32(vec![0.0; 18]),
        };
        assert_eq!(dense.describe(), "f32[3, 6]");
        assert_eq!(dense.item_count(), 3);

        let ragged = Entry::Ragged {
            shapes: vec![vec![1, 1], vec![2, 2]],
            data: ArrayData::F32(vec![0.0; 5]),
        };
        assert_eq!(ragged.describe(), "f32[ragged x 2]");
        assert_eq!(Entry::Text("val".into()).item_count(), 1);
    }
}
