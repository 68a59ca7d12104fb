// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batches and train/val/test split assignment.
//!
//! A [`Batch`] is the unit of persistence: the collector's buffer frozen at
//! flush time, stored column by column in the same shape the on-disk
//! container uses.

use crate::sample::{ActionLabel, DepthMap, Direction, Pose, Sample};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Dataset partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }

    /// Index into per-split arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Train => 0,
            Self::Val => 1,
            Self::Test => 2,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "val" => Ok(Self::Val),
            "test" => Ok(Self::Test),
            other => Err(BatchError::UnknownSplit(other.to_string())),
        }
    }
}

/// Batch construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("Batch is empty")]
    Empty,

    #[error("Column '{column}' has {got} entries, expected {expected}")]
    LengthMismatch {
        column: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Unknown split '{0}'")]
    UnknownSplit(String),

    #[error("Invalid split ratios: {0}")]
    InvalidRatios(String),
}

/// Weighted split ratios.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl SplitRatios {
    /// Allowed deviation of the ratio sum from 1.0.
    pub const SUM_TOLERANCE: f64 = 0.01;

    pub fn new(train: f64, val: f64, test: f64) -> Result<Self, BatchError> {
        let ratios = Self { train, val, test };
        ratios.validate()?;
        Ok(ratios)
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        for (name, value) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !value.is_finite() || value < 0.0 {
                return Err(BatchError::InvalidRatios(format!(
                    "{} ratio must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(BatchError::InvalidRatios(format!(
                "ratios must sum to 1.0, got {:.4}",
                sum
            )));
        }
        Ok(())
    }

    pub fn get(&self, split: Split) -> f64 {
        match split {
            Split::Train => self.train,
            Split::Val => self.val,
            Split::Test => self.test,
        }
    }
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.98,
            val: 0.01,
            test: 0.01,
        }
    }
}

/// Draws a split per batch from [`SplitRatios`].
#[derive(Debug, Clone)]
pub struct SplitSelector {
    ratios: SplitRatios,
    rng: fastrand::Rng,
}

impl SplitSelector {
    pub fn new(ratios: SplitRatios) -> Self {
        Self {
            ratios,
            rng: fastrand::Rng::new(),
        }
    }

    /// Deterministic selector, for reproducible datasets and tests.
    pub fn with_seed(ratios: SplitRatios, seed: u64) -> Self {
        Self {
            ratios,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn ratios(&self) -> SplitRatios {
        self.ratios
    }

    /// Uniform draw in `[0, 1)` against the cumulative ratios.
    pub fn select(&mut self) -> Split {
        let p = self.rng.f64();
        if p < self.ratios.train {
            Split::Train
        } else if p < self.ratios.train + self.ratios.val {
            Split::Val
        } else {
            Split::Test
        }
    }
}

/// Best-effort identity of a batch, carried by events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchId {
    pub split: Split,
    pub min_frame_index: u64,
    pub len: usize,
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_batch_{:06} ({} samples)",
            self.split, self.min_frame_index, self.len
        )
    }
}

/// Immutable batch of samples, stored as equal-length columns.
#[derive(Debug, Clone)]
pub struct Batch {
    depths: Vec<DepthMap>,
    poses: Vec<Pose>,
    frames: Vec<u64>,
    distances: Vec<f32>,
    actions: Vec<ActionLabel>,
    victim_dirs: Vec<Direction>,
    split: Split,
    min_frame_index: u64,
    destination: PathBuf,
    generation: u64,
}

impl Batch {
    /// Freeze buffered samples into a batch bound for `destination`.
    ///
    /// `generation` identifies the directory layout the batch was flushed
    /// under; the writer resets its split counters when it changes.
    pub fn from_samples(
        samples: Vec<Sample>,
        split: Split,
        destination: impl Into<PathBuf>,
        generation: u64,
    ) -> Result<Self, BatchError> {
        let n = samples.len();
        let mut depths = Vec::with_capacity(n);
        let mut poses = Vec::with_capacity(n);
        let mut frames = Vec::with_capacity(n);
        let mut distances = Vec::with_capacity(n);
        let mut actions = Vec::with_capacity(n);
        let mut victim_dirs = Vec::with_capacity(n);

        for sample in samples {
            depths.push(sample.depth);
            poses.push(sample.pose);
            frames.push(sample.frame_index);
            distances.push(sample.distance);
            actions.push(sample.action_label);
            victim_dirs.push(sample.direction);
        }

        Self::from_columns(
            Columns {
                depths,
                poses,
                frames,
                distances,
                actions,
                victim_dirs,
            },
            split,
            destination,
            generation,
        )
    }

    /// Build a batch from pre-stacked columns, checking that all lengths agree.
    pub fn from_columns(
        columns: Columns,
        split: Split,
        destination: impl Into<PathBuf>,
        generation: u64,
    ) -> Result<Self, BatchError> {
        let expected = columns.frames.len();
        if expected == 0 {
            return Err(BatchError::Empty);
        }

        let lengths = [
            ("depths", columns.depths.len()),
            ("poses", columns.poses.len()),
            ("distances", columns.distances.len()),
            ("actions", columns.actions.len()),
            ("victim_dirs", columns.victim_dirs.len()),
        ];
        for (column, got) in lengths {
            if got != expected {
                return Err(BatchError::LengthMismatch {
                    column,
                    expected,
                    got,
                });
            }
        }

        let min_frame_index = columns.frames.iter().copied().min().unwrap_or(0);

        Ok(Self {
            depths: columns.depths,
            poses: columns.poses,
            frames: columns.frames,
            distances: columns.distances,
            actions: columns.actions,
            victim_dirs: columns.victim_dirs,
            split,
            min_frame_index,
            destination: destination.into(),
            generation,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn min_frame_index(&self) -> u64 {
        self.min_frame_index
    }

    /// Split folder this batch is written into.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn depths(&self) -> &[DepthMap] {
        &self.depths
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn frames(&self) -> &[u64] {
        &self.frames
    }

    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    pub fn actions(&self) -> &[ActionLabel] {
        &self.actions
    }

    pub fn victim_dirs(&self) -> &[Direction] {
        &self.victim_dirs
    }

    pub fn id(&self) -> BatchId {
        BatchId {
            split: self.split,
            min_frame_index: self.min_frame_index,
            len: self.len(),
        }
    }

    /// `<split>_batch_<min_frame_index:06>.<extension>`
    pub fn file_name(&self, extension: &str) -> String {
        batch_file_name(self.split, self.min_frame_index, extension)
    }

    /// Full destination path of the batch file.
    pub fn file_path(&self, extension: &str) -> PathBuf {
        self.destination.join(self.file_name(extension))
    }

    /// Rebuild the samples in buffer order.
    pub fn to_samples(&self) -> Vec<Sample> {
        (0..self.len())
            .map(|i| Sample {
                depth: self.depths[i].clone(),
                pose: self.poses[i],
                frame_index: self.frames[i],
                distance: self.distances[i],
                action_label: self.actions[i],
                direction: self.victim_dirs[i],
            })
            .collect()
    }
}

/// Column storage handed to [`Batch::from_columns`].
#[derive(Debug, Clone, Default)]
pub struct Columns {
    pub depths: Vec<DepthMap>,
    pub poses: Vec<Pose>,
    pub frames: Vec<u64>,
    pub distances: Vec<f32>,
    pub actions: Vec<ActionLabel>,
    pub victim_dirs: Vec<Direction>,
}

/// File name for a batch, shared by writer and tools.
pub fn batch_file_name(split: Split, min_frame_index: u64, extension: &str) -> String {
    format!("{}_batch_{:06}.{}", split, min_frame_index, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(frame: u64) -> Sample {
        Sample {
            depth: DepthMap::filled(4, 3, frame as f32).expect("depth"),
            pose: [frame as f32, 0.0, 1.0, 0.0, 0.0, 0.5],
            frame_index: frame,
            distance: 2.5,
            action_label: ActionLabel::Forward,
            direction: [0.0, 1.0, 0.0],
        }
    }

    #[test]
    fn test_split_parse_display() {
        for split in Split::ALL {
            assert_eq!(split.as_str().parse::<Split>().expect("parse"), split);
        }
        assert_eq!(
            "holdout".parse::<Split>(),
            Err(BatchError::UnknownSplit("holdout".into()))
        );
    }

    #[test]
    fn test_ratios_validation() {
        assert!(SplitRatios::new(0.8, 0.1, 0.1).is_ok());
        assert!(SplitRatios::new(0.8, 0.1, 0.105).is_ok());
        assert!(SplitRatios::new(0.8, 0.3, 0.1).is_err());
        assert!(SplitRatios::new(1.2, -0.1, -0.1).is_err());
        assert!(SplitRatios::new(f64::NAN, 0.5, 0.5).is_err());
    }

    #[test]
    fn test_split_statistics() {
        let ratios = SplitRatios::new(0.8, 0.1, 0.1).expect("ratios");
        let mut selector = SplitSelector::with_seed(ratios, 0x5eed);
        let draws = 20_000;
        let mut counts = [0usize; 3];

        for _ in 0..draws {
            counts[selector.select().index()] += 1;
        }

        for split in Split::ALL {
            let observed = counts[split.index()] as f64 / draws as f64;
            assert!(
                (observed - ratios.get(split)).abs() < 0.03,
                "{} observed {:.4}, expected {:.4}",
                split,
                observed,
                ratios.get(split)
            );
        }
    }

    #[test]
    fn test_selector_degenerate_ratios() {
        let mut selector = SplitSelector::with_seed(SplitRatios::new(1.0, 0.0, 0.0).expect("r"), 1);
        assert!((0..1000).all(|_| selector.select() == Split::Train));

        let mut selector = SplitSelector::with_seed(SplitRatios::new(0.0, 0.0, 1.0).expect("r"), 1);
        assert!((0..1000).all(|_| selector.select() == Split::Test));
    }

    #[test]
    fn test_batch_from_samples() {
        let batch = Batch::from_samples(
            vec![sample(30), sample(10), sample(20)],
            Split::Val,
            "/data/val",
            0,
        )
        .expect("batch");

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.min_frame_index(), 10);
        assert_eq!(batch.frames(), &[30, 10, 20]);
        assert_eq!(batch.file_name("dcap"), "val_batch_000010.dcap");
        assert_eq!(
            batch.file_path("dcap"),
            PathBuf::from("/data/val/val_batch_000010.dcap")
        );
        assert_eq!(batch.to_samples()[0], sample(30));
    }

    #[test]
    fn test_batch_rejects_empty() {
        let err = Batch::from_samples(Vec::new(), Split::Train, "/tmp", 0).expect_err("empty");
        assert_eq!(err, BatchError::Empty);
    }

    #[test]
    fn test_batch_rejects_ragged_columns() {
        let columns = Columns {
            depths: vec![DepthMap::filled(2, 2, 0.0).expect("depth")],
            poses: vec![[0.0; 6]; 2],
            frames: vec![1, 2],
            distances: vec![1.0, 1.0],
            actions: vec![ActionLabel::Hover; 2],
            victim_dirs: vec![[0.0; 3]; 2],
        };
        let err = Batch::from_columns(columns, Split::Train, "/tmp", 0).expect_err("mismatch");
        assert_eq!(
            err,
            BatchError::LengthMismatch {
                column: "depths",
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn test_file_name_padding() {
        assert_eq!(batch_file_name(Split::Train, 7, "dcap"), "train_batch_000007.dcap");
        assert_eq!(
            batch_file_name(Split::Test, 1_234_567, "dcap"),
            "test_batch_1234567.dcap"
        );
    }
}
