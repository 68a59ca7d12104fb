// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Depth Dataset Capture
//!
//! Collect depth images, drone poses, target readings and action labels
//! from a running simulation and persist them as train/val/test batch
//! files, without ever blocking the simulation tick on disk I/O.
//!
//! # Quick Start
//!
//! ```bash
//! # Capture 10k ticks from the synthetic sensor
//! depth-capture --output depth_dataset --ticks 10000 --batch-size 100
//!
//! # Inspect what was written
//! depth-inspect depth_dataset
//! ```
//!
//! # Pipeline
//!
//! | Stage | Thread | Type |
//! |-------|--------|------|
//! | Sampling, buffering, split draw | producer | [`Collector`] |
//! | Hand-off | both | bounded queue in [`WriterHandle`] |
//! | Encoding, file I/O, counters | `depth-writer` | [`writer`] |
//!
//! # On-disk layout
//!
//! ```text
//! <base>/[<timestamp>]/{train,val,test}/<split>_batch_<min_frame:06>.dcap
//! ```

pub mod batch;
pub mod collector;
pub mod config;
pub mod events;
pub mod format;
pub mod layout;
pub mod sample;
pub mod sensor;
pub mod target;
pub mod writer;

pub use batch::{Batch, BatchError, BatchId, Split, SplitRatios, SplitSelector};
pub use collector::{Collector, CollectorStats, ControlHandle, ControlRequest};
pub use config::{CaptureConfig, ConfigError, OverflowPolicy};
pub use events::{CaptureEvent, EventSink, LogSink, NullSink, SplitCounters};
pub use format::{read_batch, BatchEncoder, BatchFile, FormatError};
pub use layout::{DirectoryLayout, LayoutError};
pub use sample::{ActionLabel, DepthError, DepthMap, Direction, Pose, Sample};
pub use sensor::{SensorError, SensorSource, SyntheticSensor, TargetReading};
pub use writer::{BatchStore, FsStore, StopOutcome, Submitted, WriterError, WriterHandle};

use thiserror::Error;

/// Top-level capture errors.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Collector is closed")]
    CollectorClosed,
}
