// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capture notifications.
//!
//! The collector and the writer thread publish [`CaptureEvent`]s through an
//! [`EventSink`] handed in at construction. Sinks are shared between both
//! threads, so publication must not block.

use crate::batch::{BatchId, Split};
use crate::sample::{ActionLabel, Direction};
use crossbeam::channel::Sender;
use std::path::PathBuf;

/// Files written per split under the current layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitCounters {
    pub train: u64,
    pub val: u64,
    pub test: u64,
}

impl SplitCounters {
    pub fn get(&self, split: Split) -> u64 {
        match split {
            Split::Train => self.train,
            Split::Val => self.val,
            Split::Test => self.test,
        }
    }

    /// Increment `split` and return its new value.
    pub fn increment(&mut self, split: Split) -> u64 {
        let counter = match split {
            Split::Train => &mut self.train,
            Split::Val => &mut self.val,
            Split::Test => &mut self.test,
        };
        *counter += 1;
        *counter
    }

    pub fn total(&self) -> u64 {
        self.train + self.val + self.test
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Event published by the capture pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// A sample was appended to the buffer.
    CaptureCompleted {
        frame_index: u64,
        distance: f32,
        action: ActionLabel,
        direction: Direction,
    },

    /// The sample just captured has a visible target.
    TargetDetected {
        frame_index: u64,
        distance: f32,
        direction: Direction,
    },

    /// A batch file was written.
    BatchSaved {
        split: Split,
        count: usize,
        min_frame_index: u64,
        path: PathBuf,
        totals: SplitCounters,
    },

    /// Encoding or writing a batch failed; the batch is lost.
    BatchError {
        error: String,
        batch: Option<BatchId>,
    },

    /// A batch was discarded by the queue overflow policy.
    BatchDropped { batch: BatchId },

    /// Subsequent batches go to a new dataset root.
    DirectoryChanged { base: PathBuf },
}

impl CaptureEvent {
    /// Short name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CaptureCompleted { .. } => "capture_completed",
            Self::TargetDetected { .. } => "target_detected",
            Self::BatchSaved { .. } => "batch_saved",
            Self::BatchError { .. } => "batch_error",
            Self::BatchDropped { .. } => "batch_dropped",
            Self::DirectoryChanged { .. } => "directory_changed",
        }
    }
}

/// Event consumer.
pub trait EventSink: Send + Sync {
    /// Deliver an event. Must not block.
    fn publish(&self, event: CaptureEvent);
}

impl EventSink for Sender<CaptureEvent> {
    fn publish(&self, event: CaptureEvent) {
        // A dropped receiver only means nobody is listening.
        if let Err(e) = self.try_send(event) {
            tracing::trace!("Event not delivered: {}", e.into_inner().kind());
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: CaptureEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: CaptureEvent) {
        match &event {
            CaptureEvent::BatchSaved {
                split,
                count,
                path,
                totals,
                ..
            } => tracing::info!(
                "Saved {} batch ({} samples) to {} [train={} val={} test={}]",
                split,
                count,
                path.display(),
                totals.train,
                totals.val,
                totals.test
            ),
            CaptureEvent::BatchError { error, batch } => match batch {
                Some(id) => tracing::error!("Batch {} failed: {}", id, error),
                None => tracing::error!("Batch failed: {}", error),
            },
            CaptureEvent::BatchDropped { batch } => {
                tracing::warn!("Batch {} dropped", batch)
            }
            CaptureEvent::DirectoryChanged { base } => {
                tracing::info!("Dataset directory changed to {}", base.display())
            }
            other => tracing::debug!("{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{bounded, unbounded};

    #[test]
    fn test_counters() {
        let mut counters = SplitCounters::default();
        assert_eq!(counters.increment(Split::Train), 1);
        assert_eq!(counters.increment(Split::Train), 2);
        assert_eq!(counters.increment(Split::Test), 1);
        assert_eq!(counters.get(Split::Val), 0);
        assert_eq!(counters.total(), 3);

        counters.reset();
        assert_eq!(counters, SplitCounters::default());
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = unbounded::<CaptureEvent>();
        let sink: &dyn EventSink = &tx;
        sink.publish(CaptureEvent::DirectoryChanged {
            base: PathBuf::from("/data"),
        });

        let event = rx.try_recv().expect("event");
        assert_eq!(event.kind(), "directory_changed");
    }

    #[test]
    fn test_channel_sink_never_blocks() {
        let (tx, rx) = bounded::<CaptureEvent>(1);
        for _ in 0..3 {
            tx.publish(CaptureEvent::BatchDropped {
                batch: BatchId {
                    split: Split::Val,
                    min_frame_index: 0,
                    len: 1,
                },
            });
        }
        assert_eq!(rx.len(), 1);

        drop(rx);
        tx.publish(CaptureEvent::DirectoryChanged {
            base: PathBuf::from("/data"),
        });
    }

    #[test]
    fn test_log_sink_handles_every_event() {
        let id = BatchId {
            split: Split::Train,
            min_frame_index: 10,
            len: 2,
        };
        let events = vec![
            CaptureEvent::CaptureCompleted {
                frame_index: 10,
                distance: 3.5,
                action: ActionLabel::Forward,
                direction: [1.0, 0.0, 0.0],
            },
            CaptureEvent::TargetDetected {
                frame_index: 10,
                distance: 3.5,
                direction: [1.0, 0.0, 0.0],
            },
            CaptureEvent::BatchSaved {
                split: Split::Train,
                count: 2,
                min_frame_index: 10,
                path: PathBuf::from("/data/train/train_batch_000010.dcap"),
                totals: SplitCounters {
                    train: 1,
                    val: 0,
                    test: 0,
                },
            },
            CaptureEvent::BatchError {
                error: "disk full".into(),
                batch: Some(id.clone()),
            },
            CaptureEvent::BatchError {
                error: "empty batch".into(),
                batch: None,
            },
            CaptureEvent::BatchDropped { batch: id },
            CaptureEvent::DirectoryChanged {
                base: PathBuf::from("/data"),
            },
        ];

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let sink: &dyn EventSink = &LogSink;
            for event in events {
                sink.publish(event);
            }
        });
    }
}
