// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background batch writer.
//!
//! One dedicated thread owns all batch file I/O. The producer hands batches
//! over through a bounded queue and never waits on disk.
//!
//! ```text
//! ┌──────────────────────────────┐        ┌──────────────────────────────┐
//! │ Producer (Collector)         │        │ depth-writer thread          │
//! │                              │ Batch  │                              │
//! │ WriterHandle::submit ────────┼───────►│ encode ─► BatchStore         │
//! │   (try_send, overflow policy)│  Stop  │   └─► SplitCounters, events  │
//! │ WriterHandle::stop ──────────┼───────►│ drain queue, exit            │
//! │   (bounded join on `done`)   │◄───────┼── done                       │
//! └──────────────────────────────┘        └──────────────────────────────┘
//! ```
//!
//! The writer is `Running` until it receives `Stop` (or sees the stop flag
//! on an idle poll), then writes whatever is still queued and exits.

use crate::batch::{Batch, BatchId};
use crate::config::OverflowPolicy;
use crate::events::{CaptureEvent, EventSink, SplitCounters};
use crate::format::{BatchEncoder, FormatError, EXTENSION};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Writer thread name.
pub const THREAD_NAME: &str = "depth-writer";

/// Writer errors.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Failed to spawn writer thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Writer thread is not running")]
    Disconnected,

    #[error("Encoding failed: {0}")]
    Format(#[from] FormatError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Storage
// ============================================================================

/// Destination of encoded batch files.
pub trait BatchStore: Send {
    /// Persist `bytes` at `path`, replacing any existing file.
    fn persist(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// Writes batch files to the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

impl BatchStore for FsStore {
    fn persist(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if path.exists() {
            tracing::warn!("Overwriting existing batch file {}", path.display());
        }
        std::fs::write(path, bytes)
    }
}

impl<T: BatchStore + ?Sized> BatchStore for Box<T> {
    fn persist(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        (**self).persist(path, bytes)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Writer thread configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum queued batches.
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Dequeue timeout; bounds how long an idle writer takes to notice the
    /// stop flag.
    pub poll_interval: Duration,
    pub encoder: BatchEncoder,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            overflow_policy: OverflowPolicy::DropOldest,
            poll_interval: Duration::from_millis(100),
            encoder: BatchEncoder::default(),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
enum WriterMsg {
    Batch(Batch),
    Stop,
}

/// Result of handing a batch to the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// Queued without loss.
    Queued,
    /// Queued after evicting the oldest waiting batch.
    Evicted(BatchId),
    /// Not queued; the submitted batch was discarded.
    Dropped(BatchId),
}

/// How [`WriterHandle::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Writer drained its queue and exited.
    Joined,
    /// Writer did not finish in time and was detached.
    TimedOut,
    /// Already stopped earlier.
    AlreadyStopped,
}

// ============================================================================
// Handle (producer side)
// ============================================================================

/// Producer-side handle to the writer thread.
pub struct WriterHandle {
    tx: Sender<WriterMsg>,
    /// Second receiver on the queue, used only to evict under `DropOldest`.
    evict_rx: Receiver<WriterMsg>,
    policy: OverflowPolicy,
    stop: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
    events: Arc<dyn EventSink>,
}

impl WriterHandle {
    /// Spawn the writer thread.
    pub fn spawn(
        config: WriterConfig,
        store: Box<dyn BatchStore>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, WriterError> {
        let (tx, rx) = channel::bounded(config.queue_capacity.max(1));
        let (done_tx, done_rx) = channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            rx: rx.clone(),
            store,
            encoder: config.encoder,
            events: Arc::clone(&events),
            stop: Arc::clone(&stop),
            poll_interval: config.poll_interval,
            counters: SplitCounters::default(),
            generation: 0,
        };

        let thread = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })
            .map_err(WriterError::Spawn)?;

        tracing::info!(
            "Batch writer started (queue capacity {}, {:?})",
            config.queue_capacity,
            config.overflow_policy
        );

        Ok(Self {
            tx,
            evict_rx: rx,
            policy: config.overflow_policy,
            stop,
            done_rx,
            thread: Some(thread),
            events,
        })
    }

    /// Hand a batch to the writer without blocking.
    pub fn submit(&self, batch: Batch) -> Result<Submitted, WriterError> {
        if self.thread.is_none() {
            return Err(WriterError::Disconnected);
        }

        let batch = match self.tx.try_send(WriterMsg::Batch(batch)) {
            Ok(()) => return Ok(Submitted::Queued),
            Err(TrySendError::Disconnected(_)) => return Err(WriterError::Disconnected),
            Err(TrySendError::Full(WriterMsg::Batch(batch))) => batch,
            Err(TrySendError::Full(WriterMsg::Stop)) => return Err(WriterError::Disconnected),
        };

        match self.policy {
            OverflowPolicy::DropNewest => Ok(self.dropped(batch.id())),
            OverflowPolicy::DropOldest => {
                let evicted = match self.evict_rx.try_recv() {
                    Ok(WriterMsg::Batch(old)) => Some(old.id()),
                    _ => None,
                };

                match self.tx.try_send(WriterMsg::Batch(batch)) {
                    Ok(()) => match evicted {
                        Some(id) => {
                            tracing::warn!("Writer queue full, evicted batch {}", id);
                            self.events
                                .publish(CaptureEvent::BatchDropped { batch: id.clone() });
                            Ok(Submitted::Evicted(id))
                        }
                        None => Ok(Submitted::Queued),
                    },
                    Err(TrySendError::Full(WriterMsg::Batch(batch))) => {
                        Ok(self.dropped(batch.id()))
                    }
                    Err(_) => Err(WriterError::Disconnected),
                }
            }
        }
    }

    fn dropped(&self, id: BatchId) -> Submitted {
        tracing::warn!("Writer queue full, dropping batch {}", id);
        self.events
            .publish(CaptureEvent::BatchDropped { batch: id.clone() });
        Submitted::Dropped(id)
    }

    /// Batches waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// True until [`stop`](Self::stop) has been called.
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the writer after it drains the queue, waiting at most `timeout`.
    ///
    /// Idempotent. A timeout leaves the thread detached; it still finishes
    /// queued writes in the background.
    pub fn stop(&mut self, timeout: Duration) -> StopOutcome {
        let Some(thread) = self.thread.take() else {
            return StopOutcome::AlreadyStopped;
        };

        self.stop.store(true, Ordering::Release);
        // A full queue still terminates: the writer sees the flag once idle.
        let _ = self.tx.try_send(WriterMsg::Stop);

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    tracing::error!("Batch writer thread panicked");
                }
                tracing::info!("Batch writer stopped");
                StopOutcome::Joined
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Batch writer did not finish within {:?}, detaching",
                    timeout
                );
                StopOutcome::TimedOut
            }
        }
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop(Duration::from_secs(2));
        }
    }
}

// ============================================================================
// Worker (writer thread)
// ============================================================================

struct Worker {
    rx: Receiver<WriterMsg>,
    store: Box<dyn BatchStore>,
    encoder: BatchEncoder,
    events: Arc<dyn EventSink>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    counters: SplitCounters,
    generation: u64,
}

impl Worker {
    fn run(mut self) {
        loop {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(WriterMsg::Batch(batch)) => self.handle(batch),
                Ok(WriterMsg::Stop) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut drained = 0usize;
        while let Ok(msg) = self.rx.try_recv() {
            if let WriterMsg::Batch(batch) = msg {
                self.handle(batch);
                drained += 1;
            }
        }
        if drained > 0 {
            tracing::debug!("Wrote {} queued batches after stop", drained);
        }

        tracing::info!(
            "Batch writer exiting: train={} val={} test={}",
            self.counters.train,
            self.counters.val,
            self.counters.test
        );
    }

    fn handle(&mut self, batch: Batch) {
        if batch.generation() > self.generation {
            self.generation = batch.generation();
            self.counters.reset();
        }

        match self.write(&batch) {
            Ok(path) => {
                self.counters.increment(batch.split());
                self.events.publish(CaptureEvent::BatchSaved {
                    split: batch.split(),
                    count: batch.len(),
                    min_frame_index: batch.min_frame_index(),
                    path,
                    totals: self.counters,
                });
            }
            Err(e) => {
                tracing::error!("Failed to save batch {}: {}", batch.id(), e);
                self.events.publish(CaptureEvent::BatchError {
                    error: e.to_string(),
                    batch: Some(batch.id()),
                });
            }
        }
    }

    fn write(&mut self, batch: &Batch) -> Result<PathBuf, WriterError> {
        let bytes = self.encoder.encode(batch)?;
        let path = batch.file_path(EXTENSION);
        self.store
            .persist(&path, &bytes)
            .map_err(|source| WriterError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            "Wrote {} ({} samples, {} bytes)",
            path.display(),
            batch.len(),
            bytes.len()
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Split;
    use crate::format::read_batch;
    use crate::sample::{ActionLabel, DepthMap, Sample};
    use crossbeam::channel::unbounded;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn batch(frames: std::ops::Range<u64>, split: Split, dir: &Path, generation: u64) -> Batch {
        let samples = frames
            .map(|frame| Sample {
                depth: DepthMap::filled(4, 2, frame as f32).expect("depth"),
                pose: [0.0; 6],
                frame_index: frame,
                distance: 1.0,
                action_label: ActionLabel::Hover,
                direction: [1.0, 0.0, 0.0],
            })
            .collect();
        Batch::from_samples(samples, split, dir.join(split.as_str()), generation).expect("batch")
    }

    fn make_dirs(root: &Path) {
        for split in Split::ALL {
            std::fs::create_dir_all(root.join(split.as_str())).expect("mkdir");
        }
    }

    /// Blocks every write until the gate is opened.
    struct GatedStore {
        gate: Receiver<()>,
        written: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl BatchStore for GatedStore {
        fn persist(&mut self, path: &Path, _bytes: &[u8]) -> io::Result<()> {
            let _ = self.gate.recv();
            self.written.lock().expect("lock").push(path.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn test_writer_saves_and_counts() {
        let dir = tempdir().expect("tempdir");
        make_dirs(dir.path());
        let (tx, rx) = unbounded::<CaptureEvent>();

        let mut writer =
            WriterHandle::spawn(WriterConfig::default(), Box::new(FsStore), Arc::new(tx))
                .expect("spawn");
        writer
            .submit(batch(0..3, Split::Train, dir.path(), 0))
            .expect("submit");
        writer
            .submit(batch(3..5, Split::Train, dir.path(), 0))
            .expect("submit");
        assert_eq!(writer.stop(Duration::from_secs(5)), StopOutcome::Joined);

        let saved: Vec<_> = rx.try_iter().collect();
        assert_eq!(saved.len(), 2);
        match &saved[1] {
            CaptureEvent::BatchSaved {
                split,
                count,
                totals,
                path,
                ..
            } => {
                assert_eq!(*split, Split::Train);
                assert_eq!(*count, 2);
                assert_eq!(totals.train, 2);
                assert_eq!(path, &dir.path().join("train/train_batch_000003.dcap"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        let file = read_batch(dir.path().join("train/train_batch_000000.dcap")).expect("read");
        assert_eq!(file.frames().expect("frames"), vec![0, 1, 2]);
    }

    #[test]
    fn test_writer_continues_after_error() {
        let dir = tempdir().expect("tempdir");
        let (tx, rx) = unbounded::<CaptureEvent>();
        let mut writer =
            WriterHandle::spawn(WriterConfig::default(), Box::new(FsStore), Arc::new(tx))
                .expect("spawn");

        // Destination folder missing: write fails.
        writer
            .submit(batch(0..2, Split::Val, dir.path(), 0))
            .expect("submit");
        let first = rx.recv_timeout(Duration::from_secs(5)).expect("first event");
        make_dirs(dir.path());
        writer
            .submit(batch(2..4, Split::Val, dir.path(), 0))
            .expect("submit");
        writer.stop(Duration::from_secs(5));

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(
            &first,
            CaptureEvent::BatchError { batch: Some(id), .. } if id.min_frame_index == 0
        ));
        assert!(matches!(
            &events[0],
            CaptureEvent::BatchSaved { totals, .. } if totals.val == 1
        ));
    }

    #[test]
    fn test_counters_reset_on_new_generation() {
        let dir = tempdir().expect("tempdir");
        make_dirs(dir.path());
        let (tx, rx) = unbounded::<CaptureEvent>();
        let mut writer =
            WriterHandle::spawn(WriterConfig::default(), Box::new(FsStore), Arc::new(tx))
                .expect("spawn");

        writer
            .submit(batch(0..1, Split::Test, dir.path(), 0))
            .expect("submit");
        writer
            .submit(batch(1..2, Split::Test, dir.path(), 0))
            .expect("submit");
        writer
            .submit(batch(2..3, Split::Test, dir.path(), 1))
            .expect("submit");
        writer.stop(Duration::from_secs(5));

        let totals: Vec<u64> = rx
            .try_iter()
            .filter_map(|e| match e {
                CaptureEvent::BatchSaved { totals, .. } => Some(totals.test),
                _ => None,
            })
            .collect();
        assert_eq!(totals, vec![1, 2, 1]);
    }

    #[test]
    fn test_drop_oldest_overflow() {
        let dir = tempdir().expect("tempdir");
        let (gate_tx, gate_rx) = unbounded();
        let written = Arc::new(Mutex::new(Vec::new()));
        let store = GatedStore {
            gate: gate_rx,
            written: Arc::clone(&written),
        };
        let (tx, rx) = unbounded::<CaptureEvent>();
        let config = WriterConfig {
            queue_capacity: 1,
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let mut writer = WriterHandle::spawn(config, Box::new(store), Arc::new(tx)).expect("spawn");

        // First batch is taken by the writer and blocks in the store.
        writer
            .submit(batch(0..1, Split::Train, dir.path(), 0))
            .expect("submit");
        while writer.queued() > 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            writer.submit(batch(1..2, Split::Train, dir.path(), 0)).expect("submit"),
            Submitted::Queued
        );
        let outcome = writer
            .submit(batch(2..3, Split::Train, dir.path(), 0))
            .expect("submit");
        assert!(matches!(outcome, Submitted::Evicted(ref id) if id.min_frame_index == 1));

        for _ in 0..3 {
            gate_tx.send(()).expect("open gate");
        }
        writer.stop(Duration::from_secs(5));

        let names: Vec<String> = written
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec!["train_batch_000000.dcap", "train_batch_000002.dcap"]);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, CaptureEvent::BatchDropped { .. })));
    }

    #[test]
    fn test_drop_newest_overflow() {
        let dir = tempdir().expect("tempdir");
        let (gate_tx, gate_rx) = unbounded();
        let written = Arc::new(Mutex::new(Vec::new()));
        let store = GatedStore {
            gate: gate_rx,
            written: Arc::clone(&written),
        };
        let config = WriterConfig {
            queue_capacity: 1,
            overflow_policy: OverflowPolicy::DropNewest,
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let mut writer =
            WriterHandle::spawn(config, Box::new(store), Arc::new(crate::events::NullSink))
                .expect("spawn");

        writer
            .submit(batch(0..1, Split::Train, dir.path(), 0))
            .expect("submit");
        while writer.queued() > 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        writer
            .submit(batch(1..2, Split::Train, dir.path(), 0))
            .expect("submit");
        let outcome = writer
            .submit(batch(2..3, Split::Train, dir.path(), 0))
            .expect("submit");
        assert!(matches!(outcome, Submitted::Dropped(ref id) if id.min_frame_index == 2));

        for _ in 0..3 {
            gate_tx.send(()).expect("open gate");
        }
        writer.stop(Duration::from_secs(5));
        assert_eq!(written.lock().expect("lock").len(), 2);
    }

    #[test]
    fn test_stop_is_idempotent_and_bounded() {
        let (_gate_tx, gate_rx) = unbounded::<()>();
        let store = GatedStore {
            gate: gate_rx,
            written: Arc::new(Mutex::new(Vec::new())),
        };
        let dir = tempdir().expect("tempdir");
        let mut writer = WriterHandle::spawn(
            WriterConfig::default(),
            Box::new(store),
            Arc::new(crate::events::NullSink),
        )
        .expect("spawn");

        writer
            .submit(batch(0..1, Split::Train, dir.path(), 0))
            .expect("submit");
        assert_eq!(writer.stop(Duration::from_millis(50)), StopOutcome::TimedOut);
        assert_eq!(writer.stop(Duration::from_millis(50)), StopOutcome::AlreadyStopped);
        assert!(!writer.is_running());
        assert!(matches!(
            writer.submit(batch(1..2, Split::Train, dir.path(), 0)),
            Err(WriterError::Disconnected)
        ));
    }
}
