// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dataset collector.
//!
//! Runs on the producer (simulation) thread: samples the sensor every Nth
//! active tick, buffers samples, and hands full buffers to the writer as
//! [`Batch`]es. The buffer and the directory layout never leave this
//! thread; directory changes from other threads arrive through a
//! [`ControlHandle`] and are applied at the start of the next tick.

use crate::batch::{Batch, Split, SplitSelector};
use crate::config::CaptureConfig;
use crate::events::{CaptureEvent, EventSink};
use crate::format::BatchEncoder;
use crate::layout::DirectoryLayout;
use crate::sample::{ActionLabel, Sample, NO_TARGET_DISTANCE, ZERO_DIRECTION};
use crate::sensor::SensorSource;
use crate::writer::{BatchStore, FsStore, StopOutcome, Submitted, WriterConfig, WriterHandle};
use crate::CaptureError;
use crossbeam::channel::{self, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Request marshaled onto the producer thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    ChangeDirectory {
        base: PathBuf,
        use_timestamp: bool,
    },
}

/// Cloneable handle for requesting directory changes from other threads.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: Sender<ControlRequest>,
}

impl ControlHandle {
    /// Queue a directory change; applied on the collector's next tick.
    pub fn change_directory<P: AsRef<Path>>(
        &self,
        base: P,
        use_timestamp: bool,
    ) -> Result<(), CaptureError> {
        self.tx
            .send(ControlRequest::ChangeDirectory {
                base: base.as_ref().to_path_buf(),
                use_timestamp,
            })
            .map_err(|_| CaptureError::CollectorClosed)
    }
}

/// Collector counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Active ticks seen this session.
    pub ticks: u64,
    /// Samples appended to the buffer.
    pub samples_captured: u64,
    /// Samples skipped because depth or pose capture failed.
    pub samples_skipped: u64,
    /// Batches handed to the writer.
    pub batches_submitted: u64,
    /// Batches lost to queue overflow or a stopped writer.
    pub batches_dropped: u64,
    /// Buffered samples discarded by session cancellation.
    pub samples_discarded: u64,
}

/// Producer side of the capture pipeline.
pub struct Collector<S: SensorSource> {
    config: CaptureConfig,
    sensor: S,
    events: Arc<dyn EventSink>,
    layout: DirectoryLayout,
    /// Bumped on every directory switch; tells the writer to reset counters.
    generation: u64,
    buffer: Vec<Sample>,
    selector: SplitSelector,
    writer: WriterHandle,
    control_tx: Sender<ControlRequest>,
    control_rx: Receiver<ControlRequest>,
    active: bool,
    shut_down: bool,
    tick_count: u64,
    action: ActionLabel,
    stats: CollectorStats,
}

impl<S: SensorSource> Collector<S> {
    /// Create a collector writing batch files to disk.
    pub fn new(
        config: CaptureConfig,
        sensor: S,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, CaptureError> {
        Self::with_store(config, sensor, events, Box::new(FsStore))
    }

    /// Create a collector with a custom batch store.
    pub fn with_store(
        config: CaptureConfig,
        sensor: S,
        events: Arc<dyn EventSink>,
        store: Box<dyn BatchStore>,
    ) -> Result<Self, CaptureError> {
        config.validate()?;

        let layout = DirectoryLayout::create(&config.base_folder, config.use_timestamp_subfolder)?;

        let selector = match config.seed {
            Some(seed) => SplitSelector::with_seed(config.split_ratio, seed),
            None => SplitSelector::new(config.split_ratio),
        };

        let writer_config = WriterConfig {
            queue_capacity: config.queue_capacity,
            overflow_policy: config.overflow_policy,
            poll_interval: config.writer_poll_interval_duration(),
            encoder: BatchEncoder::new(config.compression_level)
                .strict_shapes(config.strict_shapes),
        };
        let writer = WriterHandle::spawn(writer_config, store, Arc::clone(&events))?;

        let (control_tx, control_rx) = channel::unbounded();

        tracing::info!(
            "Depth collector ready: {} (batch size {}, every {} ticks)",
            layout.root().display(),
            config.batch_size,
            config.sampling_interval
        );

        Ok(Self {
            buffer: Vec::with_capacity(config.batch_size),
            config,
            sensor,
            events,
            layout,
            generation: 0,
            selector,
            writer,
            control_tx,
            control_rx,
            active: false,
            shut_down: false,
            tick_count: 0,
            action: ActionLabel::Hover,
            stats: CollectorStats::default(),
        })
    }

    // ------------------------------------------------------------------
    // Tick path
    // ------------------------------------------------------------------

    /// Advance one simulation tick.
    ///
    /// Pending control requests are applied first. Returns the frame index
    /// of the sample captured on this tick, if any. `_dt` is accepted for
    /// engine callbacks; the cadence is tick-based.
    pub fn on_tick(&mut self, _dt: f32) -> Option<u64> {
        if self.shut_down {
            return None;
        }
        self.process_control();

        if !self.active {
            return None;
        }

        self.tick_count += 1;
        self.stats.ticks += 1;
        if self.tick_count % self.config.sampling_interval != 0 {
            return None;
        }

        let frame = self.tick_count;
        let sample = self.capture_sample(frame)?;
        self.append(sample);
        Some(frame)
    }

    /// Read every sensor field for `frame_index`.
    ///
    /// Returns `None` when depth or pose capture fails. Target failures
    /// and invisible targets are stored as distance -1 with a zero
    /// direction.
    pub fn capture_sample(&mut self, frame_index: u64) -> Option<Sample> {
        let depth = match self.sensor.depth() {
            Ok(depth) => depth,
            Err(e) => {
                tracing::warn!("Depth capture failed at frame {}, skipping: {}", frame_index, e);
                self.stats.samples_skipped += 1;
                return None;
            }
        };

        let pose = match self.sensor.pose() {
            Ok(pose) => pose,
            Err(e) => {
                tracing::warn!("Pose capture failed at frame {}, skipping: {}", frame_index, e);
                self.stats.samples_skipped += 1;
                return None;
            }
        };

        let (distance, direction) = match self.sensor.target() {
            Ok(reading) if reading.is_visible() => (reading.distance, reading.direction),
            Ok(_) => (NO_TARGET_DISTANCE, ZERO_DIRECTION),
            Err(e) => {
                tracing::warn!("Target capture failed at frame {}: {}", frame_index, e);
                (NO_TARGET_DISTANCE, ZERO_DIRECTION)
            }
        };

        Some(Sample {
            depth,
            pose,
            frame_index,
            distance,
            action_label: self.action,
            direction,
        })
    }

    /// Buffer a sample, flushing if the buffer reached the batch size.
    pub fn append(&mut self, sample: Sample) {
        self.events.publish(CaptureEvent::CaptureCompleted {
            frame_index: sample.frame_index,
            distance: sample.distance,
            action: sample.action_label,
            direction: sample.direction,
        });
        if sample.has_target() {
            self.events.publish(CaptureEvent::TargetDetected {
                frame_index: sample.frame_index,
                distance: sample.distance,
                direction: sample.direction,
            });
        }

        tracing::trace!("Buffered frame {}", sample.frame_index);
        self.buffer.push(sample);
        self.stats.samples_captured += 1;
        self.maybe_flush();
    }

    /// Flush if the buffer is full. Returns true if a batch was handed off.
    pub fn maybe_flush(&mut self) -> bool {
        if self.buffer.len() >= self.config.batch_size {
            self.flush()
        } else {
            false
        }
    }

    /// Hand the buffer to the writer as one batch, whatever its size.
    ///
    /// No-op on an empty buffer.
    pub fn flush(&mut self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }

        let samples = std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.config.batch_size),
        );
        let split = self.select_split();
        let destination = self.layout.split_dir(split).to_path_buf();

        let batch = match Batch::from_samples(samples, split, destination, self.generation) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!("Failed to build batch: {}", e);
                self.events.publish(CaptureEvent::BatchError {
                    error: e.to_string(),
                    batch: None,
                });
                return false;
            }
        };

        let id = batch.id();
        match self.writer.submit(batch) {
            Ok(Submitted::Queued) => {
                tracing::debug!("Queued batch {}", id);
                self.stats.batches_submitted += 1;
                true
            }
            Ok(Submitted::Evicted(_)) => {
                self.stats.batches_submitted += 1;
                self.stats.batches_dropped += 1;
                true
            }
            Ok(Submitted::Dropped(_)) => {
                self.stats.batches_dropped += 1;
                false
            }
            Err(e) => {
                tracing::error!("Failed to queue batch {}: {}", id, e);
                self.stats.batches_dropped += 1;
                self.events.publish(CaptureEvent::BatchError {
                    error: e.to_string(),
                    batch: Some(id),
                });
                false
            }
        }
    }

    /// Weighted draw over the configured split ratios.
    pub fn select_split(&mut self) -> Split {
        self.selector.select()
    }

    // ------------------------------------------------------------------
    // Control input
    // ------------------------------------------------------------------

    /// Set the label stored with subsequent samples.
    pub fn on_action_changed(&mut self, label: ActionLabel) {
        if label != self.action {
            tracing::trace!("Action label {} -> {}", self.action, label);
        }
        self.action = label;
    }

    /// Translation command; ignored below the movement threshold.
    pub fn on_move(&mut self, dx: f32, dy: f32, dz: f32) {
        if let Some(label) = ActionLabel::from_move(dx, dy, dz) {
            self.on_action_changed(label);
        }
    }

    /// Yaw command.
    pub fn on_rotate(&mut self, delta: f32) {
        self.on_action_changed(ActionLabel::from_rotate(delta));
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Scene is ready: start sampling.
    pub fn on_session_ready(&mut self) {
        if self.shut_down {
            tracing::warn!("Session ready after shutdown, ignoring");
            return;
        }
        self.active = true;
        tracing::info!("Session ready, capture active");
    }

    /// Scene ended normally: stop sampling.
    ///
    /// The buffer is kept and fills up again on the next session; any
    /// remainder is written by `shutdown`.
    pub fn on_session_ended(&mut self) {
        self.active = false;
        tracing::info!(
            "Session ended, capture paused with {} samples buffered",
            self.buffer.len()
        );
    }

    /// Scene torn down: stop sampling and discard the buffer.
    pub fn on_session_canceled(&mut self) {
        self.active = false;
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.stats.samples_discarded += discarded as u64;
        tracing::info!("Session canceled, discarded {} buffered samples", discarded);
    }

    // ------------------------------------------------------------------
    // Directory management
    // ------------------------------------------------------------------

    /// Flush to the current layout, then switch to `new_base`.
    ///
    /// Split counters restart from zero under the new layout. If the new
    /// folders cannot be created the old layout stays in effect. Fails
    /// with `CollectorClosed` after `shutdown`.
    pub fn change_directory<P: AsRef<Path>>(
        &mut self,
        new_base: P,
        use_timestamp: bool,
    ) -> Result<(), CaptureError> {
        if self.shut_down {
            return Err(CaptureError::CollectorClosed);
        }
        self.flush();

        self.layout.switch(new_base.as_ref(), use_timestamp)?;
        self.generation += 1;
        self.config.base_folder = new_base.as_ref().to_path_buf();
        self.config.use_timestamp_subfolder = use_timestamp;

        tracing::info!("Dataset directory changed to {}", self.layout.root().display());
        self.events.publish(CaptureEvent::DirectoryChanged {
            base: self.layout.root().to_path_buf(),
        });
        Ok(())
    }

    /// Handle for requesting directory changes from other threads.
    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            tx: self.control_tx.clone(),
        }
    }

    fn process_control(&mut self) {
        let pending: Vec<ControlRequest> = self.control_rx.try_iter().collect();
        for request in pending {
            match request {
                ControlRequest::ChangeDirectory {
                    base,
                    use_timestamp,
                } => {
                    if let Err(e) = self.change_directory(&base, use_timestamp) {
                        tracing::error!(
                            "Directory change to {} failed: {}",
                            base.display(),
                            e
                        );
                    }
                }
            }
        }
    }

    /// Write the active configuration as pretty JSON to
    /// `<root>/config/<name>.json`.
    pub fn save_session_config(&self, name: &str) -> Result<PathBuf, CaptureError> {
        let dir = self.layout.config_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", name));
        std::fs::write(&path, self.config.to_json()?)?;
        tracing::info!("Saved session config to {}", path.display());
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Flush the remaining buffer and stop the writer. Idempotent.
    pub fn shutdown(&mut self) -> StopOutcome {
        if self.shut_down {
            return StopOutcome::AlreadyStopped;
        }
        self.active = false;
        self.process_control();
        self.shut_down = true;
        self.flush();

        let outcome = self.writer.stop(self.config.shutdown_timeout_duration());
        tracing::info!(
            "Depth collector shut down: {} samples, {} batches",
            self.stats.samples_captured,
            self.stats.batches_submitted
        );
        outcome
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Samples waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn current_action(&self) -> ActionLabel {
        self.action
    }

    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}

impl<S: SensorSource> Drop for Collector<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
