// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! depth-capture - Capture a depth dataset from the synthetic sensor.
//!
//! Usage:
//!   depth-capture --output depth_dataset --ticks 10000
//!   depth-capture --config capture.toml --batch-size 100
//!   depth-capture --output /data/run1 --ticks 0          (until Ctrl+C)

use anyhow::Context;
use clap::Parser;
use crossbeam::channel::{self, Receiver};
use depth_capture::{
    CaptureConfig, CaptureEvent, Collector, EventSink, SplitCounters, SyntheticSensor,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "depth-capture")]
#[command(about = "Capture a depth dataset from a synthetic drone sensor")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset base folder (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Ticks to simulate (0 = until Ctrl+C)
    #[arg(short, long, default_value = "10000")]
    ticks: u64,

    /// Samples per batch file (overrides config)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Capture every N ticks (overrides config)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Write directly under the base folder, without a timestamp folder
    #[arg(long)]
    no_timestamp: bool,

    /// Split selection seed (overrides config)
    #[arg(long)]
    seed: Option<u64>,

    /// Depth image width
    #[arg(long, default_value = "64")]
    width: u32,

    /// Depth image height
    #[arg(long, default_value = "48")]
    height: u32,

    /// Simulated tick period (milliseconds, 0 = as fast as possible)
    #[arg(long, default_value = "0")]
    tick_ms: u64,

    /// Save the session config as config/<name>.json
    #[arg(long)]
    session_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Quiet mode (minimal output)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = build_config(&args)?;

    if !args.quiet {
        info!("Depth Capture v{}", env!("CARGO_PKG_VERSION"));
        info!("Output: {}", config.base_folder.display());
        info!(
            "Batch size: {}, sampling every {} ticks",
            config.batch_size, config.sampling_interval
        );
    }

    let (event_tx, event_rx) = channel::unbounded::<CaptureEvent>();
    let events: Arc<dyn EventSink> = Arc::new(event_tx);
    let sensor = SyntheticSensor::new(args.width, args.height, config.seed.unwrap_or(0));

    let mut collector =
        Collector::new(config, sensor, events).context("Failed to start collector")?;

    if let Some(name) = &args.session_name {
        let path = collector
            .save_session_config(name)
            .context("Failed to save session config")?;
        info!("Session config: {}", path.display());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    if !args.quiet {
        info!("Capture started. Press Ctrl+C to stop.");
    }

    collector.on_session_ready();

    let tick_period = Duration::from_millis(args.tick_ms);
    let dt = if args.tick_ms > 0 {
        tick_period.as_secs_f32()
    } else {
        1.0 / 60.0
    };
    let start = Instant::now();
    let mut totals = SplitCounters::default();
    let mut last_report = Instant::now();
    let mut tick: u64 = 0;

    while running.load(Ordering::SeqCst) && (args.ticks == 0 || tick < args.ticks) {
        drive_controls(&mut collector, tick);
        collector.sensor_mut().step();
        collector.on_tick(dt);
        tick += 1;

        drain_events(&event_rx, &mut totals);

        if !args.quiet && last_report.elapsed() >= Duration::from_secs(10) {
            let stats = collector.stats();
            info!(
                "{} ticks, {} samples, {} batches saved",
                stats.ticks,
                stats.samples_captured,
                totals.total()
            );
            last_report = Instant::now();
        }

        if !tick_period.is_zero() {
            std::thread::sleep(tick_period);
        }
    }

    collector.on_session_ended();
    let outcome = collector.shutdown();
    drain_events(&event_rx, &mut totals);

    let stats = collector.stats().clone();
    if !args.quiet {
        info!("Capture stopped ({:?})", outcome);
        info!("  Ticks: {}", stats.ticks);
        info!("  Samples: {}", stats.samples_captured);
        info!("  Skipped: {}", stats.samples_skipped);
        info!("  Dropped batches: {}", stats.batches_dropped);
        info!("  Duration: {:.1}s", start.elapsed().as_secs_f64());
        info!("  Dataset: {}", collector.layout().root().display());
    }

    println!(
        "train={} val={} test={}",
        totals.train, totals.val, totals.test
    );

    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<CaptureConfig> {
    let mut config = match &args.config {
        Some(path) => CaptureConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => CaptureConfig::default(),
    };

    if let Some(output) = &args.output {
        config.base_folder = output.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config = config.batch_size(batch_size);
    }
    if let Some(interval) = args.interval {
        config = config.sampling_interval(interval);
    }
    if let Some(seed) = args.seed {
        config = config.seed(seed);
    }
    if args.no_timestamp {
        config = config.use_timestamp_subfolder(false);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Scripted pilot: forward, climb, yaw and strafe in a repeating cycle.
fn drive_controls(collector: &mut Collector<SyntheticSensor>, tick: u64) {
    match tick % 400 {
        0 => collector.on_move(0.0, 0.5, 0.0),
        100 => collector.on_move(0.0, 0.0, 0.3),
        200 => collector.on_rotate(0.2),
        300 => collector.on_move(-0.4, 0.1, 0.0),
        350 => collector.on_rotate(0.0),
        _ => {}
    }
}

fn drain_events(rx: &Receiver<CaptureEvent>, totals: &mut SplitCounters) {
    for event in rx.try_iter() {
        match event {
            CaptureEvent::BatchSaved {
                split, count, path, ..
            } => {
                info!("Saved {} batch of {} to {}", split, count, path.display());
                totals.increment(split);
            }
            CaptureEvent::BatchError { error, batch } => match batch {
                Some(id) => warn!("Batch {} failed: {}", id, error),
                None => warn!("Batch failed: {}", error),
            },
            CaptureEvent::BatchDropped { batch } => warn!("Batch {} dropped", batch),
            _ => {}
        }
    }
}
