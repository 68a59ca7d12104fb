// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! depth-inspect - Show the contents of depth dataset batch files.
//!
//! Usage:
//!   depth-inspect depth_dataset
//!   depth-inspect depth_dataset/train/train_batch_000010.dcap --samples

use clap::Parser;
use depth_capture::format::{self, EXTENSION};
use depth_capture::Split;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "depth-inspect")]
#[command(about = "Inspect depth dataset batch files")]
#[command(version)]
struct Args {
    /// Batch file or dataset directory
    input: PathBuf,

    /// Print one line per sample
    #[arg(short, long)]
    samples: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Default)]
struct Summary {
    files: usize,
    samples: usize,
    failed: Vec<(PathBuf, String)>,
    per_split: BTreeMap<&'static str, (usize, usize)>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !args.input.exists() {
        anyhow::bail!("Input not found: {}", args.input.display());
    }

    let mut files = Vec::new();
    collect_files(&args.input, &mut files)?;
    files.sort();
    info!("Found {} batch files under {}", files.len(), args.input.display());

    let mut summary = Summary::default();
    for path in &files {
        match inspect_file(path, args.samples) {
            Ok((split, count)) => {
                summary.files += 1;
                summary.samples += count;
                let entry = summary.per_split.entry(split.as_str()).or_default();
                entry.0 += 1;
                entry.1 += count;
            }
            Err(e) => {
                warn!("Failed to decode {}: {}", path.display(), e);
                summary.failed.push((path.clone(), e.to_string()));
            }
        }
    }

    println!();
    println!("{} files, {} samples", summary.files, summary.samples);
    for (split, (files, samples)) in &summary.per_split {
        println!("  {:<5} {:>6} files {:>9} samples", split, files, samples);
    }
    if !summary.failed.is_empty() {
        println!("{} files failed to decode:", summary.failed.len());
        for (path, error) in &summary.failed {
            println!("  {}: {}", path.display(), error);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn collect_files(path: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    if path.is_file() {
        out.push(path.to_path_buf());
        return Ok(());
    }
    for entry in std::fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            collect_files(&entry_path, out)?;
        } else if entry_path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
            out.push(entry_path);
        }
    }
    Ok(())
}

fn inspect_file(path: &Path, show_samples: bool) -> Result<(Split, usize), format::FormatError> {
    let file = format::read_batch(path)?;
    file.validate()?;

    let split = file.split()?;
    let frames = file.frames()?;
    let (first, last) = match (frames.iter().min(), frames.iter().max()) {
        (Some(min), Some(max)) => (*min, *max),
        _ => (0, 0),
    };

    println!(
        "{} [{}] {} samples, frames {}..={}",
        path.display(),
        split,
        file.len(),
        first,
        last
    );
    for (name, entry) in file.entries() {
        println!("    {:<12} {}", name, entry.describe());
    }

    if show_samples {
        for sample in file.to_samples()? {
            let (h, w) = sample.depth.shape();
            println!(
                "    frame {:>8}  {}x{}  action={:<9} distance={:>7.2}  dir=[{:.2}, {:.2}, {:.2}]",
                sample.frame_index,
                h,
                w,
                sample.action_label.name(),
                sample.distance,
                sample.direction[0],
                sample.direction[1],
                sample.direction[2]
            );
        }
    }

    Ok((split, file.len()))
}
