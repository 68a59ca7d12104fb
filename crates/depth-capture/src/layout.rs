// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dataset directory layout.
//!
//! ```text
//! <base>/[<timestamp>]/train/
//!                     /val/
//!                     /test/
//!                     /config/   (session snapshots, created on demand)
//! ```

use crate::batch::Split;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp subfolder format, e.g. `2026-10-15_14-30-22`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Name of the session config folder under the layout root.
pub const CONFIG_DIR: &str = "config";

/// Layout errors.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolved base and split folders of one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    root: PathBuf,
    splits: [PathBuf; 3],
}

impl DirectoryLayout {
    /// Resolve a layout without touching the filesystem.
    pub fn resolve<P: AsRef<Path>>(base: P, use_timestamp: bool) -> Self {
        let root = if use_timestamp {
            base.as_ref().join(timestamp_folder())
        } else {
            base.as_ref().to_path_buf()
        };
        Self::at(root)
    }

    /// Layout rooted exactly at `root`.
    pub fn at(root: PathBuf) -> Self {
        let splits = Split::ALL.map(|split| root.join(split.as_str()));
        Self { root, splits }
    }

    /// Resolve and create all split folders.
    pub fn create<P: AsRef<Path>>(base: P, use_timestamp: bool) -> Result<Self, LayoutError> {
        let layout = Self::resolve(base, use_timestamp);
        layout.ensure()?;
        Ok(layout)
    }

    /// Create missing folders. Safe to call repeatedly.
    pub fn ensure(&self) -> Result<(), LayoutError> {
        for dir in std::iter::once(&self.root).chain(self.splits.iter()) {
            std::fs::create_dir_all(dir).map_err(|source| LayoutError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        tracing::debug!("Dataset directories ready in {}", self.root.display());
        Ok(())
    }

    /// Replace this layout with one under `new_base`.
    ///
    /// Only creates directories; flushing pending data beforehand is the
    /// caller's job.
    pub fn switch<P: AsRef<Path>>(
        &mut self,
        new_base: P,
        use_timestamp: bool,
    ) -> Result<(), LayoutError> {
        let next = Self::resolve(new_base, use_timestamp);
        next.ensure()?;
        *self = next;
        Ok(())
    }

    /// Dataset root (base plus optional timestamp folder).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder batches of `split` are written into.
    pub fn split_dir(&self, split: Split) -> &Path {
        &self.splits[split.index()]
    }

    /// Folder for session config snapshots.
    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }
}

fn timestamp_folder() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_without_timestamp() {
        let layout = DirectoryLayout::resolve("/data/depth", false);
        assert_eq!(layout.root(), Path::new("/data/depth"));
        assert_eq!(layout.split_dir(Split::Train), Path::new("/data/depth/train"));
        assert_eq!(layout.split_dir(Split::Val), Path::new("/data/depth/val"));
        assert_eq!(layout.split_dir(Split::Test), Path::new("/data/depth/test"));
        assert_eq!(layout.config_dir(), PathBuf::from("/data/depth/config"));
    }

    #[test]
    fn test_resolve_with_timestamp() {
        let layout = DirectoryLayout::resolve("/data/depth", true);
        let stamp = layout
            .root()
            .file_name()
            .and_then(|s| s.to_str())
            .expect("stamp");

        assert_eq!(layout.root().parent(), Some(Path::new("/data/depth")));
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_create_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let layout = DirectoryLayout::create(dir.path().join("ds"), false).expect("create");
        layout.ensure().expect("ensure again");

        for split in Split::ALL {
            assert!(layout.split_dir(split).is_dir());
        }
    }

    #[test]
    fn test_switch_creates_new_folders() {
        let dir = tempdir().expect("tempdir");
        let mut layout = DirectoryLayout::create(dir.path().join("old"), false).expect("create");
        layout.switch(dir.path().join("new"), false).expect("switch");

        assert_eq!(layout.root(), dir.path().join("new"));
        assert!(layout.split_dir(Split::Test).is_dir());
        assert!(dir.path().join("old/train").is_dir());
    }

    #[test]
    fn test_create_fails_under_file() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").expect("write");

        let err = DirectoryLayout::create(blocker.join("ds"), false).expect_err("must fail");
        assert!(matches!(err, LayoutError::CreateDir { .. }));
    }
}
