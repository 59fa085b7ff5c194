//! Full-snapshot persistence of the element collection.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::models::Element;

/// JSON array of every element, overwritten atomically on each write
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. `None` when the file is absent or corrupt.
    pub fn read(&self) -> Option<Vec<Element>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No snapshot at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to open snapshot {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_reader::<_, Vec<Element>>(BufReader::new(file)) {
            Ok(elements) => Some(elements),
            Err(e) => {
                warn!(
                    "Ignoring corrupt snapshot {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Read the snapshot, treating absent or corrupt files as empty
    pub fn load(&self) -> Vec<Element> {
        self.read().unwrap_or_default()
    }

    /// Replace the snapshot with `elements`.
    ///
    /// Writes to a temporary file in the same directory and renames it over
    /// the target, so readers only ever see a complete snapshot.
    pub fn write(&self, elements: &[Arc<Element>]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(&dir).context("Failed to create temp snapshot")?;
        {
            let records: Vec<&Element> = elements.iter().map(AsRef::as_ref).collect();
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &records).context("Failed to encode snapshot")?;
            writer.flush().context("Failed to write snapshot")?;
        }
        tmp.as_file().sync_all().context("Failed to sync snapshot")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace snapshot {}", self.path.display()))?;

        debug!(
            "Wrote snapshot of {} elements to {}",
            elements.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Delete the snapshot; a missing file is not an error
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove snapshot {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::element::tests::element;

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("nested").join("elements.json"));

        let elements = vec![
            Arc::new(element("node:1", 1.0, 2.0, "2024-01-01T00:00:00Z")),
            Arc::new(element("node:2", 3.0, 4.0, "2024-01-02T00:00:00Z")),
        ];
        snapshot.write(&elements).unwrap();

        let loaded = snapshot.load();
        let expected: Vec<Element> = elements.iter().map(|e| e.as_ref().clone()).collect();
        assert_eq!(loaded, expected);
    }

    #[test]
    fn test_absent_and_corrupt_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("elements.json"));
        assert!(snapshot.read().is_none());
        assert!(snapshot.load().is_empty());

        fs::write(snapshot.path(), b"[{\"id\": truncated").unwrap();
        assert!(snapshot.read().is_none());
        assert!(snapshot.load().is_empty());

        snapshot.remove().unwrap();
        snapshot.remove().unwrap();
    }
}
