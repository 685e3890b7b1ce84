//! Durable, single-slot persistence for the most recent batch tag operation.
//!
//! The store holds at most one [UndoRecord] at a time.  Each new batch operation fully overwrites it ("undo"
//! means "undo the last operation", not arbitrary history), and a successful undo consumes it.  The record
//! survives process restarts; nothing other than this module reads or writes the underlying file.

use {
    anyhow::Result,
    booru_shared::{tag_expression::Tag, BatchAction},
    serde_derive::{Deserialize, Serialize},
    std::{
        fs,
        io::{ErrorKind, Write},
        path::{Path, PathBuf},
    },
    tempfile::NamedTempFile,
    tracing::warn,
};

/// The exact tag change a batch operation caused on one image
///
/// This is precisely enough information to invert the operation: re-applying `removed` as additions and
/// `added` as removals restores the image's prior tag set.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct ImageDelta {
    pub image_id: i64,

    /// Tags the operation attached to the image
    pub added: Vec<Tag>,

    /// Tags the operation detached from the image
    pub removed: Vec<Tag>,
}

impl ImageDelta {
    /// Whether the operation was a no-op for this image.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The reversible delta of the most recent batch tag operation, one entry per image actually changed
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct UndoRecord {
    pub action: BatchAction,
    pub deltas: Vec<ImageDelta>,
}

/// Single-slot storage for the last batch tag delta
///
/// Implementations are injected into the batch engine rather than accessed through module state, so tests can
/// substitute an in-memory fake and assert exact record contents.
pub trait UndoStore: Send + Sync {
    /// Atomically replace any existing record with `record`.
    fn save(&self, record: &UndoRecord) -> Result<()>;

    /// Return the current record, or `None` if absent or unreadable.
    fn load(&self) -> Option<UndoRecord>;

    /// Remove the record if present.
    fn clear(&self);
}

/// [UndoStore] backed by a single JSON file
///
/// Writes go through a temporary file in the same directory followed by a rename, so a crash mid-write can
/// never leave a half-written record behind.
pub struct FileUndoStore {
    path: PathBuf,
}

impl FileUndoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl UndoStore for FileUndoStore {
    fn save(&self, record: &UndoRecord) -> Result<()> {
        let directory = self.path.parent().unwrap_or_else(|| Path::new("."));

        let mut file = NamedTempFile::new_in(directory)?;
        file.write_all(&serde_json::to_vec_pretty(record)?)?;
        file.persist(&self.path)?;

        Ok(())
    }

    fn load(&self) -> Option<UndoRecord> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!("unable to read undo state {}: {e}", self.path.display());
                }

                return None;
            }
        };

        match serde_json::from_slice(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                // A corrupt record would fail on every attempt, so remove it now.
                warn!(
                    "discarding unparseable undo state {}: {e}",
                    self.path.display()
                );

                self.clear();

                None
            }
        }
    }

    fn clear(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("unable to remove undo state {}: {e}", self.path.display());
            }
        }
    }
}

/// In-memory [UndoStore] used by tests, optionally simulating persistence failures
#[cfg(test)]
#[derive(Default)]
pub struct MemoryUndoStore {
    record: std::sync::Mutex<Option<UndoRecord>>,
    pub fail_saves: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryUndoStore {
    pub fn current(&self) -> Option<UndoRecord> {
        self.record.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl UndoStore for MemoryUndoStore {
    fn save(&self, record: &UndoRecord) -> Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(anyhow::anyhow!("simulated write failure"));
        }

        *self.record.lock().unwrap() = Some(record.clone());

        Ok(())
    }

    fn load(&self) -> Option<UndoRecord> {
        self.record.lock().unwrap().clone()
    }

    fn clear(&self) {
        *self.record.lock().unwrap() = None;
    }
}
