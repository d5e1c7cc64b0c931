//! Snapshot database: the last synced state of every path.
//!
//! The snapshot is the common ancestor of the three-way comparison. An entry is
//! written after a path is successfully transferred and dropped after it is
//! successfully deleted on either side.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::fs::types::FileNode;

/// Last observed state of a path at the end of its previous successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub remote_key: String,
    #[serde(default)]
    pub version_id: Option<String>,
}

impl SnapshotEntry {
    /// Record `node` (normally the post-action local file) as synced under `remote_key`.
    pub fn from_node(node: &FileNode, remote_key: impl Into<String>) -> Self {
        Self {
            path: node.path.clone(),
            size: node.size,
            last_modified: node.last_modified,
            remote_key: remote_key.into(),
            version_id: node.version.clone(),
        }
    }
}

/// Keyed persistence of [`SnapshotEntry`] records.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or overwrite the entry for `entry.path`.
    async fn save(&self, entry: &SnapshotEntry) -> Result<()>;

    /// Remove the entry for `path`. Removing an absent path is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<SnapshotEntry>>;
}

/// Volatile snapshot store, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<BTreeMap<String, SnapshotEntry>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<SnapshotEntry> {
        self.entries.lock().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, entry: &SnapshotEntry) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(entry.path.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.entries.lock().await.remove(path);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<SnapshotEntry>> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }
}

/// On-disk file layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    entries: Vec<SnapshotEntry>,
}

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Journal records kept before they are folded into the database, unless the
/// database holds more entries than this.
const COMPACT_MIN_RECORDS: usize = 1024;

/// One line of the change journal.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Save { entry: SnapshotEntry },
    Delete { path: String },
}

impl JournalRecord {
    fn apply(self, entries: &mut BTreeMap<String, SnapshotEntry>) {
        match self {
            JournalRecord::Save { entry } => {
                entries.insert(entry.path.clone(), entry);
            }
            JournalRecord::Delete { path } => {
                entries.remove(&path);
            }
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: BTreeMap<String, SnapshotEntry>,
    journal_records: usize,
}

/// JSON snapshot database with an append-only change journal.
///
/// Every change is appended as one JSON line to `<path>.journal` before it
/// becomes visible in memory. The journal is folded into the database when
/// the store is opened, when it grows past the database size, and on
/// [`compact`](Self::compact). Database paths ending in `.xz` are
/// LZMA-compressed, and the database is replaced through a temp file rename so
/// a crash never leaves a torn file.
#[derive(Debug)]
pub struct JsonSnapshotStore {
    path: PathBuf,
    journal: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonSnapshotStore {
    /// Open the database at `path`, starting empty if it does not exist yet.
    /// A leftover journal is replayed and folded into the database.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let journal = Self::journal_path_for(&path);

        let mut entries: BTreeMap<String, SnapshotEntry> = if path.exists() {
            Self::read_file(&path)?
                .entries
                .into_iter()
                .map(|entry| (entry.path.clone(), entry))
                .collect()
        } else {
            BTreeMap::new()
        };

        if journal.exists() {
            let replayed = Self::replay(&journal, &mut entries)?;
            if replayed > 0 {
                Self::write_file(&path, &entries)?;
            }
            fs::remove_file(&journal)
                .with_context(|| format!("Failed to remove journal {}", journal.display()))?;
            debug!(path = %path.display(), replayed, "folded snapshot journal");
        }

        Ok(Self {
            path,
            journal,
            state: Mutex::new(StoreState {
                entries,
                journal_records: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal
    }

    fn journal_path_for(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".journal");
        PathBuf::from(name)
    }

    /// Check if a path has .xz extension (compressed database)
    pub fn is_compressed(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == "xz")
            .unwrap_or(false)
    }

    fn read_file(path: &Path) -> Result<SnapshotFile> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open snapshot database {}", path.display()))?;

        let mut content = String::new();
        if Self::is_compressed(path) {
            XzDecoder::new(BufReader::new(file)).read_to_string(&mut content)
        } else {
            BufReader::new(file).read_to_string(&mut content)
        }
        .with_context(|| format!("Failed to read snapshot database {}", path.display()))?;

        if content.trim().is_empty() {
            return Ok(SnapshotFile::default());
        }

        let parsed: SnapshotFile = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt snapshot database {}", path.display()))?;
        if parsed.version > SNAPSHOT_FORMAT_VERSION {
            anyhow::bail!(
                "Snapshot database {} has unsupported format version {}",
                path.display(),
                parsed.version
            );
        }
        Ok(parsed)
    }

    /// Apply every journal record to `entries`, returning how many were applied.
    fn replay(journal: &Path, entries: &mut BTreeMap<String, SnapshotEntry>) -> Result<usize> {
        let content = fs::read_to_string(journal)
            .with_context(|| format!("Failed to read journal {}", journal.display()))?;
        let lines: Vec<&str> = content.lines().filter(|line| !line.trim().is_empty()).collect();
        let complete = content.ends_with('\n');

        let mut applied = 0;
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) => {
                    record.apply(entries);
                    applied += 1;
                }
                // Interrupted append
                Err(err) if index + 1 == lines.len() && !complete => {
                    warn!(journal = %journal.display(), error = %err, "dropping torn journal record");
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("Corrupt journal {} at record {}", journal.display(), index + 1)
                    });
                }
            }
        }
        Ok(applied)
    }

    fn append_record(journal: &Path, record: &JournalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        if let Some(parent) = journal.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(journal)
            .with_context(|| format!("Failed to open journal {}", journal.display()))?;
        let len = file.metadata()?.len();
        if let Err(err) = file.write_all(&line) {
            let _ = file.set_len(len);
            return Err(err)
                .with_context(|| format!("Failed to append to journal {}", journal.display()));
        }
        Ok(())
    }

    fn write_file(path: &Path, entries: &BTreeMap<String, SnapshotEntry>) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let snapshot = SnapshotFile {
            version: SNAPSHOT_FORMAT_VERSION,
            entries: entries.values().cloned().collect(),
        };
        let data = serde_json::to_vec(&snapshot)?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        if Self::is_compressed(path) {
            let mut encoder = XzEncoder::new(BufWriter::new(file), 6);
            encoder.write_all(&data)?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            writer.write_all(&data)?;
            writer.flush()?;
        }

        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace snapshot database {}", path.display()))?;
        Ok(())
    }

    async fn append(&self, record: JournalRecord) -> Result<()> {
        let journal = self.journal.clone();
        tokio::task::spawn_blocking(move || Self::append_record(&journal, &record))
            .await
            .context("Snapshot journal task panicked")?
    }

    /// Fold the journal into the database and remove it.
    pub async fn compact(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.compact_locked(&mut state).await
    }

    async fn compact_locked(&self, state: &mut StoreState) -> Result<()> {
        if state.journal_records == 0 {
            return Ok(());
        }

        let path = self.path.clone();
        let entries = state.entries.clone();
        tokio::task::spawn_blocking(move || Self::write_file(&path, &entries))
            .await
            .context("Snapshot writer task panicked")??;

        match tokio::fs::remove_file(&self.journal).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to remove journal {}", self.journal.display())
                });
            }
        }
        state.journal_records = 0;
        Ok(())
    }

    async fn after_append(&self, state: &mut StoreState) {
        state.journal_records += 1;
        if state.journal_records < COMPACT_MIN_RECORDS.max(state.entries.len()) {
            return;
        }
        // The journal still holds every change.
        if let Err(err) = self.compact_locked(state).await {
            warn!(path = %self.path.display(), error = %format!("{:#}", err), "snapshot compaction failed");
        }
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn save(&self, entry: &SnapshotEntry) -> Result<()> {
        let mut state = self.state.lock().await;
        self.append(JournalRecord::Save {
            entry: entry.clone(),
        })
        .await?;
        state.entries.insert(entry.path.clone(), entry.clone());
        self.after_append(&mut state).await;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.entries.contains_key(path) {
            return Ok(());
        }
        self.append(JournalRecord::Delete {
            path: path.to_string(),
        })
        .await?;
        state.entries.remove(path);
        self.after_append(&mut state).await;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<SnapshotEntry>> {
        Ok(self.state.lock().await.entries.values().cloned().collect())
    }
}
