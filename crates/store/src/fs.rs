//! Filesystem-backed batch store
//!
//! Layout under the store root:
//! ```text
//! <root>/
//!   pending/<digest>.jsonl          one JSON record per fragment
//!   claimed/<digest>.<ulid>.jsonl   private to the watcher that claimed it
//!   markers/<digest>.last           last arrival, Unix milliseconds
//!   tmp/                            staging for atomic marker writes
//! ```
//!
//! Claiming is a `rename` from `pending/` into `claimed/`, which succeeds for
//! exactly one caller when several race on the same source path. Appends hold
//! an exclusive `flock` on the pending file and re-check that the path still
//! names the locked inode; the claimer takes the same lock before reading, so
//! an append racing a claim lands wholly in the claimed batch or in the next one.

use crate::{BatchStore, PendingSummary, Result, StoreError};
use nix::fcntl::{flock, FlockArg};
use serde::{Deserialize, Serialize};
use settle_core::{ClaimedBatch, ConversationKey, Fragment};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::warn;
use ulid::Ulid;

const PENDING_DIR: &str = "pending";
const CLAIMED_DIR: &str = "claimed";
const MARKERS_DIR: &str = "markers";
const TMP_DIR: &str = "tmp";

/// One line of a pending file
#[derive(Serialize, Deserialize)]
struct Record {
    key: String,
    fragment: Fragment,
}

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [PENDING_DIR, CLAIMED_DIR, MARKERS_DIR, TMP_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(StoreError::io("create directory", &path))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pending_path(&self, key: &ConversationKey) -> PathBuf {
        self.root.join(PENDING_DIR).join(format!("{}.jsonl", key.digest()))
    }

    fn marker_path(&self, key: &ConversationKey) -> PathBuf {
        self.root.join(MARKERS_DIR).join(format!("{}.last", key.digest()))
    }

    fn claimed_path(&self, key: &ConversationKey) -> PathBuf {
        self.root
            .join(CLAIMED_DIR)
            .join(format!("{}.{}.jsonl", key.digest(), Ulid::new()))
    }
}

impl BatchStore for FsStore {
    fn append(&self, key: &ConversationKey, fragment: &Fragment) -> Result<()> {
        let path = self.pending_path(key);
        let mut line = serde_json::to_vec(&Record {
            key: key.as_str().to_string(),
            fragment: fragment.clone(),
        })?;
        line.push(b'\n');

        loop {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(StoreError::io("open pending batch", &path))?;
            lock_exclusive(&file, &path)?;

            // A claim renamed the file between our open and our lock
            if !still_linked(&file, &path)? {
                continue;
            }

            file.write_all(&line)
                .map_err(StoreError::io("append to pending batch", &path))?;
            file.sync_data()
                .map_err(StoreError::io("sync pending batch", &path))?;
            return Ok(());
        }
    }

    fn write_marker(&self, key: &ConversationKey, at_ms: u64) -> Result<()> {
        atomic_write(
            &self.root.join(TMP_DIR),
            &self.marker_path(key),
            at_ms.to_string().as_bytes(),
        )
    }

    fn read_marker(&self, key: &ConversationKey) -> Result<Option<u64>> {
        let path = self.marker_path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("read marker", &path)(e)),
        };

        match contents.trim().parse::<u64>() {
            Ok(at_ms) => Ok(Some(at_ms)),
            Err(_) => {
                warn!(key = %key, path = %path.display(), "Ignoring unparsable last-arrival marker");
                Ok(None)
            }
        }
    }

    fn claim(&self, key: &ConversationKey) -> Result<Option<ClaimedBatch>> {
        let pending = self.pending_path(key);
        let claimed = self.claimed_path(key);

        match fs::rename(&pending, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("claim pending batch", &pending)(e)),
        }

        let mut file = File::open(&claimed).map_err(StoreError::io("open claimed batch", &claimed))?;
        // Waits out an append that locked the inode before the rename
        lock_exclusive(&file, &claimed)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(StoreError::io("read claimed batch", &claimed))?;
        drop(file);

        fs::remove_file(&claimed).map_err(StoreError::io("remove claimed batch", &claimed))?;

        let fragments = parse_records(&contents, &claimed)
            .into_iter()
            .map(|record| record.fragment)
            .collect();
        Ok(Some(ClaimedBatch::new(key.clone(), fragments)))
    }

    fn clear_marker(&self, key: &ConversationKey, observed: u64) -> Result<()> {
        // Not atomic across processes: a marker rewritten between the read
        // and the unlink is lost, which at worst lets the newer watcher skip
        // one freshness check.
        if self.read_marker(key)? != Some(observed) {
            return Ok(());
        }
        let path = self.marker_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove marker", &path)(e)),
        }
    }

    fn pending(&self) -> Result<Vec<PendingSummary>> {
        let dir = self.root.join(PENDING_DIR);
        let entries = fs::read_dir(&dir).map_err(StoreError::io("list pending batches", &dir))?;

        let mut summaries = Vec::new();
        for entry in entries {
            let path = entry.map_err(StoreError::io("list pending batches", &dir))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }

            let contents = match fs::read_to_string(&path) {
                Ok(contents) => contents,
                // Claimed while we were listing
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io("read pending batch", &path)(e)),
            };

            let records = parse_records(&contents, &path);
            let Some(first) = records.first() else {
                continue;
            };
            let key = match ConversationKey::new(first.key.clone()) {
                Ok(key) => key,
                Err(_) => continue,
            };
            let last_arrival_ms = self.read_marker(&key)?;
            summaries.push(PendingSummary {
                key,
                fragments: records.len(),
                last_arrival_ms,
            });
        }

        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }

    fn is_shared_across_processes(&self) -> bool {
        true
    }
}

/// Parse a pending file, skipping torn or corrupt lines
fn parse_records(contents: &str, path: &Path) -> Vec<Record> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Record>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping corrupt batch record");
                None
            }
        })
        .collect()
}

/// Block until we hold an exclusive flock on `file`
///
/// Released when the file is closed.
fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(|source| StoreError::Lock {
        path: path.to_path_buf(),
        source,
    })
}

/// Whether `path` still refers to the inode behind `file`
fn still_linked(file: &File, path: &Path) -> Result<bool> {
    let ours = file
        .metadata()
        .map_err(StoreError::io("stat pending batch", path))?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == ours.dev() && current.ino() == ours.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io("stat pending batch", path)(e)),
    }
}

/// Atomic write helper
///
/// Writes data to a temporary file, fsyncs it, then renames it over the target.
pub fn atomic_write(tmp_dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = tmp_dir.join(format!("{}.tmp", Ulid::new()));

    let mut tmp = File::create(&tmp_path).map_err(StoreError::io("create temp file", &tmp_path))?;
    tmp.write_all(data)
        .map_err(StoreError::io("write temp file", &tmp_path))?;
    tmp.sync_all()
        .map_err(StoreError::io("sync temp file", &tmp_path))?;
    drop(tmp);

    if let Err(e) = fs::rename(&tmp_path, target) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io("rename into place", target)(e));
    }
    Ok(())
}
