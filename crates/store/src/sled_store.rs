//! Batch store on the sled embedded database
//!
//! Durable across restarts of a single service. sled takes an exclusive
//! lock on its directory, so this store cannot be shared between processes.

use crate::{BatchStore, PendingSummary, Result, StoreError};
use settle_core::{ClaimedBatch, ConversationKey, Fragment};
use sled::{Db, IVec, Tree};
use std::path::Path;

pub struct SledStore {
    db: Db,
    /// key -> JSON array of fragments
    pending: Tree,
    /// key -> big-endian u64 milliseconds
    markers: Tree,
}

impl SledStore {
    /// Open or create a store in the given directory
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path.join("batches.db"))?;
        let pending = db.open_tree("pending")?;
        let markers = db.open_tree("markers")?;
        Ok(Self {
            db,
            pending,
            markers,
        })
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl BatchStore for SledStore {
    fn append(&self, key: &ConversationKey, fragment: &Fragment) -> Result<()> {
        let slot = key.as_str().as_bytes();

        // Compare-and-swap loop so concurrent appenders never overwrite each other
        loop {
            let current = self.pending.get(slot)?;
            let mut fragments = match &current {
                Some(bytes) => decode_fragments(key, bytes)?,
                None => Vec::new(),
            };
            fragments.push(fragment.clone());
            let next = serde_json::to_vec(&fragments)?;

            if self.pending.compare_and_swap(slot, current, Some(next))?.is_ok() {
                break;
            }
        }

        self.flush()
    }

    fn write_marker(&self, key: &ConversationKey, at_ms: u64) -> Result<()> {
        self.markers
            .insert(key.as_str().as_bytes(), &at_ms.to_be_bytes()[..])?;
        self.flush()
    }

    fn read_marker(&self, key: &ConversationKey) -> Result<Option<u64>> {
        match self.markers.get(key.as_str().as_bytes())? {
            Some(bytes) => decode_marker(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn claim(&self, key: &ConversationKey) -> Result<Option<ClaimedBatch>> {
        let Some(bytes) = self.pending.remove(key.as_str().as_bytes())? else {
            return Ok(None);
        };
        self.flush()?;

        let fragments = decode_fragments(key, &bytes)?;
        Ok(Some(ClaimedBatch::new(key.clone(), fragments)))
    }

    fn clear_marker(&self, key: &ConversationKey, observed: u64) -> Result<()> {
        // Err(CompareAndSwapError) means a newer arrival rewrote the marker
        let _ = self.markers.compare_and_swap(
            key.as_str().as_bytes(),
            Some(&observed.to_be_bytes()[..]),
            None::<&[u8]>,
        )?;
        self.flush()
    }

    fn pending(&self) -> Result<Vec<PendingSummary>> {
        let mut summaries = Vec::new();
        for item in self.pending.iter() {
            let (slot, bytes) = item?;
            let raw = String::from_utf8_lossy(&slot).into_owned();
            let key = ConversationKey::new(raw).map_err(|e| StoreError::Corrupt {
                key: String::from_utf8_lossy(&slot).into_owned(),
                reason: e.to_string(),
            })?;
            let fragments = decode_fragments(&key, &bytes)?.len();
            let last_arrival_ms = self.read_marker(&key)?;
            summaries.push(PendingSummary {
                key,
                fragments,
                last_arrival_ms,
            });
        }

        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }

    fn is_shared_across_processes(&self) -> bool {
        false
    }
}

fn decode_fragments(key: &ConversationKey, bytes: &IVec) -> Result<Vec<Fragment>> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode_marker(key: &ConversationKey, bytes: &IVec) -> Result<u64> {
    let raw = <[u8; 8]>::try_from(&bytes[..]).map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        reason: format!("marker has {} bytes, expected 8", bytes.len()),
    })?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::ArrivalContext;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn key(raw: &str) -> ConversationKey {
        ConversationKey::new(raw).unwrap()
    }

    fn fragment(text: &str, at: u64) -> Fragment {
        Fragment {
            text: text.to_string(),
            context: ArrivalContext {
                group_history: Some("/tmp/history.json".to_string()),
                profile: None,
            },
            received_at_ms: at,
        }
    }

    #[test]
    fn test_append_claim_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        let k = key("chat-42");

        store.append(&k, &fragment("hello", 1)).unwrap();
        store.append(&k, &fragment("?", 2)).unwrap();

        let batch = store.claim(&k).unwrap().unwrap();
        assert_eq!(batch.combined(" "), "hello ?");
        assert_eq!(
            batch.latest_context().group_history.as_deref(),
            Some("/tmp/history.json")
        );
        assert!(store.claim(&k).unwrap().is_none());
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let k = key("chat-7");
        {
            let store = SledStore::open(temp_dir.path()).unwrap();
            store.append(&k, &fragment("ping", 5)).unwrap();
            store.write_marker(&k, 5).unwrap();
        }

        let store = SledStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.read_marker(&k).unwrap(), Some(5));
        let pending = store.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fragments, 1);
        assert_eq!(pending[0].last_arrival_ms, Some(5));
    }

    #[test]
    fn test_clear_marker_is_compare_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        let k = key("chat-7");

        store.write_marker(&k, 100).unwrap();
        store.clear_marker(&k, 99).unwrap();
        assert_eq!(store.read_marker(&k).unwrap(), Some(100));
        store.clear_marker(&k, 100).unwrap();
        assert_eq!(store.read_marker(&k).unwrap(), None);
    }

    #[test]
    fn test_pending_lists_keys_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();

        for (raw, at) in [("chat-9", 1), ("chat-10", 2), ("alpha", 3)] {
            store.append(&key(raw), &fragment("hi", at)).unwrap();
            store.write_marker(&key(raw), at).unwrap();
        }
        store.append(&key("chat-9"), &fragment("again", 4)).unwrap();

        let pending = store.pending().unwrap();
        let keys: Vec<_> = pending.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "chat-10", "chat-9"]);
        assert_eq!(pending[2].fragments, 2);
        assert_eq!(pending[2].last_arrival_ms, Some(1));
    }

    #[test]
    fn test_concurrent_appends_and_single_claim() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SledStore::open(temp_dir.path()).unwrap());
        let k = key("chat-race");

        let appenders: Vec<_> = (0..4u64)
            .map(|t| {
                let store = Arc::clone(&store);
                let k = k.clone();
                thread::spawn(move || {
                    for i in 0..25u64 {
                        store.append(&k, &fragment("x", t * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in appenders {
            handle.join().unwrap();
        }

        let barrier = Arc::new(Barrier::new(6));
        let claimers: Vec<_> = (0..6)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let k = k.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.claim(&k).unwrap()
                })
            })
            .collect();

        let winners: Vec<_> = claimers
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].len(), 100);
    }
}
