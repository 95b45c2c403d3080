//! In-process batch store
//!
//! For a single long-running service where every watcher is a task in the
//! same process. Claim is `DashMap::remove`, which hands the entry to exactly
//! one caller.

use crate::{BatchStore, PendingSummary, Result};
use dashmap::DashMap;
use settle_core::{ClaimedBatch, ConversationKey, Fragment};

#[derive(Debug, Default)]
pub struct MemoryStore {
    pending: DashMap<ConversationKey, Vec<Fragment>>,
    markers: DashMap<ConversationKey, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchStore for MemoryStore {
    fn append(&self, key: &ConversationKey, fragment: &Fragment) -> Result<()> {
        self.pending
            .entry(key.clone())
            .or_default()
            .push(fragment.clone());
        Ok(())
    }

    fn write_marker(&self, key: &ConversationKey, at_ms: u64) -> Result<()> {
        self.markers.insert(key.clone(), at_ms);
        Ok(())
    }

    fn read_marker(&self, key: &ConversationKey) -> Result<Option<u64>> {
        Ok(self.markers.get(key).map(|entry| *entry.value()))
    }

    fn claim(&self, key: &ConversationKey) -> Result<Option<ClaimedBatch>> {
        Ok(self
            .pending
            .remove(key)
            .map(|(key, fragments)| ClaimedBatch::new(key, fragments)))
    }

    fn clear_marker(&self, key: &ConversationKey, observed: u64) -> Result<()> {
        self.markers.remove_if(key, |_, at_ms| *at_ms == observed);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<PendingSummary>> {
        let mut summaries: Vec<_> = self
            .pending
            .iter()
            .map(|entry| PendingSummary {
                key: entry.key().clone(),
                fragments: entry.value().len(),
                last_arrival_ms: None,
            })
            .collect();

        for summary in &mut summaries {
            summary.last_arrival_ms = self.read_marker(&summary.key)?;
        }
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }

    fn is_shared_across_processes(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::ArrivalContext;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn key(raw: &str) -> ConversationKey {
        ConversationKey::new(raw).unwrap()
    }

    fn fragment(text: &str) -> Fragment {
        Fragment {
            text: text.to_string(),
            context: ArrivalContext::default(),
            received_at_ms: 0,
        }
    }

    #[test]
    fn test_claim_takes_whole_batch_once() {
        let store = MemoryStore::new();
        let k = key("chat-42");
        store.append(&k, &fragment("a")).unwrap();
        store.append(&k, &fragment("b")).unwrap();

        let batch = store.claim(&k).unwrap().unwrap();
        assert_eq!(batch.combined("+"), "a+b");
        assert!(store.claim(&k).unwrap().is_none());

        // Next arrival starts a fresh batch
        store.append(&k, &fragment("c")).unwrap();
        assert_eq!(store.claim(&k).unwrap().unwrap().combined("+"), "c");
    }

    #[test]
    fn test_keys_are_independent() {
        let store = MemoryStore::new();
        store.append(&key("x"), &fragment("1")).unwrap();
        store.append(&key("y"), &fragment("2")).unwrap();

        assert_eq!(store.claim(&key("x")).unwrap().unwrap().len(), 1);
        assert_eq!(store.pending().unwrap().len(), 1);
        assert_eq!(store.pending().unwrap()[0].key, key("y"));
    }

    #[test]
    fn test_clear_marker_respects_newer_arrivals() {
        let store = MemoryStore::new();
        let k = key("chat-7");
        store.write_marker(&k, 10).unwrap();
        store.write_marker(&k, 20).unwrap();

        store.clear_marker(&k, 10).unwrap();
        assert_eq!(store.read_marker(&k).unwrap(), Some(20));
        store.clear_marker(&k, 20).unwrap();
        assert_eq!(store.read_marker(&k).unwrap(), None);
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let k = key("chat-race");
        store.append(&k, &fragment("only")).unwrap();

        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let k = k.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.claim(&k).unwrap().is_some()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
