//! Bounded, ordered transcript with eviction-coupled resource cleanup.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::domain::chat::{MessageId, TranscriptEntry};

use super::ports::FileTransfer;

/// Default transcript size limit.
pub const TRANSCRIPT_CAP: usize = 150;

/// Session-local ordered log of messages and inline media, capped at a
/// fixed size. Evicting an inline-media entry whose content is still
/// offered by this session rescinds the offer — cleanup is coupled to
/// eviction, not merely memory reclamation.
pub struct TranscriptStore {
    cap: usize,
    transfer: Arc<dyn FileTransfer>,
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl TranscriptStore {
    pub fn new(cap: usize, transfer: Arc<dyn FileTransfer>) -> Self {
        Self {
            cap,
            transfer,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append one entry (locally authored or remotely received) and trim.
    pub async fn append(&self, entry: TranscriptEntry) {
        let evicted = {
            let mut entries = self.entries.lock().unwrap();
            entries.push(entry);
            Self::trim(&mut entries, self.cap)
        };
        self.cleanup(evicted).await;
    }

    /// Replace the whole transcript (backfill). Applied only while the
    /// local transcript is still empty — first backfill wins, later ones
    /// are ignored to avoid duplication. Returns whether it was applied.
    pub async fn set_all(&self, new_entries: Vec<TranscriptEntry>) -> bool {
        let evicted = {
            let mut entries = self.entries.lock().unwrap();
            if !entries.is_empty() {
                return false;
            }
            *entries = new_entries;
            Self::trim(&mut entries, self.cap)
        };
        self.cleanup(evicted).await;
        true
    }

    /// Set `time_received` on the entry with the given id, transitioning it
    /// from unsent to sent. Returns the updated entry.
    pub fn mark_sent(&self, id: &MessageId, time: u64) -> Option<TranscriptEntry> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.iter_mut().find(|e| e.id() == id)?;
        entry.mark_received(time);
        Some(entry.clone())
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries that have completed their send round-trip; the only ones
    /// ever shipped as backfill.
    pub fn sent_entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.is_sent())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Drop everything without the eviction side effect; teardown rescinds
    /// offers wholesale through the offer coordinator instead.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn trim(entries: &mut Vec<TranscriptEntry>, cap: usize) -> Vec<TranscriptEntry> {
        if entries.len() <= cap {
            return Vec::new();
        }
        let overflow = entries.len() - cap;
        entries.drain(..overflow).collect()
    }

    async fn cleanup(&self, evicted: Vec<TranscriptEntry>) {
        for entry in evicted {
            if let Some(content_id) = entry.content_id() {
                if self.transfer.is_offering(content_id) {
                    debug!(%content_id, "Rescinding offer for evicted inline media");
                    self.transfer.rescind(content_id).await;
                }
            }
        }
    }
}
