//! In-memory [`FileTransfer`] adapter.
//!
//! Content addresses are magnet-style URIs derived from the file bytes.
//! Real deployments plug in the content-addressed transfer collaborator;
//! this adapter backs tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::application::ports::{FileTransfer, OfferedFile};
use crate::domain::chat::ContentId;

pub struct InMemoryFileTransfer {
    active: Mutex<HashSet<ContentId>>,
    rescinds: Mutex<HashMap<ContentId, usize>>,
}

impl InMemoryFileTransfer {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashSet::new()),
            rescinds: Mutex::new(HashMap::new()),
        }
    }

    /// Convenience for tests: offer a single in-memory file.
    pub async fn offer_bytes(&self, name: &str, mime: &str, data: Bytes) -> ContentId {
        self.offer(vec![OfferedFile {
            name: name.into(),
            mime: mime.into(),
            data,
        }])
        .await
        .unwrap_or_else(|_| unreachable!("in-memory offer cannot fail"))
    }

    /// How many times `rescind` was called for this id.
    pub fn rescind_count(&self, id: &ContentId) -> usize {
        self.rescinds.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

impl Default for InMemoryFileTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileTransfer for InMemoryFileTransfer {
    async fn offer(&self, files: Vec<OfferedFile>) -> anyhow::Result<ContentId> {
        let mut hasher = Sha256::new();
        for file in &files {
            hasher.update(file.name.as_bytes());
            hasher.update(&file.data);
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        let id = ContentId(format!("magnet:?xt=urn:sha256:{hex}"));

        self.active.lock().unwrap().insert(id.clone());
        Ok(id)
    }

    async fn rescind(&self, id: &ContentId) {
        // Idempotent: rescinding an unknown offer is a no-op.
        self.active.lock().unwrap().remove(id);
        *self.rescinds.lock().unwrap().entry(id.clone()).or_insert(0) += 1;
    }

    fn is_offering(&self, id: &ContentId) -> bool {
        self.active.lock().unwrap().contains(id)
    }
}
