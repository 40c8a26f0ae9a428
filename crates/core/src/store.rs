use crate::models::DocumentInfo;
use crate::retrieval::ChunkIndex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub document: DocumentInfo,
    pub index: Arc<ChunkIndex>,
    stored_at: Instant,
}

impl SessionEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= ttl
    }
}

/// Per-session document index. The last upload for a session wins.
#[derive(Debug)]
pub struct SessionStore {
    entries: RwLock<HashMap<String, SessionEntry>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores the document for `session_id`, returning the one it replaced.
    pub async fn put(
        &self,
        session_id: &str,
        document: DocumentInfo,
        index: ChunkIndex,
    ) -> Option<DocumentInfo> {
        let entry = SessionEntry {
            document,
            index: Arc::new(index),
            stored_at: Instant::now(),
        };
        self.entries
            .write()
            .await
            .insert(session_id.to_string(), entry)
            .map(|previous| previous.document)
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionEntry> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(session_id) {
                None => return None,
                Some(entry) if !entry.is_expired(self.ttl, now) => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(session_id)
            .is_some_and(|entry| entry.is_expired(self.ttl, now))
        {
            entries.remove(session_id);
            tracing::info!(session_id, "session expired");
        }
        None
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.entries.write().await.remove(session_id).is_some()
    }

    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(self.ttl, now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, DocumentKind};

    fn document(name: &str, chunk_count: usize) -> DocumentInfo {
        DocumentInfo {
            document_id: format!("id-{name}"),
            file_name: name.to_string(),
            kind: DocumentKind::Txt,
            characters: chunk_count * 10,
            chunk_count,
            uploaded_at: chrono::Utc::now(),
        }
    }

    fn index(count: usize) -> ChunkIndex {
        let chunks = (0..count)
            .map(|index| Chunk {
                index,
                start: index * 10,
                text: format!("chunk {index}"),
            })
            .collect();
        ChunkIndex::new(chunks, vec![vec![1.0]; count]).expect("aligned index")
    }

    #[tokio::test]
    async fn last_upload_wins() {
        let store = SessionStore::default();
        assert!(store.put("s1", document("a.txt", 1), index(1)).await.is_none());

        let replaced = store.put("s1", document("b.txt", 3), index(3)).await;
        assert_eq!(replaced.map(|doc| doc.file_name), Some("a.txt".to_string()));

        let entry = store.get("s1").await.expect("session is stored");
        assert_eq!(entry.document.file_name, "b.txt");
        assert_eq!(entry.index.len(), 3);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = SessionStore::default();
        store.put("s1", document("a.txt", 1), index(1)).await;

        assert!(store.get("s2").await.is_none());
        assert!(store.remove("s1").await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn expired_sessions_are_dropped() {
        let store = SessionStore::new(Duration::ZERO);
        store.put("s1", document("a.txt", 1), index(1)).await;
        store.put("s2", document("b.txt", 1), index(1)).await;

        assert!(store.get("s1").await.is_none());
        assert_eq!(store.len().await, 1);
        assert_eq!(store.purge_expired().await, 1);
        assert!(store.is_empty().await);
    }
}
