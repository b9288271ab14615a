use std::sync::Arc;

use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::StoreError;
use crate::state::{compute_checksum, State};

/// The typed layer over a raw [`StorageBackend`]: serializes [`State`]
/// documents to and from their storage keys.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StorageBackend>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub async fn load(&self, key: &str) -> Result<Option<State>, StoreError> {
        match self.backend.get(key).await? {
            Some(bytes) => {
                let state: State = serde_json::from_slice(&bytes)?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Serialize and persist a state document.
    ///
    /// Records the content checksum of the document (checksum field excluded)
    /// before handing the bytes to the backend's atomic `put`. Timestamps are
    /// the caller's responsibility, so saving a loaded document round-trips
    /// bit-equivalently.
    pub async fn save(&self, key: &str, state: &State) -> Result<State, StoreError> {
        let mut stamped = state.clone();
        stamped.checksum = None;
        stamped.checksum = Some(compute_checksum(&stamped));

        let bytes = serde_json::to_vec_pretty(&stamped)?;
        self.backend.put(key, &bytes).await?;
        debug!(key, resources = stamped.resources.len(), "state saved");
        Ok(stamped)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.backend.delete(key).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.backend.list(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::state::state_key;

    fn store() -> StateStore {
        StateStore::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let store = store();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = store();
        let key = state_key("tenants/t-1/v1", "orders", "dev");
        let state = State::new("orders", "dev", "t-1", "ci");

        let saved = store.save(&key, &state).await.unwrap();
        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert!(loaded.checksum.is_some());
    }

    #[tokio::test]
    async fn save_of_loaded_state_round_trips_exactly() {
        let store = store();
        let key = state_key("tenants/t-1/v1", "orders", "dev");
        let state = State::new("orders", "dev", "t-1", "ci");

        store.save(&key, &state).await.unwrap();
        let first = store.load(&key).await.unwrap().unwrap();
        store.save(&key, &first).await.unwrap();
        let second = store.load(&key).await.unwrap().unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let store = store();
        let key = state_key("tenants/t-1/v1", "orders", "dev");
        store.save(&key, &State::new("orders", "dev", "t-1", "ci")).await.unwrap();
        store.delete(&key).await.unwrap();
        assert!(store.load(&key).await.unwrap().is_none());
    }
}
