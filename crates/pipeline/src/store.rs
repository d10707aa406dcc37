//! Persistence hooks for priority lists and model health.
//!
//! The orchestrator loads a [`PersistedState`] once at startup and saves the
//! affected half after every mutation. [`MemoryStore`] keeps it in process;
//! [`JsonFileStore`] writes one pretty-printed JSON document atomically
//! (temp file, then rename).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use genflow_core::health::ModelRecord;
use genflow_core::types::{Category, ModelId};
use serde::{Deserialize, Serialize};

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub priorities: BTreeMap<Category, Vec<ModelId>>,
    #[serde(default)]
    pub health: HashMap<ModelId, ModelRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Injected load/save hooks.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<PersistedState, StoreError>;

    async fn save_priorities(
        &self,
        priorities: &BTreeMap<Category, Vec<ModelId>>,
    ) -> Result<(), StoreError>;

    async fn save_health(&self, health: &HashMap<ModelId, ModelRecord>) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Copy of what has been saved so far.
    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(self.snapshot())
    }

    async fn save_priorities(
        &self,
        priorities: &BTreeMap<Category, Vec<ModelId>>,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .priorities = priorities.clone();
        Ok(())
    }

    async fn save_health(&self, health: &HashMap<ModelId, ModelRecord>) -> Result<(), StoreError> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).health = health.clone();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<PersistedState, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, apply: impl FnOnce(&mut PersistedState)) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.read().await?;
        apply(&mut state);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&state)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        tracing::debug!(path = %self.path.display(), "State file saved");
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<PersistedState, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.read().await
    }

    async fn save_priorities(
        &self,
        priorities: &BTreeMap<Category, Vec<ModelId>>,
    ) -> Result<(), StoreError> {
        self.update(|state| state.priorities = priorities.clone()).await
    }

    async fn save_health(&self, health: &HashMap<ModelId, ModelRecord>) -> Result<(), StoreError> {
        self.update(|state| state.health = health.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn record(successes: u64) -> ModelRecord {
        ModelRecord {
            success_count: successes,
            ..Default::default()
        }
    }

    // -- MemoryStore ----------------------------------------------------------

    #[tokio::test]
    async fn memory_store_keeps_halves_independent() {
        let store = MemoryStore::new();
        store
            .save_priorities(&BTreeMap::from([(Category::Video, vec!["a".to_string()])]))
            .await
            .unwrap();
        store
            .save_health(&HashMap::from([("a".to_string(), record(2))]))
            .await
            .unwrap();

        let state = store.load().await.unwrap();
        assert_eq!(state.priorities[&Category::Video], vec!["a".to_string()]);
        assert_eq!(state.health["a"].success_count, 2);
    }

    // -- JsonFileStore --------------------------------------------------------

    #[tokio::test]
    async fn missing_file_loads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().await.unwrap(), PersistedState::default());
    }

    #[tokio::test]
    async fn saves_survive_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = JsonFileStore::new(&path);
        store
            .save_priorities(&BTreeMap::from([(
                Category::Video,
                vec!["b".to_string(), "a".to_string()],
            )]))
            .await
            .unwrap();
        store
            .save_health(&HashMap::from([("b".to_string(), record(5))]))
            .await
            .unwrap();

        let reopened = JsonFileStore::new(&path);
        let state = reopened.load().await.unwrap();
        assert_eq!(
            state.priorities[&Category::Video],
            vec!["b".to_string(), "a".to_string()]
        );
        assert_eq!(state.health["b"].success_count, 5);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        assert_matches!(
            JsonFileStore::new(&path).load().await,
            Err(StoreError::Serialization(_))
        );
    }

    #[test]
    fn category_keys_serialize_as_names() {
        let state = PersistedState {
            priorities: BTreeMap::from([(Category::Image, vec!["m".to_string()])]),
            health: HashMap::new(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["priorities"]["image"][0], "m");
    }
}
