//! # Persistence
//!
//! Learned buttons and shortcut bindings are stored as whole-collection blobs in a
//! key/value [`BlobStore`]. Every mutation rewrites the affected blob in full, so a
//! blob is always a complete, self-consistent document.
//!
//! Missing blobs load as empty collections. A blob that fails to parse is logged and
//! also treated as empty, so the engine always starts.

pub mod persistence_worker;

use crate::controller::buttons::DetectedButton;
use crate::mapping::shortcut::ShortcutBinding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

pub const BUTTONS_KEY: &str = "registered_buttons";
pub const SHORTCUTS_KEY: &str = "shortcut_bindings";

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        source: toml::ser::Error,
    },

    #[error("Failed to parse {key}: {source}")]
    Parse {
        key: String,
        source: toml::de::Error,
    },

    #[error("Blob {0} is not valid UTF-8")]
    Encoding(String),
}

/// Key/value storage for whole-collection blobs.
pub trait BlobStore: Send + Sync + 'static {
    /// `Ok(None)` when nothing has been stored under `key`.
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, PersistenceError>> + Send;

    fn save(&self, key: &str, data: Vec<u8>) -> impl Future<Output = Result<(), PersistenceError>> + Send;
}

/// One TOML file per key inside a directory.
#[derive(Clone, Debug)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.toml"))
    }
}

impl BlobStore for FileBlobStore {
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, PersistenceError>> + Send {
        let path = self.path_for(key);
        async move {
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    debug!("Read {} bytes from {}", data.len(), path.display());
                    Ok(Some(data))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(source) => Err(PersistenceError::Io { path, source }),
            }
        }
    }

    fn save(&self, key: &str, data: Vec<u8>) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        async move {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| PersistenceError::Io {
                    path: dir.clone(),
                    source,
                })?;

            // Write next to the target and rename so a crash never leaves half a file
            let staging = path.with_extension("toml.tmp");
            tokio::fs::write(&staging, &data)
                .await
                .map_err(|source| PersistenceError::Io {
                    path: staging.clone(),
                    source,
                })?;
            tokio::fs::rename(&staging, &path)
                .await
                .map_err(|source| PersistenceError::Io {
                    path: path.clone(),
                    source,
                })?;

            debug!("Wrote {} bytes to {}", data.len(), path.display());
            Ok(())
        }
    }
}

/// In-memory store; clones share the same contents.
#[derive(Clone, Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(key).cloned()
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, PersistenceError>> + Send {
        let blob = self.get(key);
        async move { Ok(blob) }
    }

    fn save(&self, key: &str, data: Vec<u8>) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.to_string(), data);
        }
        async { Ok(()) }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ButtonsDocument {
    #[serde(default)]
    pub buttons: Vec<DetectedButton>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ShortcutsDocument {
    #[serde(default)]
    pub shortcuts: Vec<ShortcutBinding>,
}

pub fn encode<T: Serialize>(key: &str, document: &T) -> Result<Vec<u8>, PersistenceError> {
    toml::to_string_pretty(document)
        .map(String::into_bytes)
        .map_err(|source| PersistenceError::Serialize {
            key: key.to_string(),
            source,
        })
}

pub fn decode<T: for<'de> Deserialize<'de>>(key: &str, data: &[u8]) -> Result<T, PersistenceError> {
    let text = std::str::from_utf8(data).map_err(|_| PersistenceError::Encoding(key.to_string()))?;
    toml::from_str(text).map_err(|source| PersistenceError::Parse {
        key: key.to_string(),
        source,
    })
}

async fn load_document<S, T>(store: &S, key: &str) -> T
where
    S: BlobStore,
    T: for<'de> Deserialize<'de> + Default,
{
    let data = match store.load(key).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            info!("No stored {}, starting empty", key);
            return T::default();
        }
        Err(e) => {
            error!("Failed to load {}: {}", key, e);
            return T::default();
        }
    };

    decode(key, &data).unwrap_or_else(|e| {
        error!("Discarding unreadable {}: {}", key, e);
        T::default()
    })
}

pub async fn load_buttons<S: BlobStore>(store: &S) -> Vec<DetectedButton> {
    load_document::<S, ButtonsDocument>(store, BUTTONS_KEY)
        .await
        .buttons
}

pub async fn load_shortcuts<S: BlobStore>(store: &S) -> Vec<ShortcutBinding> {
    load_document::<S, ShortcutsDocument>(store, SHORTCUTS_KEY)
        .await
        .shortcuts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::buttons::ButtonCategory;
    use crate::mapping::shortcut::{Modifier, Modifiers};

    #[tokio::test]
    async fn absent_blobs_load_empty() {
        let store = MemoryBlobStore::new();
        assert!(load_buttons(&store).await.is_empty());
        assert!(load_shortcuts(&store).await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_blob_loads_empty() {
        let store = MemoryBlobStore::new();
        store
            .save(SHORTCUTS_KEY, b"shortcuts = 12".to_vec())
            .await
            .unwrap();
        assert!(load_shortcuts(&store).await.is_empty());
    }

    #[tokio::test]
    async fn documents_round_trip_through_store() {
        let store = MemoryBlobStore::new();
        let buttons = ButtonsDocument {
            buttons: vec![DetectedButton::new(
                "paddle_left",
                "Left paddle",
                ButtonCategory::Other,
            )],
        };
        let shortcuts = ShortcutsDocument {
            shortcuts: vec![ShortcutBinding::new("button_A", 40)
                .with_modifiers(Modifiers::NONE.with(Modifier::Command))],
        };

        store
            .save(BUTTONS_KEY, encode(BUTTONS_KEY, &buttons).unwrap())
            .await
            .unwrap();
        store
            .save(SHORTCUTS_KEY, encode(SHORTCUTS_KEY, &shortcuts).unwrap())
            .await
            .unwrap();

        assert_eq!(load_buttons(&store).await, buttons.buttons);
        assert_eq!(load_shortcuts(&store).await, shortcuts.shortcuts);
    }

    #[tokio::test]
    async fn file_store_writes_one_file_per_key() {
        let dir = std::env::temp_dir().join(format!("padpilot-store-{}", std::process::id()));
        let store = FileBlobStore::new(&dir);

        assert_eq!(store.load(BUTTONS_KEY).await.unwrap(), None);
        store
            .save(BUTTONS_KEY, b"buttons = []\n".to_vec())
            .await
            .unwrap();

        assert!(dir.join("registered_buttons.toml").exists());
        assert_eq!(
            store.load(BUTTONS_KEY).await.unwrap(),
            Some(b"buttons = []\n".to_vec())
        );

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
