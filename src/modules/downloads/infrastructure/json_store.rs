use crate::modules::downloads::domain::ports::DurableStore;
use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_info};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Key-value store kept in memory and saved as one JSON document
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<Map<String, JsonValue>>,
}

impl JsonFileStore {
    /// Open the store at `path`; a missing file starts empty
    pub async fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => match serde_json::from_str::<JsonValue>(&text)? {
                JsonValue::Object(map) => map,
                other => {
                    return Err(AppError::StorageError(format!(
                        "{:?} holds {} instead of an object",
                        path,
                        kind_of(&other)
                    )))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log_debug!("No store at {:?}, starting empty", path);
                Map::new()
            }
            Err(e) => return Err(e.into()),
        };

        log_info!("Opened store {:?} with {} keys", path, entries.len());
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn get(&self, key: &str) -> AppResult<Option<JsonValue>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: JsonValue) -> AppResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn save(&self) -> AppResult<()> {
        let body = {
            let entries = self.entries.read().await;
            serde_json::to_string_pretty(&*entries)?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so a crash never leaves a truncated document.
        let temp = self.temp_path();
        tokio::fs::write(&temp, body)
            .await
            .map_err(|e| AppError::StorageError(format!("write {:?}: {}", temp, e)))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| AppError::StorageError(format!("rename to {:?}: {}", self.path, e)))?;

        log_debug!("Saved store {:?}", self.path);
        Ok(())
    }
}
