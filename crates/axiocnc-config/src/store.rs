//! Dot-path JSON configuration store: single writer, debounced atomic
//! writes, change notification keyed by path prefix.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::time::sleep;
use tracing::{debug, warn};

const WRITE_DEBOUNCE: Duration = Duration::from_millis(250);
const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

/// One dot-path mutation, delivered to subscribers after the write is
/// durable on disk. `value: None` means the path was removed via `unset`.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub path: String,
    pub value: Option<Value>,
}

fn resolve_path(segment: &str, value: &Value) -> Option<Value> {
    let mut parts = segment.splitn(2, '.');
    let head = parts.next()?;
    let rest = parts.next();
    let next = value.as_object()?.get(head)?;
    match rest {
        Some(rest) => resolve_path(rest, next),
        None => Some(next.clone()),
    }
}

fn insert_path(root: &mut Value, path: &str, new_value: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let leaf = parts.pop().expect("path must have at least one segment");
    let mut cursor = root;
    for part in parts {
        if !cursor.is_object() {
            *cursor = Value::Object(serde_json::Map::new());
        }
        let obj = cursor.as_object_mut().expect("just normalized to object");
        cursor = obj
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(serde_json::Map::new());
    }
    cursor
        .as_object_mut()
        .expect("just normalized to object")
        .insert(leaf.to_string(), new_value);
}

fn remove_path(root: &mut Value, path: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let leaf = parts.pop().expect("path must have at least one segment");
    let mut cursor = root;
    for part in parts {
        match cursor.as_object_mut().and_then(|o| o.get_mut(part)) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let Some(obj) = cursor.as_object_mut() {
        obj.remove(leaf);
    }
}

/// Default location resolved via `dirs::config_dir()`, overridable by the
/// caller (e.g. a `--config` CLI flag).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("axiocnc")
        .join("config.json")
}

pub struct ConfigStore {
    path: PathBuf,
    document: RwLock<Value>,
    changes: broadcast::Sender<ConfigChange>,
    write_generation: AtomicU64,
}

impl ConfigStore {
    /// Load the document at `path`, creating an empty one if absent.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let document = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Value::Object(serde_json::Map::new())
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            document: RwLock::new(document),
            changes,
            write_generation: AtomicU64::new(0),
        })
    }

    pub async fn get(&self, path: &str) -> Option<Value> {
        let document = self.document.read().await;
        resolve_path(path, &document)
    }

    pub async fn has(&self, path: &str) -> bool {
        self.get(path).await.is_some()
    }

    pub async fn set(&self, path: &str, value: Value) -> Result<(), ConfigError> {
        {
            let mut document = self.document.write().await;
            insert_path(&mut document, path, value.clone());
        }
        self.schedule_write().await?;
        let _ = self.changes.send(ConfigChange {
            path: path.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    pub async fn unset(&self, path: &str) -> Result<(), ConfigError> {
        {
            let mut document = self.document.write().await;
            remove_path(&mut document, path);
        }
        self.schedule_write().await?;
        let _ = self.changes.send(ConfigChange {
            path: path.to_string(),
            value: None,
        });
        Ok(())
    }

    /// Subscribe to changes. `path_prefix` filters at the call site (the
    /// broadcast carries every change; a receiver ignores ones it doesn't
    /// own), mirroring `axiocnc-core::event::EventDispatcher`.
    pub fn subscribe(&self, path_prefix: impl Into<String>) -> ConfigSubscription {
        ConfigSubscription {
            prefix: path_prefix.into(),
            receiver: self.changes.subscribe(),
        }
    }

    /// Debounced atomic write: callers can call `set`/`unset` rapidly and
    /// only the last state in a 250ms window hits disk. Each call stamps
    /// the write it would perform with a generation number and sleeps;
    /// if a later `set`/`unset` bumped the generation while this one
    /// slept, this call's write has already been superseded and it
    /// returns without touching disk, leaving the newer call's own sleep
    /// to perform the (already-current) write.
    async fn schedule_write(&self) -> Result<(), ConfigError> {
        let generation = self.write_generation.fetch_add(1, Ordering::SeqCst) + 1;
        sleep(WRITE_DEBOUNCE).await;
        if self.write_generation.load(Ordering::SeqCst) != generation {
            return Ok(());
        }
        self.write_through().await
    }

    async fn write_through(&self) -> Result<(), ConfigError> {
        let document = self.document.read().await;
        let content =
            serde_json::to_string_pretty(&*document).expect("Value always serializes");
        drop(document);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::Write {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content.as_bytes())
            .await
            .map_err(|e| ConfigError::Write {
                path: tmp_path.display().to_string(),
                reason: e.to_string(),
            })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| ConfigError::Write {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(path = %self.path.display(), "config store flushed to disk");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A filtered view over [`ConfigStore::subscribe`]'s broadcast channel.
pub struct ConfigSubscription {
    prefix: String,
    receiver: broadcast::Receiver<ConfigChange>,
}

impl ConfigSubscription {
    /// Wait for the next change under this subscription's prefix,
    /// silently skipping ones it doesn't own.
    pub async fn recv(&mut self) -> Option<ConfigChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.path.starts_with(&self.prefix) => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "config subscriber lagged, some changes dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn get_set_round_trip_on_a_nested_path() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).await.unwrap();
        store
            .set("settings.controller.exception.ignoreErrors", Value::Bool(true))
            .await
            .unwrap();
        assert_eq!(
            store.get("settings.controller.exception.ignoreErrors").await,
            Some(Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn has_is_false_for_missing_path() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).await.unwrap();
        assert!(!store.has("no.such.path").await);
    }

    #[tokio::test]
    async fn unset_removes_the_leaf_without_touching_siblings() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).await.unwrap();
        store.set("a.b", Value::from(1)).await.unwrap();
        store.set("a.c", Value::from(2)).await.unwrap();
        store.unset("a.b").await.unwrap();
        assert!(!store.has("a.b").await);
        assert_eq!(store.get("a.c").await, Some(Value::from(2)));
    }

    #[tokio::test]
    async fn unset_on_an_absent_path_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).await.unwrap();
        assert!(store.unset("nothing.here").await.is_ok());
    }

    #[tokio::test]
    async fn reload_after_write_sees_the_persisted_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        {
            let store = ConfigStore::load(&path).await.unwrap();
            store.set("machine.x_limit", Value::from(200.0)).await.unwrap();
        }
        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get("machine.x_limit").await, Some(Value::from(200.0)));
    }

    #[tokio::test]
    async fn rapid_concurrent_sets_converge_on_the_last_value() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).await.unwrap();
        let (a, b, c) = tokio::join!(
            store.set("a", Value::from(1)),
            store.set("a", Value::from(2)),
            store.set("a", Value::from(3)),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(store.get("a").await, Some(Value::from(3)));

        let reloaded = ConfigStore::load(store.path().to_path_buf()).await.unwrap();
        assert_eq!(reloaded.get("a").await, Some(Value::from(3)));
    }

    #[tokio::test]
    async fn subscriber_only_sees_changes_under_its_prefix() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).await.unwrap();
        let mut sub = store.subscribe("machine.");
        store.set("session.token", Value::from("abc")).await.unwrap();
        store.set("machine.x_limit", Value::from(300.0)).await.unwrap();
        let change = sub.recv().await.unwrap();
        assert_eq!(change.path, "machine.x_limit");
    }
}
