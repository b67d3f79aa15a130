// ── Persisted state ──
//
// Key-value contract for whatever storage the embedding application has.
// The core only reads and writes the `session` key; everything else in the
// store belongs to the application.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dconnect_api::{DEFAULT_PORT, HostConfig, ScopeSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Key under which sessions are saved.
pub const SESSION_KEY: &str = "session";

/// What survives a restart for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub scopes: ScopeSet,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl PersistedSession {
    pub fn host_config(&self) -> HostConfig {
        HostConfig::new(self.host.clone())
            .with_port(self.port)
            .with_ssl(self.ssl)
    }
}

/// Get/set-by-key storage of JSON values.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), CoreError>;
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

// ── MemoryStore ──────────────────────────────────────────────────────

/// In-process store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        self.entries.lock().insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

// ── JsonFileStore ────────────────────────────────────────────────────

/// A single JSON object on disk, one member per key.
///
/// Writes go to a sibling temp file first and are renamed into place.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, CoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(io_error(&self.path, &e)),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CoreError::Config {
                message: format!("{} does not contain a JSON object", self.path.display()),
            }),
            Err(e) => Err(CoreError::Config {
                message: format!("{}: {e}", self.path.display()),
            }),
        }
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(parent, &e))?;
            }
        }
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| CoreError::Internal(format!("serialize store: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_error(&tmp, &e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, &e))
    }

    fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_all()?;
        f(&mut map);
        self.write_all(&map)
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> CoreError {
    CoreError::Config {
        message: format!("{}: {err}", path.display()),
    }
}

impl SessionStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        self.update(|map| {
            map.insert(key.to_owned(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.update(|map| {
            map.remove(key);
        })
    }
}

// ── Session (de)serialization ────────────────────────────────────────

/// Read the saved session list. A missing key yields an empty list.
pub fn load_sessions(store: &dyn SessionStore) -> Result<Vec<PersistedSession>, CoreError> {
    match store.get(SESSION_KEY)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value).map_err(|e| CoreError::Config {
            message: format!("invalid persisted sessions: {e}"),
        }),
    }
}

pub fn save_sessions(
    store: &dyn SessionStore,
    sessions: &[PersistedSession],
) -> Result<(), CoreError> {
    let value = serde_json::to_value(sessions)
        .map_err(|e| CoreError::Internal(format!("serialize sessions: {e}")))?;
    store.set(SESSION_KEY, value)
}
