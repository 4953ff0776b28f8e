//! Durable session identifiers
//!
//! Two keys per namespace live in a [`SessionStore`]:
//! - `{ns}_paramExplorerSessionId`: the active session id
//! - `{ns}_paramExplorerSessions`: JSON list of every known session id
//!
//! The `{ns}_` prefix is omitted for an empty namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{ExplorerError, ExplorerResult};
use crate::obs;

/// String key/value storage that survives restarts.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> ExplorerResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ExplorerResult<()>;
}

impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    fn get(&self, key: &str) -> ExplorerResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> ExplorerResult<()> {
        (**self).set(key, value)
    }
}

/// Process-local store (testing, or when no session file is configured).
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> ExplorerResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| ExplorerError::Session(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ExplorerResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ExplorerError::Session(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by one JSON object file, rewritten on every `set`.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> ExplorerResult<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> ExplorerResult<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> ExplorerResult<()> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Time + random composite identifier, e.g. `paramexplorer-lx3k2a1b-9f8e7d6`.
pub fn generate_session_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u128;
    let random = to_base36(uuid::Uuid::new_v4().as_u128());
    let suffix: String = random.chars().rev().take(7).collect();
    format!("paramexplorer-{}-{}", to_base36(millis), suffix)
}

/// Resolves and records session ids for one namespace.
pub struct SessionManager {
    store: Box<dyn SessionStore>,
    namespace: String,
}

impl SessionManager {
    pub fn new(store: Box<dyn SessionStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.namespace, name)
        }
    }

    fn id_key(&self) -> String {
        self.key("paramExplorerSessionId")
    }

    fn list_key(&self) -> String {
        self.key("paramExplorerSessions")
    }

    /// Active session id, created and recorded on first use.
    ///
    /// An existing id is never regenerated; it is (re-)added to the list of
    /// known sessions either way.
    pub fn get_session_id(&self) -> ExplorerResult<String> {
        let id = match self.store.get(&self.id_key())? {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = generate_session_id();
                self.store.set(&self.id_key(), &id)?;
                obs::emit_session_created(&self.namespace, &id);
                id
            }
        };
        self.remember(&id)?;
        Ok(id)
    }

    /// Make `id` the active session.
    pub fn set_session_id(&self, id: &str) -> ExplorerResult<()> {
        if id.trim().is_empty() {
            return Err(ExplorerError::Session("session id must not be empty".into()));
        }
        self.store.set(&self.id_key(), id)?;
        self.remember(id)
    }

    /// Create, activate and record a fresh session id.
    pub fn new_session(&self) -> ExplorerResult<String> {
        let id = generate_session_id();
        self.set_session_id(&id)?;
        obs::emit_session_created(&self.namespace, &id);
        Ok(id)
    }

    /// Every session id recorded for this namespace, oldest first.
    pub fn known_sessions(&self) -> ExplorerResult<Vec<String>> {
        let Some(raw) = self.store.get(&self.list_key())? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(ids) => Ok(ids),
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "ignoring corrupt session list");
                Ok(Vec::new())
            }
        }
    }

    fn remember(&self, id: &str) -> ExplorerResult<()> {
        let mut ids = self.known_sessions()?;
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
        self.store
            .set(&self.list_key(), &serde_json::to_string(&ids)?)
    }
}
