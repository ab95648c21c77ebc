//! Configuration-registry collaborator
//!
//! Per-application metadata (process id, application id, instance counter,
//! visibility, priority) and the system shutdown flag live in a hierarchical
//! key/value store. Keys are slash-separated paths such as
//! `/appmgr/calendar/info/PID`.

mod file;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

pub use file::FileRegistry;

/// Errors reported by a registry backend
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse registry file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize registry: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("key {key} holds a {found}, expected a {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid registry key {0:?}")]
    InvalidKey(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// A value stored under a registry key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryValue {
    Bool(bool),
    Int(i32),
    Str(String),
}

impl RegistryValue {
    fn type_name(&self) -> &'static str {
        match self {
            RegistryValue::Bool(_) => "bool",
            RegistryValue::Int(_) => "int",
            RegistryValue::Str(_) => "string",
        }
    }
}

impl fmt::Display for RegistryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryValue::Bool(v) => write!(f, "{v}"),
            RegistryValue::Int(v) => write!(f, "{v}"),
            RegistryValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for RegistryValue {
    fn from(v: bool) -> Self {
        RegistryValue::Bool(v)
    }
}

impl From<i32> for RegistryValue {
    fn from(v: i32) -> Self {
        RegistryValue::Int(v)
    }
}

impl From<&str> for RegistryValue {
    fn from(v: &str) -> Self {
        RegistryValue::Str(v.to_string())
    }
}

/// Hierarchical key/value store
///
/// Implementations must be usable from several sessions at once.
pub trait Registry: Send + Sync {
    /// Read a key, `None` when it has never been written
    fn get(&self, key: &str) -> Result<Option<RegistryValue>, RegistryError>;

    /// Write a key, creating parent directories implicitly
    fn set(&self, key: &str, value: RegistryValue) -> Result<(), RegistryError>;

    /// Full paths of the immediate sub-directories of `dir`
    fn dirs(&self, dir: &str) -> Result<Vec<String>, RegistryError>;

    fn get_int(&self, key: &str) -> Result<Option<i32>, RegistryError> {
        match self.get(key)? {
            None => Ok(None),
            Some(RegistryValue::Int(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(key, "int", &other)),
        }
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, RegistryError> {
        match self.get(key)? {
            None => Ok(None),
            Some(RegistryValue::Bool(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(key, "bool", &other)),
        }
    }

    fn get_str(&self, key: &str) -> Result<Option<String>, RegistryError> {
        match self.get(key)? {
            None => Ok(None),
            Some(RegistryValue::Str(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(key, "string", &other)),
        }
    }
}

fn mismatch(key: &str, expected: &'static str, found: &RegistryValue) -> RegistryError {
    RegistryError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// Check that a key is an absolute, non-empty slash path
pub(crate) fn validate_key(key: &str) -> Result<(), RegistryError> {
    let valid = key.starts_with('/')
        && key.len() > 1
        && !key.ends_with('/')
        && key[1..].split('/').all(|segment| !segment.is_empty());
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidKey(key.to_string()))
    }
}

/// Immediate sub-directories of `dir` among `keys`
pub(crate) fn child_dirs<'a>(keys: impl Iterator<Item = &'a String>, dir: &str) -> Vec<String> {
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    let mut found: Vec<String> = keys
        .filter_map(|key| {
            let rest = key.strip_prefix(&prefix)?;
            let (child, _) = rest.split_once('/')?;
            Some(format!("{prefix}{child}"))
        })
        .collect();
    found.dedup();
    found
}

/// Where each piece of application metadata is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLayout {
    /// Root of the per-application directories
    pub app_root: String,
    /// Root of the per-application-id info directories
    pub app_info_root: String,
    /// Key of the system shutdown flag
    pub shutdown_key: String,
}

impl Default for RegistryLayout {
    fn default() -> Self {
        Self {
            app_root: "/appmgr".to_string(),
            app_info_root: "/LiMo/System/AppInfo".to_string(),
            shutdown_key: "/appmgr/Shutdown".to_string(),
        }
    }
}

impl RegistryLayout {
    pub fn app_dir(&self, application: &str) -> String {
        format!("{}/{application}", self.app_root)
    }

    pub fn pid_key(&self, application: &str) -> String {
        format!("{}/{application}/info/PID", self.app_root)
    }

    pub fn app_id_key(&self, application: &str) -> String {
        format!("{}/{application}/info/AppID", self.app_root)
    }

    pub fn visibility_key(&self, application: &str) -> String {
        format!("{}/{application}/info/Visibility", self.app_root)
    }

    pub fn priority_key(&self, application: &str) -> String {
        format!("{}/{application}/info/Priority", self.app_root)
    }

    pub fn last_instance_key(&self, application: &str) -> String {
        format!("{}/{application}/LastInstId", self.app_root)
    }

    /// Highest instance id taken by a registered session
    pub fn claimed_instance_key(&self, application: &str) -> String {
        format!("{}/{application}/ClaimedInstId", self.app_root)
    }

    pub fn multi_instance_key(&self, application_id: i32) -> String {
        format!("{}/{application_id}/AppMultiInstance", self.app_info_root)
    }
}

/// Registry held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: RwLock<BTreeMap<String, RegistryValue>>,
    offline: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key, for tests and fixtures
    pub fn with(self, key: &str, value: impl Into<RegistryValue>) -> Self {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.into());
        self
    }

    /// Make every read and write fail with [`RegistryError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), RegistryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("registry is offline".to_string()));
        }
        Ok(())
    }
}

impl Registry for MemoryRegistry {
    fn get(&self, key: &str) -> Result<Option<RegistryValue>, RegistryError> {
        self.check_online()?;
        validate_key(key)?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: RegistryValue) -> Result<(), RegistryError> {
        self.check_online()?;
        validate_key(key)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn dirs(&self, dir: &str) -> Result<Vec<String>, RegistryError> {
        self.check_online()?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(child_dirs(entries.keys(), dir))
    }
}
