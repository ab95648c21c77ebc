//! Registry persisted to a TOML file
//!
//! Keys are stored flat, one quoted key per line:
//!
//! ```toml
//! "/appmgr/Shutdown" = false
//! "/appmgr/calendar/info/PID" = 4242
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::registry::{Registry, RegistryError, RegistryValue, child_dirs, validate_key};

/// Registry backed by a TOML file, written through on every change
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, RegistryValue>>,
}

impl FileRegistry {
    /// Open the registry stored at `path`
    ///
    /// A missing file is treated as an empty registry and is created on the
    /// first write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let entries: BTreeMap<String, RegistryValue> = toml::from_str(&content)?;
            for key in entries.keys() {
                validate_key(key)?;
            }
            tracing::debug!(path = %path.display(), keys = entries.len(), "loaded registry file");
            entries
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, RegistryValue>) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string(entries)?;

        // Readers only ever see a complete file
        let staging = self.path.with_extension("toml.tmp");
        std::fs::write(&staging, content)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl Registry for FileRegistry {
    fn get(&self, key: &str) -> Result<Option<RegistryValue>, RegistryError> {
        validate_key(key)?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: RegistryValue) -> Result<(), RegistryError> {
        validate_key(key)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.persist(&entries) {
            // Keep memory and disk in agreement
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn dirs(&self, dir: &str) -> Result<Vec<String>, RegistryError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(child_dirs(entries.keys(), dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_through_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");

        let registry = FileRegistry::open(&path).unwrap();
        assert!(!path.exists());

        registry.set("/appmgr/calendar/info/PID", 4242.into()).unwrap();
        registry.set("/appmgr/Shutdown", false.into()).unwrap();
        registry.set("/appmgr/calendar/info/Title", "Calendar".into()).unwrap();
        assert!(path.exists());

        let reopened = FileRegistry::open(&path).unwrap();
        assert_eq!(reopened.get_int("/appmgr/calendar/info/PID").unwrap(), Some(4242));
        assert_eq!(reopened.get_bool("/appmgr/Shutdown").unwrap(), Some(false));
        assert_eq!(
            reopened.get_str("/appmgr/calendar/info/Title").unwrap().as_deref(),
            Some("Calendar")
        );
        assert_eq!(
            reopened.dirs("/appmgr").unwrap(),
            vec!["/appmgr/calendar".to_string()]
        );
    }

    #[test]
    fn test_nested_parent_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("appmgr").join("registry.toml");

        let registry = FileRegistry::open(&path).unwrap();
        registry.set("/appmgr/Shutdown", true.into()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_rejects_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        assert!(matches!(
            FileRegistry::open(&path),
            Err(RegistryError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_key_in_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, "\"relative/key\" = 1\n").unwrap();
        assert!(matches!(
            FileRegistry::open(&path),
            Err(RegistryError::InvalidKey(_))
        ));
    }
}
