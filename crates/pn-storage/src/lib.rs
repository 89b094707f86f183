//! Persisted client state: a cookie jar and a local key/value store.

mod cookie;
mod prefs;

pub use cookie::Cookie;
pub use cookie::CookieJar;
pub use prefs::Preferences;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use pn_core::NavError;
use pn_core::NavResult;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub ephemeral_mode: bool,
}

/// Named string maps, one JSON object file per partition under the persistent root.
#[derive(Debug, Clone, Default)]
pub struct StorageManager {
    pub config: StorageConfig,
    root: Option<PathBuf>,
}

impl StorageManager {
    pub fn new(config: StorageConfig) -> Self {
        Self { config, root: None }
    }

    pub fn with_persistent_root(mut self, root: PathBuf) -> Self {
        self.root = Some(root);
        self
    }

    /// True when writes reach disk.
    pub fn is_persistent(&self) -> bool {
        !self.config.ephemeral_mode && self.root.is_some()
    }

    pub fn set_value(&self, partition: &str, key: &str, value: &str) -> NavResult<()> {
        let file = self.partition_file(partition)?;
        let mut entries = read_entries(&file)?;
        if entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        entries.insert(key.to_owned(), value.to_owned());
        write_entries(&file, &entries)
    }

    pub fn get_value(&self, partition: &str, key: &str) -> NavResult<Option<String>> {
        let mut entries = read_entries(&self.partition_file(partition)?)?;
        Ok(entries.remove(key))
    }

    pub fn load_partition(&self, partition: &str) -> NavResult<BTreeMap<String, String>> {
        read_entries(&self.partition_file(partition)?)
    }

    fn partition_file(&self, partition: &str) -> NavResult<PathBuf> {
        if self.config.ephemeral_mode {
            return Err(NavError::new(
                "storage.persistence_disabled",
                "persistent storage is disabled in ephemeral mode",
            ));
        }
        let Some(root) = &self.root else {
            return Err(NavError::new(
                "storage.persistence_unconfigured",
                "no storage root configured",
            ));
        };

        let valid = !partition.is_empty()
            && partition
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
        if !valid {
            return Err(NavError::new(
                "storage.partition_name_invalid",
                format!("`{partition}` is not a valid partition name"),
            ));
        }
        Ok(root.join(format!("{partition}.json")))
    }
}

fn read_entries(file: &Path) -> NavResult<BTreeMap<String, String>> {
    let content = match fs::read_to_string(file) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(error) => {
            return Err(NavError::new(
                "storage.read_failed",
                format!("reading `{}`: {error}", file.display()),
            ));
        }
    };

    serde_json::from_str(&content).map_err(|error| {
        NavError::new(
            "storage.format_invalid",
            format!("`{}` is not a string map: {error}", file.display()),
        )
    })
}

/// Writes next to the target and renames, so readers never see half a file.
fn write_entries(file: &Path, entries: &BTreeMap<String, String>) -> NavResult<()> {
    let write_failed = |error: std::io::Error| {
        NavError::new(
            "storage.write_failed",
            format!("writing `{}`: {error}", file.display()),
        )
    };

    if let Some(dir) = file.parent() {
        fs::create_dir_all(dir).map_err(write_failed)?;
    }
    let encoded = serde_json::to_string_pretty(entries).map_err(|error| {
        NavError::new("storage.encode_failed", format!("encoding entries: {error}"))
    })?;

    let staging = file.with_extension("json.tmp");
    fs::write(&staging, encoded).map_err(write_failed)?;
    fs::rename(&staging, file).map_err(write_failed)?;
    debug!(target: "partialnav::storage", file = %file.display(), entries = entries.len(), "partition written");
    Ok(())
}

#[cfg(test)]
pub(crate) fn temp_storage_root(tag: &str) -> PathBuf {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("partialnav-storage-{tag}-{stamp}"))
}
