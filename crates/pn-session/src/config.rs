use std::path::PathBuf;

use pn_core::NavError;
use pn_core::NavResult;
use pn_net::Origin;
use pn_storage::StorageConfig;
use pn_storage::StorageManager;

pub const ORIGIN_VAR: &str = "PARTIALNAV_ORIGIN";
pub const GUILD_VAR: &str = "PARTIALNAV_GUILD";
pub const STORAGE_DIR_VAR: &str = "PARTIALNAV_STORAGE_DIR";
pub const ANALYTICS_VAR: &str = "PARTIALNAV_ANALYTICS";

const DEFAULT_ORIGIN: &str = "http://localhost:5000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Dashboard origin every request is sent to.
    pub origin: String,
    /// Guild whose channel permissions are probed.
    pub guild_id: String,
    /// Where preference cookies are persisted; in-memory when unset.
    pub storage_root: Option<PathBuf>,
    pub analytics: bool,
    pub ephemeral: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_owned(),
            guild_id: String::new(),
            storage_root: None,
            analytics: false,
            ephemeral: false,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> NavResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from `lookup`, falling back to defaults for unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> NavResult<Self> {
        let mut config = Self::default();
        if let Some(origin) = lookup(ORIGIN_VAR).filter(|value| !value.is_empty()) {
            config.origin = origin;
        }
        if let Some(guild) = lookup(GUILD_VAR) {
            config.guild_id = guild;
        }
        if let Some(root) = lookup(STORAGE_DIR_VAR).filter(|value| !value.is_empty()) {
            config.storage_root = Some(PathBuf::from(root));
        }
        if let Some(flag) = lookup(ANALYTICS_VAR) {
            config.analytics = parse_flag(ANALYTICS_VAR, &flag)?;
        }
        Ok(config)
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = guild_id.into();
        self
    }

    pub fn with_storage_root(mut self, root: PathBuf) -> Self {
        self.storage_root = Some(root);
        self
    }

    pub fn with_analytics(mut self, analytics: bool) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub fn parsed_origin(&self) -> NavResult<Origin> {
        Origin::parse(&self.origin)
    }

    pub fn storage(&self) -> StorageManager {
        let storage = StorageManager::new(StorageConfig {
            ephemeral_mode: self.ephemeral,
        });
        match &self.storage_root {
            Some(root) => storage.with_persistent_root(root.clone()),
            None => storage,
        }
    }
}

fn parse_flag(name: &str, value: &str) -> NavResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(NavError::new(
            "config.flag_invalid",
            format!("{name} must be a boolean, got `{other}`"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::ANALYTICS_VAR;
    use super::GUILD_VAR;
    use super::ORIGIN_VAR;
    use super::STORAGE_DIR_VAR;
    use super::SessionConfig;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = match SessionConfig::from_lookup(lookup(&[])) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(config, SessionConfig::default());
        assert!(!config.storage().is_persistent());
    }

    #[test]
    fn environment_overrides_every_field() {
        let config = match SessionConfig::from_lookup(lookup(&[
            (ORIGIN_VAR, "https://dash.example.com"),
            (GUILD_VAR, "1234"),
            (STORAGE_DIR_VAR, "/tmp/partialnav"),
            (ANALYTICS_VAR, "TRUE"),
        ])) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(config.origin, "https://dash.example.com");
        assert_eq!(config.guild_id, "1234");
        assert_eq!(config.storage_root, Some(PathBuf::from("/tmp/partialnav")));
        assert!(config.analytics);
        assert!(config.storage().is_persistent());
        assert!(config.parsed_origin().is_ok());
    }

    #[test]
    fn malformed_flag_is_rejected() {
        let result = SessionConfig::from_lookup(lookup(&[(ANALYTICS_VAR, "sometimes")]));
        assert!(result.is_err());
        if let Err(error) = result {
            assert_eq!(error.code, "config.flag_invalid");
        }
    }

    #[test]
    fn ephemeral_mode_disables_persistence() {
        let config = SessionConfig::default()
            .with_storage_root(PathBuf::from("/tmp/partialnav"))
            .with_ephemeral(true);
        assert!(!config.storage().is_persistent());
    }
}
