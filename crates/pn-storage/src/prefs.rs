//! Sidebar and theme preferences.

use crate::StorageManager;
use crate::cookie::Cookie;
use crate::cookie::CookieJar;
use pn_core::NavResult;
use tracing::debug;

const COOKIE_PARTITION: &str = "cookies";
const LOCAL_PARTITION: &str = "local";
const SIDEBAR_COLLAPSED: &str = "sidebar_collapsed";
const LIGHT_THEME: &str = "light_theme";

/// Preference cookies plus their local-store mirror.
///
/// Without a persistent root every write stays in memory for the session.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    storage: StorageManager,
    cookies: CookieJar,
}

impl Preferences {
    pub fn load(storage: StorageManager) -> NavResult<Self> {
        let mut cookies = CookieJar::default();
        if storage.is_persistent() {
            for (_, serialized) in storage.load_partition(COOKIE_PARTITION)? {
                cookies.set(Cookie::parse(&serialized)?);
            }
        }
        debug!(target: "partialnav::storage", persistent = storage.is_persistent(), "preferences loaded");
        Ok(Self { storage, cookies })
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn cookie_header(&self, path: &str) -> Option<String> {
        self.cookies.header_value(path)
    }

    pub fn sidebar_collapsed(&self) -> bool {
        self.cookies.value(SIDEBAR_COLLAPSED) == Some("true")
    }

    pub fn set_sidebar_collapsed(&mut self, collapsed: bool) -> NavResult<()> {
        self.set_flag(SIDEBAR_COLLAPSED, collapsed)
    }

    pub fn light_theme(&self) -> bool {
        self.cookies.value(LIGHT_THEME) == Some("true")
    }

    pub fn set_light_theme(&mut self, light: bool) -> NavResult<()> {
        self.set_flag(LIGHT_THEME, light)
    }

    /// Local-store mirror of the sidebar state, when persisted.
    pub fn stored_sidebar_collapsed(&self) -> NavResult<Option<bool>> {
        self.stored_flag(SIDEBAR_COLLAPSED)
    }

    pub fn stored_light_theme(&self) -> NavResult<Option<bool>> {
        self.stored_flag(LIGHT_THEME)
    }

    /// Cookie plus local-store mirror.
    fn set_flag(&mut self, name: &str, enabled: bool) -> NavResult<()> {
        let value = bool_text(enabled);
        if self.storage.is_persistent() {
            self.storage.set_value(LOCAL_PARTITION, name, value)?;
        }
        self.set_cookie(Cookie::long_lived(name, value))
    }

    fn stored_flag(&self, name: &str) -> NavResult<Option<bool>> {
        if !self.storage.is_persistent() {
            return Ok(None);
        }
        Ok(self
            .storage
            .get_value(LOCAL_PARTITION, name)?
            .map(|value| value == "true"))
    }

    fn set_cookie(&mut self, cookie: Cookie) -> NavResult<()> {
        if self.storage.is_persistent() {
            self.storage
                .set_value(COOKIE_PARTITION, &cookie.name, &cookie.serialize())?;
        }
        debug!(target: "partialnav::storage", cookie = %cookie.serialize(), "cookie set");
        self.cookies.set(cookie);
        Ok(())
    }
}

fn bool_text(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[cfg(test)]
mod tests {
    use super::Preferences;
    use crate::StorageConfig;
    use crate::StorageManager;
    use crate::temp_storage_root;

    #[test]
    fn preferences_survive_reload_from_disk() {
        let root = temp_storage_root("prefs");
        let storage = StorageManager::new(StorageConfig::default()).with_persistent_root(root.clone());

        let mut prefs = match Preferences::load(storage.clone()) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(!prefs.sidebar_collapsed());
        assert!(prefs.set_sidebar_collapsed(true).is_ok());
        assert!(prefs.set_light_theme(true).is_ok());

        let reloaded = match Preferences::load(storage) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(reloaded.sidebar_collapsed());
        assert!(reloaded.light_theme());
        assert_eq!(reloaded.stored_sidebar_collapsed(), Ok(Some(true)));
        assert_eq!(reloaded.stored_light_theme(), Ok(Some(true)));
        assert_eq!(
            reloaded.cookie_header("/"),
            Some("light_theme=true; sidebar_collapsed=true".to_owned())
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn in_memory_preferences_still_produce_cookies() {
        let mut prefs = Preferences::default();
        assert!(prefs.set_light_theme(false).is_ok());
        assert!(!prefs.light_theme());
        assert_eq!(prefs.cookie_header("/"), Some("light_theme=false".to_owned()));
        assert_eq!(prefs.stored_sidebar_collapsed(), Ok(None));
        assert_eq!(prefs.stored_light_theme(), Ok(None));
    }
}
