//! Client-set cookies sent back on every request.

use pn_core::NavError;
use pn_core::NavResult;
use std::collections::BTreeMap;

/// Ten-year lifetime used for preference cookies.
pub const LONG_LIVED_MAX_AGE: u64 = 3_153_600_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<u64>,
    pub path: String,
}

impl Cookie {
    /// Preference cookie with the long max-age on path `/`.
    pub fn long_lived(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: value.to_owned(),
            max_age: Some(LONG_LIVED_MAX_AGE),
            path: "/".to_owned(),
        }
    }

    /// Parses a `document.cookie`-style assignment: `name=value; max-age=N; path=/`.
    pub fn parse(input: &str) -> NavResult<Self> {
        let mut parts = input.split(';');
        let pair = parts.next().unwrap_or_default();
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            NavError::new(
                "storage.cookie_invalid",
                format!("cookie `{input}` is missing `name=value`"),
            )
        })?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(NavError::new(
                "storage.cookie_invalid",
                format!("cookie name `{name}` is not valid"),
            ));
        }

        let mut cookie = Self {
            name: name.to_owned(),
            value: value.trim().to_owned(),
            max_age: None,
            path: "/".to_owned(),
        };

        for attribute in parts {
            let (key, value) = attribute.split_once('=').unwrap_or((attribute, ""));
            match key.trim().to_ascii_lowercase().as_str() {
                "max-age" => {
                    cookie.max_age = Some(value.trim().parse::<u64>().map_err(|error| {
                        NavError::new(
                            "storage.cookie_invalid",
                            format!("invalid max-age `{}`: {error}", value.trim()),
                        )
                    })?);
                }
                "path" => cookie.path = value.trim().to_owned(),
                _ => {}
            }
        }

        Ok(cookie)
    }

    pub fn serialize(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; max-age={max_age}"));
        }
        out.push_str(&format!("; path={}", self.path));
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, Cookie>,
}

impl CookieJar {
    /// Stores `cookie`; a zero max-age deletes it.
    pub fn set(&mut self, cookie: Cookie) {
        if cookie.max_age == Some(0) {
            self.cookies.remove(&cookie.name);
            return;
        }
        self.cookies.insert(cookie.name.clone(), cookie);
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|cookie| cookie.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.values()
    }

    /// Value for the `Cookie` request header for `path`, if any cookie applies.
    pub fn header_value(&self, path: &str) -> Option<String> {
        let pairs: Vec<String> = self
            .cookies
            .values()
            .filter(|cookie| path.starts_with(&cookie.path))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}
