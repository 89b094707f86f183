//! Address-bar location of the dashboard page.

use pn_core::NavError;
use pn_core::NavResult;
use url::Url;

const LOCATION_BASE: &str = "http://partialnav.invalid/";

/// Origin-relative location: path, optional query, optional hash (without `#`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub query: Option<String>,
    pub hash: Option<String>,
}

impl Location {
    pub fn root() -> Self {
        Self {
            path: "/".to_owned(),
            query: None,
            hash: None,
        }
    }

    /// Parses an origin-relative href such as `/settings/roles?x=1#top`.
    pub fn parse(href: &str) -> NavResult<Self> {
        let base = base_url()?;
        Self::from_url(&join(&base, href)?)
    }

    /// Resolves `href` against this location the way a browser resolves a link.
    pub fn resolve(&self, href: &str) -> NavResult<Self> {
        let base = join(&base_url()?, &self.path_and_query())?;
        Self::from_url(&join(&base, href)?)
    }

    fn from_url(url: &Url) -> NavResult<Self> {
        if url.host_str() != base_url()?.host_str() {
            return Err(NavError::new(
                "dom.location_cross_origin",
                format!("`{url}` does not stay on the dashboard origin"),
            ));
        }

        Ok(Self {
            path: url.path().to_owned(),
            query: url.query().filter(|query| !query.is_empty()).map(str::to_owned),
            hash: url
                .fragment()
                .filter(|fragment| !fragment.is_empty())
                .map(str::to_owned),
        })
    }

    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    pub fn href(&self) -> String {
        match &self.hash {
            Some(hash) => format!("{}#{hash}", self.path_and_query()),
            None => self.path_and_query(),
        }
    }

    pub fn with_hash(&self, hash: Option<&str>) -> Self {
        Self {
            hash: hash
                .map(|hash| hash.trim_start_matches('#'))
                .filter(|hash| !hash.is_empty())
                .map(str::to_owned),
            ..self.clone()
        }
    }
}

fn base_url() -> NavResult<Url> {
    Url::parse(LOCATION_BASE).map_err(|error| {
        NavError::new(
            "dom.location_base_invalid",
            format!("failed to parse location base: {error}"),
        )
    })
}

fn join(base: &Url, href: &str) -> NavResult<Url> {
    base.join(href).map_err(|error| {
        NavError::new(
            "dom.location_invalid",
            format!("failed to resolve `{href}`: {error}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::Location;

    fn location(href: &str) -> Location {
        match Location::parse(href) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn parses_path_query_and_hash() {
        let parsed = location("/manage/123/settings?tab=2#roles");
        assert_eq!(parsed.path, "/manage/123/settings");
        assert_eq!(parsed.query.as_deref(), Some("tab=2"));
        assert_eq!(parsed.hash.as_deref(), Some("roles"));
        assert_eq!(parsed.href(), "/manage/123/settings?tab=2#roles");
    }

    #[test]
    fn resolves_relative_hrefs_against_current_path() {
        let current = location("/manage/123/settings?tab=2");
        let query_only = current.resolve("?tab=3");
        assert_eq!(
            query_only.map(|value| value.path_and_query()),
            Ok("/manage/123/settings?tab=3".to_owned())
        );

        let sibling = current.resolve("roles");
        assert_eq!(
            sibling.map(|value| value.path),
            Ok("/manage/123/roles".to_owned())
        );
    }

    #[test]
    fn rejects_cross_origin_targets() {
        let parsed = Location::parse("https://elsewhere.example/login");
        assert!(parsed.is_err());
        if let Err(error) = parsed {
            assert_eq!(error.code, "dom.location_cross_origin");
        }
    }
}
