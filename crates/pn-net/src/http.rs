//! Fragment request/response messages.

use encoding_rs::Encoding;
use encoding_rs::UTF_8;
use pn_core::NavError;
use pn_core::NavResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Single HTTP header with validated wire-safe name/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> NavResult<Self> {
        if name.is_empty() || !name.bytes().all(is_token_char) {
            return Err(NavError::new(
                "net.http.header_name_invalid",
                format!("invalid HTTP header name `{name}`"),
            ));
        }

        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(NavError::new(
                "net.http.header_value_invalid",
                format!("invalid characters found in HTTP header `{name}`"),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Origin-relative request for a page fragment or an API resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRequest {
    pub method: Method,
    /// Path and query, already carrying any partial markers.
    pub target: String,
    pub headers: Vec<Header>,
    pub body: Option<String>,
}

impl FragmentRequest {
    pub fn get(target: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            target: target.into(),
            headers: vec![no_cache()],
            body: None,
        }
    }

    /// POST with an `application/x-www-form-urlencoded` body.
    pub fn post_form(target: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            target: target.into(),
            headers: vec![
                no_cache(),
                Header {
                    name: "Content-Type".to_owned(),
                    value: "application/x-www-form-urlencoded".to_owned(),
                },
            ],
            body: Some(body.into()),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> NavResult<Self> {
        self.headers.push(Header::new(name, value)?);
        Ok(self)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn no_cache() -> Header {
    Header {
        name: "Cache-Control".to_owned(),
        value: "no-cache".to_owned(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentResponse {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl FragmentResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Decodes the body using the charset named by `Content-Type`, UTF-8 otherwise.
    pub fn text(&self) -> String {
        let encoding = self
            .header("content-type")
            .and_then(charset_label)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let (decoded, _, _) = encoding.decode(&self.body);
        decoded.into_owned()
    }
}

fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|parameter| {
        let (name, value) = parameter.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Some(value.trim().trim_matches('"').to_owned())
    })
}

pub(crate) fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}
