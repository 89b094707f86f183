//! Shared primitives used across partialnav crates.

use core::fmt;

/// Result alias used across the workspace.
pub type NavResult<T> = Result<T, NavError>;

/// Error carried across component boundaries.
///
/// `code` is a stable dotted identifier (`net.http.write_failed`) that callers and
/// tests match on; `message` is free-form context for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavError {
    pub code: &'static str,
    pub message: String,
}

impl NavError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True when the error belongs to the given dotted namespace, e.g. `"net"`.
    pub fn is_in(&self, namespace: &str) -> bool {
        self.code == namespace
            || self
                .code
                .strip_prefix(namespace)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for NavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for NavError {}

/// Milliseconds since an arbitrary but fixed epoch.
pub type Millis = u64;

/// Time source injected into components with freshness rules.
pub trait Clock {
    fn now_millis(&self) -> Millis;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Millis {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

/// Hand-advanced clock for deterministic tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: std::cell::Cell<Millis>,
}

#[cfg(any(test, feature = "test-support"))]
impl ManualClock {
    pub fn starting_at(now: Millis) -> Self {
        Self {
            now: std::cell::Cell::new(now),
        }
    }

    pub fn advance(&self, by: Millis) {
        self.now.set(self.now.get().saturating_add(by));
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Clock for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.get()
    }
}
