//! History synchronization for partial navigation.
//!
//! The browser history is an injected capability ([`HistoryApi`]); [`SessionHistory`]
//! is the in-memory implementation used by the headless session and by tests.

use pn_dom::Location;
use tracing::debug;
use tracing::warn;

/// Session history capability.
pub trait HistoryApi {
    fn push_state(&mut self, location: Location);

    fn replace_state(&mut self, location: Location);

    fn location(&self) -> &Location;

    /// Moves `delta` entries through history and returns the popped location,
    /// or `None` when there is no entry in that direction.
    fn go(&mut self, delta: isize) -> Option<Location>;
}

/// Entry list plus cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHistory {
    entries: Vec<Location>,
    index: usize,
}

impl SessionHistory {
    pub fn new(initial: Location) -> Self {
        Self {
            entries: vec![initial],
            index: 0,
        }
    }

    pub fn entries(&self) -> &[Location] {
        &self.entries
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn can_go_back(&self) -> bool {
        self.index > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn go_back(&mut self) -> Option<Location> {
        self.go(-1)
    }

    pub fn go_forward(&mut self) -> Option<Location> {
        self.go(1)
    }
}

impl HistoryApi for SessionHistory {
    fn push_state(&mut self, location: Location) {
        self.entries.truncate(self.index + 1);
        self.entries.push(location);
        self.index = self.entries.len() - 1;
    }

    fn replace_state(&mut self, location: Location) {
        self.entries[self.index] = location;
    }

    fn location(&self) -> &Location {
        &self.entries[self.index]
    }

    fn go(&mut self, delta: isize) -> Option<Location> {
        let target = self.index.checked_add_signed(delta)?;
        let location = self.entries.get(target)?.clone();
        self.index = target;
        Some(location)
    }
}

/// What to do after the user traversed history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopStateAction {
    /// Fetch this path as a fragment without pushing a new entry.
    Navigate(String),
    /// Same path as the one on screen, e.g. a hash-only change.
    Ignore,
}

/// Keeps history entries consistent with the fragments on screen.
#[derive(Debug)]
pub struct HistorySynchronizer<H> {
    history: H,
}

impl<H: HistoryApi> HistorySynchronizer<H> {
    pub fn new(history: H) -> Self {
        Self { history }
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut H {
        &mut self.history
    }

    pub fn location(&self) -> &Location {
        self.history.location()
    }

    /// Applies the page's visible-URL override and returns the anchor to scroll to.
    pub fn record_initial_location(&mut self, visible_url: Option<&str>) -> Option<String> {
        if let Some(visible_url) = visible_url {
            match self.history.location().resolve(visible_url) {
                Ok(location) => {
                    debug!(target: "partialnav::history", url = %location.href(), "replacing initial entry with visible url");
                    self.history.replace_state(location);
                }
                Err(error) => {
                    warn!(target: "partialnav::history", %error, "ignoring unusable visible url");
                }
            }
        }

        self.history.location().hash.clone()
    }

    /// Pushes `location` when `should_push`; otherwise history is left untouched.
    pub fn push_or_replace(&mut self, location: Location, should_push: bool) {
        if should_push {
            self.history.push_state(location);
        }
    }

    /// Path-only comparison against the last path a navigation recorded.
    pub fn on_pop_state(&self, popped: &Location, last_path: &str) -> PopStateAction {
        if popped.path == last_path {
            PopStateAction::Ignore
        } else {
            PopStateAction::Navigate(popped.path.clone())
        }
    }

    /// Records `#hash` on the current entry without navigating.
    pub fn push_hash(&mut self, hash: &str) {
        let location = self.history.location().with_hash(Some(hash));
        self.history.push_state(location);
    }
}
