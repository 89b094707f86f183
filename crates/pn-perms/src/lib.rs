//! Per-channel bot permission probes with a short-lived cache.
//!
//! One fetch per channel is outstanding at a time. Controls that ask while it is
//! in flight are parked as waiters and all resolved by the same completion.

use std::collections::HashMap;

use pn_core::Millis;
use pn_core::NavError;
use pn_core::NavResult;
use pn_dom::ControlId;
use pn_dom::ProbeRequirement;
use pn_dom::StatusLine;
use pn_dom::StatusTone;
use pn_net::FragmentResponse;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;

/// Cached bitmasks older than this are fetched again.
pub const PERMISSION_TTL_MS: Millis = 5_000;

pub const CHECKING_TEXT: &str = "Checking channel permissions for bot...";
pub const GENERIC_FAILURE_TEXT: &str = "Couldn't check permissions :(";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub bit: u64,
    pub name: &'static str,
}

pub const READ_MESSAGES: Permission = Permission {
    bit: 0x400,
    name: "Read Messages",
};
pub const SEND_MESSAGES: Permission = Permission {
    bit: 0x800,
    name: "Send Messages",
};
pub const EMBED_LINKS: Permission = Permission {
    bit: 0x4000,
    name: "Embed Links",
};

pub fn required_permissions(requirement: ProbeRequirement) -> &'static [Permission] {
    match requirement {
        ProbeRequirement::Send => &[READ_MESSAGES, SEND_MESSAGES],
        ProbeRequirement::Embed => &[READ_MESSAGES, SEND_MESSAGES, EMBED_LINKS],
    }
}

/// What a status line shows for one control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Cleared,
    Checking,
    Satisfied,
    Missing(Vec<&'static str>),
    Failed(String),
}

impl ProbeStatus {
    pub fn text(&self) -> String {
        match self {
            Self::Cleared | Self::Satisfied => String::new(),
            Self::Checking => CHECKING_TEXT.to_owned(),
            Self::Missing(names) => format!("Missing {}", names.join(", ")),
            Self::Failed(message) => message.clone(),
        }
    }

    pub fn status_line(&self) -> StatusLine {
        let tone = match self {
            Self::Cleared => StatusTone::Neutral,
            Self::Checking => StatusTone::Checking,
            Self::Satisfied => StatusTone::Satisfied,
            Self::Missing(_) => StatusTone::Missing,
            Self::Failed(_) => StatusTone::Failed,
        };
        StatusLine {
            tone,
            text: self.text(),
        }
    }
}

/// Tests every required permission against `bitmask`.
pub fn evaluate(bitmask: u64, requirement: ProbeRequirement) -> ProbeStatus {
    let missing: Vec<&'static str> = required_permissions(requirement)
        .iter()
        .filter(|permission| bitmask & permission.bit != permission.bit)
        .map(|permission| permission.name)
        .collect();

    if missing.is_empty() {
        ProbeStatus::Satisfied
    } else {
        ProbeStatus::Missing(missing)
    }
}

/// Result of [`PermissionCache::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeAction {
    /// Nothing selected; the status text is cleared.
    Cleared,
    /// Caller must GET `path` and hand the outcome to [`PermissionCache::resolve`].
    Fetch { path: String },
    /// A fetch for the channel is already in flight; the control was parked.
    Wait,
    /// Answered from a fresh cache entry.
    Resolved(ProbeStatus),
}

impl ProbeAction {
    /// Status to show right away.
    pub fn immediate_status(&self) -> ProbeStatus {
        match self {
            Self::Cleared => ProbeStatus::Cleared,
            Self::Fetch { .. } | Self::Wait => ProbeStatus::Checking,
            Self::Resolved(status) => status.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Waiter {
    control: ControlId,
    requirement: ProbeRequirement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CacheEntry {
    Ready { bitmask: u64, fetched_at: Millis },
    Fetching { waiters: Vec<Waiter> },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug)]
pub struct PermissionCache {
    guild_id: String,
    entries: HashMap<String, CacheEntry>,
}

impl PermissionCache {
    pub fn new(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            entries: HashMap::new(),
        }
    }

    pub fn probe_path(&self, channel: &str) -> String {
        format!("/api/{}/channelperms/{channel}", self.guild_id)
    }

    pub fn is_fetching(&self, channel: &str) -> bool {
        matches!(self.entries.get(channel), Some(CacheEntry::Fetching { .. }))
    }

    pub fn cached_bitmask(&self, channel: &str) -> Option<u64> {
        match self.entries.get(channel) {
            Some(CacheEntry::Ready { bitmask, .. }) => Some(*bitmask),
            _ => None,
        }
    }

    pub fn check(
        &mut self,
        control: ControlId,
        channel: Option<&str>,
        requirement: ProbeRequirement,
        now: Millis,
    ) -> ProbeAction {
        self.forget_waiter(control);

        let Some(channel) = channel.filter(|channel| !channel.is_empty()) else {
            return ProbeAction::Cleared;
        };
        let waiter = Waiter {
            control,
            requirement,
        };

        match self.entries.get_mut(channel) {
            Some(CacheEntry::Fetching { waiters }) => {
                waiters.push(waiter);
                debug!(target: "partialnav::perms", channel, control = control.raw(), "parked on in-flight probe");
                ProbeAction::Wait
            }
            Some(CacheEntry::Ready {
                bitmask,
                fetched_at,
            }) if now.saturating_sub(*fetched_at) < PERMISSION_TTL_MS => {
                ProbeAction::Resolved(evaluate(*bitmask, requirement))
            }
            _ => {
                self.entries.insert(
                    channel.to_owned(),
                    CacheEntry::Fetching {
                        waiters: vec![waiter],
                    },
                );
                debug!(target: "partialnav::perms", channel, "fetching channel permissions");
                ProbeAction::Fetch {
                    path: self.probe_path(channel),
                }
            }
        }
    }

    /// Completes the in-flight fetch for `channel` and returns every parked control's status.
    pub fn resolve(
        &mut self,
        channel: &str,
        result: NavResult<FragmentResponse>,
        now: Millis,
    ) -> Vec<(ControlId, ProbeStatus)> {
        let waiters = match self.entries.remove(channel) {
            Some(CacheEntry::Fetching { waiters }) => waiters,
            Some(ready) => {
                self.entries.insert(channel.to_owned(), ready);
                return Vec::new();
            }
            None => Vec::new(),
        };

        match parse_bitmask(result) {
            Ok(bitmask) => {
                self.entries.insert(
                    channel.to_owned(),
                    CacheEntry::Ready {
                        bitmask,
                        fetched_at: now,
                    },
                );
                waiters
                    .into_iter()
                    .map(|waiter| (waiter.control, evaluate(bitmask, waiter.requirement)))
                    .collect()
            }
            Err(message) => {
                warn!(target: "partialnav::perms", channel, %message, "permission probe failed");
                waiters
                    .into_iter()
                    .map(|waiter| (waiter.control, ProbeStatus::Failed(message.clone())))
                    .collect()
            }
        }
    }

    fn forget_waiter(&mut self, control: ControlId) {
        for entry in self.entries.values_mut() {
            if let CacheEntry::Fetching { waiters } = entry {
                waiters.retain(|waiter| waiter.control != control);
            }
        }
    }
}

fn parse_bitmask(result: NavResult<FragmentResponse>) -> Result<u64, String> {
    let response = result.map_err(|error: NavError| {
        debug!(target: "partialnav::perms", %error, "probe transport failure");
        GENERIC_FAILURE_TEXT.to_owned()
    })?;
    let body = response.text();

    if !response.is_success() {
        return Err(serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|decoded| decoded.message)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| GENERIC_FAILURE_TEXT.to_owned()));
    }

    body.trim()
        .parse::<u64>()
        .map_err(|_| GENERIC_FAILURE_TEXT.to_owned())
}

#[cfg(test)]
mod tests {
    use super::PERMISSION_TTL_MS;
    use super::PermissionCache;
    use super::ProbeAction;
    use super::ProbeStatus;
    use super::evaluate;
    use pn_core::NavError;
    use pn_dom::ControlId;
    use pn_dom::Document;
    use pn_dom::ProbeRequirement;
    use pn_net::FragmentResponse;

    fn controls(count: usize) -> Vec<ControlId> {
        let mut markup = String::new();
        for _ in 0..count {
            markup.push_str("<select data-requireperms-send><option>1</option></select>");
        }
        let document = Document::load(&markup);
        document.content().selects.iter().map(|select| select.id).collect()
    }

    #[test]
    fn evaluation_reports_missing_permissions_by_name() {
        assert_eq!(evaluate(0x400 | 0x800, ProbeRequirement::Send), ProbeStatus::Satisfied);
        let missing = evaluate(0x400, ProbeRequirement::Embed);
        assert_eq!(missing.text(), "Missing Send Messages, Embed Links");
    }

    #[test]
    fn empty_selection_clears_without_fetching() {
        let ids = controls(1);
        let mut cache = PermissionCache::new("99");
        assert_eq!(cache.check(ids[0], Some(""), ProbeRequirement::Send, 0), ProbeAction::Cleared);
        assert_eq!(cache.check(ids[0], None, ProbeRequirement::Send, 0), ProbeAction::Cleared);
        assert!(!cache.is_fetching(""));
    }

    #[test]
    fn concurrent_checks_share_one_fetch() {
        let ids = controls(2);
        let mut cache = PermissionCache::new("99");

        let first = cache.check(ids[0], Some("42"), ProbeRequirement::Send, 1_000);
        assert_eq!(
            first,
            ProbeAction::Fetch {
                path: "/api/99/channelperms/42".to_owned()
            }
        );
        let second = cache.check(ids[1], Some("42"), ProbeRequirement::Embed, 1_100);
        assert_eq!(second, ProbeAction::Wait);
        assert_eq!(second.immediate_status().text(), "Checking channel permissions for bot...");

        let statuses = cache.resolve("42", Ok(FragmentResponse::new(200, "3072")), 1_500);
        assert_eq!(
            statuses,
            vec![
                (ids[0], ProbeStatus::Satisfied),
                (ids[1], ProbeStatus::Missing(vec!["Embed Links"])),
            ]
        );
        assert_eq!(cache.cached_bitmask("42"), Some(3072));
    }

    #[test]
    fn fresh_entries_answer_locally_until_the_ttl_expires() {
        let ids = controls(1);
        let mut cache = PermissionCache::new("99");
        let _ = cache.check(ids[0], Some("42"), ProbeRequirement::Send, 0);
        let _ = cache.resolve("42", Ok(FragmentResponse::new(200, "3072")), 0);

        assert_eq!(
            cache.check(ids[0], Some("42"), ProbeRequirement::Send, PERMISSION_TTL_MS - 1),
            ProbeAction::Resolved(ProbeStatus::Satisfied)
        );
        assert!(matches!(
            cache.check(ids[0], Some("42"), ProbeRequirement::Send, PERMISSION_TTL_MS),
            ProbeAction::Fetch { .. }
        ));
    }

    #[test]
    fn failure_evicts_and_reports_server_message() {
        let ids = controls(2);
        let mut cache = PermissionCache::new("99");
        let _ = cache.check(ids[0], Some("7"), ProbeRequirement::Send, 0);
        let _ = cache.check(ids[1], Some("7"), ProbeRequirement::Send, 0);

        let statuses = cache.resolve(
            "7",
            Ok(FragmentResponse::new(403, r#"{"message":"Unknown channel"}"#)),
            10,
        );
        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .iter()
            .all(|(_, status)| *status == ProbeStatus::Failed("Unknown channel".to_owned())));
        assert!(!cache.is_fetching("7"));
        assert_eq!(cache.cached_bitmask("7"), None);

        assert!(matches!(
            cache.check(ids[0], Some("7"), ProbeRequirement::Send, 20),
            ProbeAction::Fetch { .. }
        ));
        let statuses = cache.resolve("7", Err(NavError::new("net.transport.connect_failed", "refused")), 30);
        assert_eq!(
            statuses,
            vec![(ids[0], ProbeStatus::Failed("Couldn't check permissions :(".to_owned()))]
        );
    }

    #[test]
    fn reselecting_moves_the_waiter_to_the_new_channel() {
        let ids = controls(1);
        let mut cache = PermissionCache::new("99");
        let _ = cache.check(ids[0], Some("1"), ProbeRequirement::Send, 0);
        let _ = cache.check(ids[0], Some("2"), ProbeRequirement::Send, 0);

        assert!(cache.resolve("1", Ok(FragmentResponse::new(200, "0")), 5).is_empty());
        assert_eq!(cache.resolve("2", Ok(FragmentResponse::new(200, "0")), 5).len(), 1);
    }
}
