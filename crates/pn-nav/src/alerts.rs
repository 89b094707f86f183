//! Alerts payload returned by alerts-only responses.

use pn_dom::Document;
use pn_dom::Notification;
use pn_dom::NotificationKind;
use serde::Deserialize;
use tracing::warn;

pub const SUCCESS_DISMISS_MS: u64 = 2_000;
pub const SUPPORT_HINT: &str =
    "Read the docs and contact support if you don't know what went wrong.";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Alert {
    #[serde(rename = "Style")]
    pub style: String,
    #[serde(rename = "Message", default)]
    pub message: String,
}

impl Alert {
    /// `success` and `danger` render; any other style is skipped.
    pub fn notification(&self) -> Option<Notification> {
        match self.style.as_str() {
            "success" => Some(Notification {
                kind: NotificationKind::Success,
                title: self.message.clone(),
                text: None,
                auto_dismiss_ms: Some(SUCCESS_DISMISS_MS),
            }),
            "danger" => Some(Notification {
                kind: NotificationKind::Error,
                title: self.message.clone(),
                text: Some(SUPPORT_HINT.to_owned()),
                auto_dismiss_ms: None,
            }),
            _ => None,
        }
    }
}

/// Parses a JSON array of alerts; `null` and malformed bodies yield nothing.
pub fn parse_alerts(body: &str) -> Vec<Alert> {
    match serde_json::from_str::<Option<Vec<Alert>>>(body) {
        Ok(alerts) => alerts.unwrap_or_default(),
        Err(error) => {
            warn!(target: "partialnav::nav", %error, "discarding malformed alerts payload");
            Vec::new()
        }
    }
}

/// Renders the payload as notifications and returns how many were shown.
pub fn show_alerts(doc: &mut Document, body: &str) -> usize {
    let notifications: Vec<Notification> = parse_alerts(body)
        .iter()
        .filter_map(Alert::notification)
        .collect();
    let shown = notifications.len();
    for notification in notifications {
        doc.push_notification(notification);
    }
    shown
}
