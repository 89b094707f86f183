//! User gestures the session reacts to.

use pn_dom::ControlId;
use pn_dom::FormId;

pub const CONFIRM_TEXT: &str = "Are you sure you want to do this?";

pub fn delete_confirmation(title: &str) -> String {
    format!("Deleting {title}. Are you sure you want to do this?")
}

/// Controls are addressed by handle, so a gesture stays valid across fragment swaps
/// until the control itself is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gesture {
    ClickLink(String),
    /// `#name` or `name`.
    ClickAnchor(String),
    ClickButton(ControlId),
    /// Activates a `.tabs` link.
    SelectTab(String),
    SubmitForm(FormId),
    ChangeField {
        form: FormId,
        name: String,
        value: String,
    },
    ChangeChecked {
        form: FormId,
        name: String,
        value: String,
        checked: bool,
    },
    ChangeEditable {
        form: FormId,
        name: String,
        text: String,
    },
    ChangeSelect {
        control: ControlId,
        value: String,
    },
    ToggleSidebar,
    ToggleTheme,
    SaveUnsaved,
    Back,
    Forward,
    LoadWidget {
        slot: String,
        path: String,
    },
}

/// What became of a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The session took over; the host must not run its default action.
    Handled,
    /// A confirmation was declined; nothing happens.
    Suppressed,
    /// Not ours; the host performs its native behavior (full load, plain submit, ...).
    Default,
}

/// Blocking yes/no question shown before destructive actions.
pub trait ConfirmPrompt {
    fn confirm(&mut self, message: &str) -> bool;
}

impl<F> ConfirmPrompt for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, message: &str) -> bool {
        self(message)
    }
}
