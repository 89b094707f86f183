//! Headless dashboard document for partialnav.
//!
//! The server's HTML is scanned once per content swap into forms, controls and
//! the other markup hooks the navigation layer reacts to.

mod document;
mod form;
pub mod html;
mod location;
mod scan;

pub use document::Document;
pub use document::Notification;
pub use document::NotificationKind;
pub use document::Overlays;
pub use document::StatusLine;
pub use document::StatusTone;
pub use document::Theme;
pub use document::UnsavedPopup;
pub use form::ControlId;
pub use form::EditableRegion;
pub use form::Field;
pub use form::FieldKind;
pub use form::Form;
pub use form::FormId;
pub use form::FormSnapshot;
pub use location::Location;
pub use scan::Button;
pub use scan::ButtonKind;
pub use scan::Fragment;
pub use scan::Menu;
pub use scan::MenuEntry;
pub use scan::MenuGroup;
pub use scan::PageShell;
pub use scan::ProbeRequirement;
pub use scan::SelectControl;
pub use scan::Tab;
pub use scan::scan_page;
