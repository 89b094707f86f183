//! Headless dashboard session.
//!
//! [`Session`] owns the document, history, navigation controller, permission cache,
//! unsaved-changes tracker and preferences. Hosts feed it [`Gesture`]s and drain
//! exchange completions with [`Session::pump`]; everything runs on the caller's thread.

mod config;
mod gesture;
mod session;

pub use config::ANALYTICS_VAR;
pub use config::GUILD_VAR;
pub use config::ORIGIN_VAR;
pub use config::STORAGE_DIR_VAR;
pub use config::SessionConfig;
pub use gesture::CONFIRM_TEXT;
pub use gesture::ConfirmPrompt;
pub use gesture::Disposition;
pub use gesture::Gesture;
pub use gesture::delete_confirmation;
pub use session::Session;
pub use session::SessionEvent;
