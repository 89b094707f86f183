//! Partial navigation: fragment fetches, alerts rendering and menu highlighting.

pub mod alerts;
mod controller;
pub mod menu;

pub use alerts::Alert;
pub use alerts::parse_alerts;
pub use alerts::show_alerts;
pub use controller::CompletionHook;
pub use controller::NavigationController;
pub use controller::NavigationHost;
pub use controller::NavigationOutcome;
pub use controller::NavigationRequest;
pub use controller::NavigationState;
pub use menu::highlight_menu;
