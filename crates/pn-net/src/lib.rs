//! Networking for partialnav: origin URLs, fragment messages, HTTP/1.1 transport
//! and the asynchronous exchange capability.

pub mod client;
pub mod exchange;
pub mod http;
mod tls;
pub mod url;

pub use client::Http11Client;
pub use exchange::Completion;
pub use exchange::Exchange;
pub use exchange::ExchangeId;
pub use exchange::ThreadedExchange;
pub use http::FragmentRequest;
pub use http::FragmentResponse;
pub use http::Header;
pub use http::Method;
pub use url::Origin;
pub use url::with_partial_markers;

#[cfg(any(test, feature = "test-support"))]
pub use exchange::ScriptedExchange;
