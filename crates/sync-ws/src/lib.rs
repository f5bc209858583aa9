//! Network runtime for the companion chat client.
//!
//! [`WsTransport`] carries the per-conversation push channel, [`HttpApi`]
//! implements the REST collaborators from `sync_core`, and
//! [`ConversationSession`] ties both to the timeline reconciler.

pub mod config;
pub mod http;
pub mod session;
pub mod transport;

pub use config::{
    ClientConfig, DEFAULT_API_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HTTP_TIMEOUT,
    DEFAULT_WS_BASE_URL,
};
pub use http::HttpApi;
pub use session::ConversationSession;
pub use transport::{TransportEvent, WsTransport};
