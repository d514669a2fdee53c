//! IO side of the chat client: REST pulls, the push channel, the session
//! vault and the runtime task that drives the synchronization core.

/// REST pull client.
pub mod api;
/// Push channel manager and transports.
pub mod connection;
/// Command/event runtime (the session gate).
pub mod runtime;
/// Persisted session credentials.
pub mod vault;

pub use api::{ChatApi, HttpChatApi};
pub use connection::{
    ConnectionManager, PushLink, PushTransport, WebSocketTransport, push_url_for,
};
pub use runtime::{ChatRuntimeHandle, spawn_runtime};
pub use vault::SessionVault;
