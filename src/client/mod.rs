//! Network clients.
//!
//! - [`websocket`] - self-healing streaming transport with subscription replay
//! - [`rest`] - HTTP client for snapshot fetches
//! - [`auth`] - credentials and the fingerprints that key the connection pool

pub mod auth;
pub mod rest;
pub mod websocket;

pub use auth::Credentials;
pub use rest::RestClient;
pub use websocket::{ConnectionStatus, InboundFrame, ReconnectConfig, StreamTransport};
