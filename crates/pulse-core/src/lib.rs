//! pulse-core: real-time demo server core
//!
//! A hyper HTTP/1.1 server with a handful of text/JSON endpoints, a static
//! file fallback, and a broadcast hub that fans chat messages out to every
//! connected WebSocket and Server-Sent Events client.
//!
//! ## Endpoints
//! - `GET /` - plain-text greeting
//! - `GET /json` - JSON greeting
//! - `GET /echo?input=` - string transforms
//! - `GET /chat?message=` - broadcast to all real-time clients
//! - `GET /sse` - event stream of chat messages
//! - `GET /ws` - WebSocket of chat messages
//! - `GET /health` - liveness and connection counts

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod request;
pub mod response;
pub mod server;
pub mod state;

// Re-exports
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use hub::{ConnectionId, ConnectionKind, Delivery, Hub, Subscription};
pub use request::{Method, Request, RequestBuilder};
pub use response::{Body, Response, ResponseBuilder, StatusCode};
pub use server::{
    create_optimized_socket, from_hyper_request, to_hyper_response, ConnectionGuard,
    ConnectionTracker, Server, ServerState,
};
pub use state::AppState;

// Handlers re-exports
pub use handlers::{
    generate_accept_key, is_websocket_upgrade, upgrade_response as websocket_upgrade_response,
    Echo, Greeting, HealthReport, HealthStatus, Sse, SseEvent, StaticFileConfig, StaticFiles,
};
