//! Built-in request handlers
//!
//! Every route handler has the same shape: it takes the request and the
//! shared state and resolves to a response or an [`Error`](crate::Error)
//! that the server turns into a status code.

pub mod chat;
pub mod health;
pub mod sse;
pub mod static_files;
pub mod text;
pub mod websocket;

pub use health::{HealthReport, HealthStatus};
pub use sse::{Sse, SseEvent};
pub use static_files::{StaticFileConfig, StaticFiles};
pub use text::{Echo, Greeting};
pub use websocket::{generate_accept_key, is_websocket_upgrade, upgrade_response};

use crate::state::AppState;
use crate::{Request, Response, Result};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Route handler type
pub type Handler =
    Arc<dyn Fn(Request, Arc<AppState>) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

/// Box an async fn into a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request, Arc<AppState>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(move |req, state| Box::pin(f(req, state)))
}

/// The server's GET routes
pub fn routes() -> Vec<(&'static str, Handler)> {
    vec![
        ("/", handler(text::index)),
        ("/json", handler(text::json)),
        ("/echo", handler(text::echo)),
        ("/chat", handler(chat::chat)),
        ("/sse", handler(chat::events)),
        ("/ws", handler(chat::socket)),
        ("/health", handler(health::health)),
    ]
}
