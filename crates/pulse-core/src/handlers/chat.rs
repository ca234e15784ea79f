//! Chat endpoints: the broadcast trigger and the two real-time channels

use crate::handlers::{sse::Sse, websocket};
use crate::hub::ConnectionKind;
use crate::state::AppState;
use crate::{Error, Request, Response, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// `GET /chat?message=...`
///
/// Acknowledges as soon as every registered connection has been attempted,
/// whether or not anyone was listening.
pub async fn chat(req: Request, state: Arc<AppState>) -> Result<Response> {
    let message = req.require_param("message")?;
    let delivery = state.hub.broadcast(&message).await;
    info!(
        delivered = delivery.delivered,
        dropped = delivery.dropped,
        "chat message broadcast"
    );
    Ok(Response::text(format!("Message sent to chat: {}", message)))
}

/// `GET /sse`
///
/// One hub registration per request; it lives exactly as long as the
/// response body.
pub async fn events(_req: Request, state: Arc<AppState>) -> Result<Response> {
    let subscription = state.hub.register(ConnectionKind::EventStream);
    Ok(Sse::stream(subscription, state.sse_keep_alive))
}

/// `GET /ws`
///
/// Answers the handshake, then registers the socket once hyper hands over
/// the upgraded connection.
pub async fn socket(mut req: Request, state: Arc<AppState>) -> Result<Response> {
    let response = websocket::upgrade_response(&req)?;
    let on_upgrade = req
        .upgrade
        .take()
        .ok_or_else(|| Error::BadRequest("connection cannot be upgraded".into()))?;

    let hub = Arc::clone(&state.hub);
    let guard = state.tracker.track();
    tokio::spawn(async move {
        let _guard = guard;
        match on_upgrade.await {
            Ok(upgraded) => {
                let subscription = hub.register(ConnectionKind::WebSocket);
                websocket::serve(upgraded, subscription).await;
            }
            Err(e) => debug!(error = %e, "websocket upgrade failed"),
        }
    });

    Ok(response)
}
