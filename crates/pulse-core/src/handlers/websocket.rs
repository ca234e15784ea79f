//! WebSocket handler
//!
//! Handshake helpers plus the per-connection writer that pushes hub
//! broadcasts to the client as text frames.

use crate::hub::Subscription;
use crate::{Error, Request, Response, ResponseBuilder, Result, StatusCode};
use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Only protocol version accepted (RFC 6455)
const SUPPORTED_VERSION: &str = "13";

/// Check if request is WebSocket upgrade
pub fn is_websocket_upgrade(req: &Request) -> bool {
    let upgrade = req.header("upgrade").unwrap_or("");
    let connection = req.header("connection").unwrap_or("");
    let key = req.header("sec-websocket-key");

    upgrade.eq_ignore_ascii_case("websocket")
        && connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        && key.is_some()
}

/// Generate WebSocket accept key
pub fn generate_accept_key(key: &str) -> String {
    derive_accept_key(key.as_bytes())
}

/// Validate the handshake and build the `101 Switching Protocols` response
pub fn upgrade_response(req: &Request) -> Result<Response> {
    if !is_websocket_upgrade(req) {
        return Err(Error::BadRequest("expected a websocket upgrade request".into()));
    }

    let version = req.header("sec-websocket-version").unwrap_or("");
    if version.trim() != SUPPORTED_VERSION {
        return Err(Error::BadRequest(format!(
            "unsupported websocket version: {:?}",
            version
        )));
    }

    let key = req
        .header("sec-websocket-key")
        .ok_or_else(|| Error::BadRequest("missing sec-websocket-key".into()))?;

    Ok(ResponseBuilder::new(StatusCode::SWITCHING_PROTOCOLS)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", generate_accept_key(key))
        .build())
}

/// Run the server side of an upgraded connection
///
/// Every hub message becomes one text frame. Client frames are read only to
/// notice close and keep ping/pong flowing; their payloads are ignored.
pub async fn serve(upgraded: Upgraded, subscription: Subscription) {
    let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
    run(ws, subscription).await;
}

async fn run<S>(mut ws: WebSocketStream<S>, mut subscription: Subscription)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let id = subscription.id();

    loop {
        tokio::select! {
            message = subscription.recv() => match message {
                Some(message) => {
                    if let Err(e) = ws.send(Message::text(message.to_string())).await {
                        debug!(connection = id, error = %e, "websocket write failed");
                        break;
                    }
                }
                None => {
                    // Hub closed or dropped us
                    let _ = ws.close(None).await;
                    break;
                }
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(frame)) => {
                    debug!(connection = id, len = frame.len(), "ignoring client frame");
                }
                Some(Err(e)) => {
                    debug!(connection = id, error = %e, "websocket read failed");
                    break;
                }
            },
        }
    }

    debug!(connection = id, "websocket closed");
}
