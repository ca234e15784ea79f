//! Server-Sent Events (SSE) handler
//!
//! Turns a hub subscription into a long-lived `text/event-stream` response.

use crate::hub::Subscription;
use crate::{Response, ResponseBuilder, StatusCode};
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Comment record used to keep idle streams open
const KEEP_ALIVE: &[u8] = b": keep-alive\n\n";

/// SSE Event carrying a single `data` field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event data (can be multiple lines)
    pub data: String,
}

impl SseEvent {
    /// Create a new SSE event with data
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }

    /// Serialize to the event-stream wire format
    ///
    /// CR, LF and CRLF all end a line on the client, so each becomes its own
    /// `data:` line and no payload can open another field or record. A
    /// trailing newline is kept as a final empty `data:` line.
    pub fn encode(&self) -> String {
        let normalized = self.data.replace("\r\n", "\n").replace('\r', "\n");
        let mut output = String::with_capacity(normalized.len() + 16);

        for line in normalized.split('\n') {
            output.push_str("data: ");
            output.push_str(line);
            output.push('\n');
        }

        output.push('\n');
        output
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode())
    }
}

/// SSE response helpers
pub struct Sse;

impl Sse {
    /// SSE response headers
    pub fn headers() -> [(&'static str, &'static str); 4] {
        [
            ("Content-Type", "text/event-stream"),
            ("Cache-Control", "no-cache"),
            ("Connection", "keep-alive"),
            ("X-Accel-Buffering", "no"), // Disable nginx buffering
        ]
    }

    /// Stream every message of `subscription` as a `data:` record
    ///
    /// With `keep_alive` set, a comment is written after each quiet period so
    /// a vanished peer surfaces as a failed write. The subscription is dropped
    /// (and the connection unregistered) when the body is dropped or the hub
    /// ends the subscription.
    pub fn stream(subscription: Subscription, keep_alive: Option<Duration>) -> Response {
        let body = async_stream::stream! {
            let mut sub = subscription;
            let mut ticker = keep_alive.map(keep_alive_interval);

            loop {
                let chunk = tokio::select! {
                    message = sub.recv() => match message {
                        Some(message) => SseEvent::new(&*message).to_bytes(),
                        None => break,
                    },
                    _ = tick(&mut ticker) => Bytes::from_static(KEEP_ALIVE),
                };
                yield chunk;
            }

            debug!(connection = sub.id(), "event stream ended");
        };

        let mut builder = ResponseBuilder::new(StatusCode::OK);
        for (k, v) in Self::headers() {
            builder = builder.header(k, v);
        }
        builder.stream(body.boxed()).build()
    }
}

fn keep_alive_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
