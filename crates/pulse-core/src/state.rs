//! Shared application state handed to every handler

use crate::hub::Hub;
use crate::server::ConnectionTracker;
use crate::ServerConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State shared across all requests
#[derive(Debug)]
pub struct AppState {
    /// Broadcast hub for real-time clients
    pub hub: Arc<Hub>,
    /// Open HTTP and upgraded connections
    pub tracker: Arc<ConnectionTracker>,
    /// Keep-alive period for event streams
    pub sse_keep_alive: Option<Duration>,
    started: Instant,
}

impl AppState {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            tracker: Arc::new(ConnectionTracker::new()),
            sse_keep_alive: None,
            started: Instant::now(),
        }
    }

    /// Build the state described by `config`
    pub fn from_config(config: &ServerConfig) -> Self {
        let hub = Hub::with_limits(config.write_timeout, config.connection_buffer);
        let mut state = Self::new(Arc::new(hub));
        state.sse_keep_alive = (!config.sse_keep_alive.is_zero()).then_some(config.sse_keep_alive);
        state
    }

    /// Time since the state was created
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}
