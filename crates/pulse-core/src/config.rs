//! Server configuration

use crate::{Error, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub hostname: String,
    pub workers: usize,
    /// Root of the static assets served for unrouted paths
    pub assets_dir: PathBuf,
    /// `Cache-Control: max-age` for static files (0 omits it)
    pub static_max_age: u32,
    /// Bound on one write to a real-time connection
    pub write_timeout: Duration,
    /// Messages buffered per real-time connection
    pub connection_buffer: usize,
    /// Bound on a handler producing its response
    pub request_timeout: Duration,
    /// Comment interval on idle event streams (zero disables)
    pub sse_keep_alive: Duration,
    /// How long shutdown waits for open connections
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            hostname: "0.0.0.0".to_string(),
            workers: num_cpus::get(),
            assets_dir: PathBuf::from("mychat"),
            static_max_age: 0,
            write_timeout: crate::hub::DEFAULT_WRITE_TIMEOUT,
            connection_buffer: crate::hub::DEFAULT_CONNECTION_BUFFER,
            request_timeout: Duration::from_secs(30),
            sse_keep_alive: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Listen address from `hostname` and `port`
    pub fn addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = match self.hostname.as_str() {
            "localhost" => IpAddr::from([127, 0, 0, 1]),
            host => host
                .parse()
                .map_err(|_| Error::Config(format!("invalid hostname: {}", host)))?,
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        self.addr()?;
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::Config("write timeout must be positive".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be positive".into()));
        }
        if self.connection_buffer == 0 {
            return Err(Error::Config("connection buffer must be at least 1".into()));
        }
        Ok(())
    }
}
