//! Native HTTP server implementation
//!
//! hyper HTTP/1.1 server with:
//! - Multi-threaded tokio runtime
//! - Per-method routing for O(1) dispatch
//! - Static file fallback for unrouted reads
//! - TCP_NODELAY for low latency
//! - Graceful shutdown that drains open connections

use crate::handlers::{self, Handler, StaticFileConfig, StaticFiles};
use crate::response::Body;
use crate::state::AppState;
use crate::{Error, Method, Request, Response, Result, ServerConfig};
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use pulse_router::Router;
use socket2::{Domain, Protocol, Socket, Type};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Body type handed to hyper
pub type HttpBody = UnsyncBoxBody<Bytes, Infallible>;

/// Server state shared across all connections
pub struct ServerState {
    routes: Router<Handler>,
    app: Arc<AppState>,
    static_files: StaticFiles,
    request_timeout: Duration,
}

impl ServerState {
    /// State with the built-in routes and the assets directory from `config`
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let static_files =
            StaticFiles::new(StaticFileConfig::new(&config.assets_dir).max_age(config.static_max_age));
        let mut state = Self::with_state(
            Arc::new(AppState::from_config(config)),
            static_files,
            config.request_timeout,
        );
        for (path, handler) in handlers::routes() {
            state.route(Method::Get, path, handler)?;
        }
        Ok(state)
    }

    /// State without any routes
    pub fn with_state(app: Arc<AppState>, static_files: StaticFiles, request_timeout: Duration) -> Self {
        Self {
            routes: Router::new(),
            app,
            static_files,
            request_timeout,
        }
    }

    /// Add a route; the first handler registered for a method and path wins
    pub fn route(&mut self, method: Method, path: &str, handler: Handler) -> Result<()> {
        self.routes
            .insert(method.as_str(), path, handler)
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Match and handle a request
    ///
    /// Handler errors become their status response here.
    pub async fn handle(&self, req: Request) -> Response {
        let method = req.method;
        let path = req.path.clone();
        let started = Instant::now();

        let routed = self.routes.find(method.as_str(), &req.path);
        let app = Arc::clone(&self.app);
        let static_files = &self.static_files;

        // Routed handlers and the static fallback share one deadline
        let work = async move {
            match routed {
                Some(handler) => handler(req, app).await,
                None if method.is_read() => static_files.handle(&req).await,
                None => Err(Error::MethodNotAllowed(method.to_string())),
            }
        };
        let result = match tokio::time::timeout(self.request_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if e.status().is_server_error() {
                    warn!(%method, %path, error = %e, "request failed");
                } else {
                    debug!(%method, %path, error = %e, "request rejected");
                }
                e.into_response()
            }
        };

        debug!(
            %method,
            %path,
            status = response.status.as_u16(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "request"
        );
        response
    }

    /// hyper service entry point
    pub async fn dispatch(
        self: Arc<Self>,
        req: hyper::Request<Incoming>,
    ) -> std::result::Result<hyper::Response<HttpBody>, Infallible> {
        let response = match from_hyper_request(req) {
            Ok(req) => self.handle(req).await,
            Err(e) => e.into_response(),
        };
        Ok(to_hyper_response(response))
    }
}

/// Create a TCP listener socket with optimizations
pub fn create_optimized_socket(addr: &SocketAddr) -> std::io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - allow binding to address in TIME_WAIT
    socket.set_reuse_address(true)?;

    socket.set_nodelay(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(1024)?;

    // Required by tokio::net::TcpListener::from_std
    socket.set_nonblocking(true)?;

    Ok(socket)
}

/// Convert a hyper request to our Request type
///
/// A pending upgrade is captured only when the client asked for a WebSocket.
pub fn from_hyper_request<B>(mut req: hyper::Request<B>) -> Result<Request> {
    let method = Method::parse(req.method().as_str())?;

    let wants_websocket = req
        .headers()
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let upgrade = wants_websocket.then(|| hyper::upgrade::on(&mut req));

    let uri = req.uri();
    let mut request = Request::new(method, uri.path());
    request.query = uri.query().map(str::to_string);
    request.upgrade = upgrade;

    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            request.headers.push((name.to_string(), v.to_string()));
        }
    }

    Ok(request)
}

/// Convert our Response to a hyper Response
pub fn to_hyper_response(res: Response) -> hyper::Response<HttpBody> {
    let body = match res.body {
        Body::Full(bytes) => Full::new(bytes).boxed_unsync(),
        Body::Stream(stream) => {
            StreamBody::new(stream.map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)))).boxed_unsync()
        }
    };

    let mut builder = hyper::Response::builder().status(res.status.as_u16());
    for (name, value) in &res.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder.body(body).unwrap_or_else(|e| {
        warn!(error = %e, "invalid response, sending 500");
        let mut fallback =
            hyper::Response::new(Full::new(Bytes::from_static(b"Internal Server Error")).boxed_unsync());
        *fallback.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

/// Bound listener plus the state it serves
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_timeout: Duration,
}

impl Server {
    /// Bind the listen socket described by `config`
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        Self::with_state(config, ServerState::new(config)?).await
    }

    /// Bind with a caller-built state
    pub async fn with_state(config: &ServerConfig, state: ServerState) -> Result<Self> {
        let addr = config.addr()?;
        let socket = create_optimized_socket(&addr)?;
        let listener = TcpListener::from_std(socket.into())?;
        Ok(Self {
            listener,
            state: Arc::new(state),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves, then drain
    ///
    /// On shutdown the hub is closed, which ends every event stream and
    /// WebSocket, and open HTTP connections finish their in-flight request.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            state,
            shutdown_timeout,
        } = self;
        let tracker = Arc::clone(&state.app.tracker);
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(addr = %listener.local_addr()?, "listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "set_nodelay failed");
                    }

                    let guard = tracker.track();
                    let state = Arc::clone(&state);
                    let mut stop_rx = stop_rx.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        let service = service_fn(move |req| Arc::clone(&state).dispatch(req));
                        let conn = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .with_upgrades();
                        tokio::pin!(conn);

                        let mut stopping = false;
                        loop {
                            tokio::select! {
                                res = conn.as_mut() => {
                                    if let Err(e) = res {
                                        debug!(%peer, error = %e, "connection error");
                                    }
                                    break;
                                }
                                _ = stop_rx.changed(), if !stopping => {
                                    stopping = true;
                                    conn.as_mut().graceful_shutdown();
                                }
                            }
                        }
                    });
                }
            }
        }

        info!("shutting down");
        tracker.start_shutdown();
        drop(listener);
        state.app.hub.close();
        let _ = stop_tx.send(true);

        if tracker.wait_idle(shutdown_timeout).await {
            info!("all connections drained");
        } else {
            warn!(open = tracker.count(), "shutdown timeout elapsed with open connections");
        }
        Ok(())
    }
}

/// Tracks active connections for graceful shutdown
///
/// Used to:
/// - Count active connections
/// - Signal shutdown in progress
/// - Wait for existing connections to drain
#[derive(Debug)]
pub struct ConnectionTracker {
    /// Active connection count
    active: AtomicU64,
    /// Shutdown signal received
    shutting_down: AtomicBool,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            active: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn increment(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn decrement(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Count a connection until the returned guard drops
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.increment();
        ConnectionGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Get current active connection count
    #[inline]
    pub fn count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Signal that shutdown is in progress
    pub fn start_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Wait until no connections are open
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.count() == 0 {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Decrements its tracker on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}
