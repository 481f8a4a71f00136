//! Extension HTTP server lifecycle.
//!
//! # Responsibilities
//! - Pick the transport from the listen specification (unix socket, HTTPS, HTTP)
//! - Bind, announce the bound address, serve until stopped
//! - Let other tasks wait until the server accepts connections
//! - Stop the server on demand or when the process shuts down
//!
//! # States
//! ```text
//! Idle → Starting → Serving(address) → Idle
//!            ↓
//!        Failed(reason)
//! ```
//!
//! # Design Decisions
//! - Validation runs before any socket is opened
//! - At most one server per `ExtensionServer`; a second `listen` is rejected
//! - The shutdown handler only holds a weak reference to the server
//! - Stopping on purpose is not an error

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ListenSpecification};
use crate::http;
use crate::lifecycle::shutdown::{ShutdownHandler, ShutdownRegistry, ORDER_STOP_EXTENSION_HTTP};
use crate::net::tls::{self, CertReloader, TlsError};

/// Name of the shutdown handler registered by [`ExtensionServer::new`].
pub const EXTENSION_HTTP_HANDLER: &str = "ExtensionHttp";

/// How long the shutdown handler lets in-flight requests finish.
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("failed to validate listen specification: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to set up TLS: {0}")]
    Tls(#[from] TlsError),
    #[error("failed to prepare unix socket {path}: {source}")]
    UnixSocket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unix domain sockets are not supported on this platform")]
    UnixSocketUnsupported,
    #[error("extension server is already listening")]
    AlreadyListening,
    #[error("extension server is not serving: {0}")]
    NotServing(String),
    #[error("extension server failed: {0}")]
    Serve(#[source] io::Error),
}

/// Options supplied by the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenOptions {
    /// Used unless `STEADYBIT_EXTENSION_PORT` is set. `0` lets the OS pick.
    pub port: u16,
    pub address: IpAddr,
}

impl ListenOptions {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Where the server accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddress {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl BoundAddress {
    pub fn tcp(&self) -> Option<SocketAddr> {
        match self {
            BoundAddress::Tcp(addr) => Some(*addr),
            BoundAddress::Unix(_) => None,
        }
    }
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundAddress::Tcp(addr) => write!(f, "{addr}"),
            BoundAddress::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Progress of the latest listen attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServeState {
    #[default]
    Idle,
    Starting,
    Serving(BoundAddress),
    Failed(String),
}

#[derive(Clone)]
enum ServerControl {
    Tcp(Handle),
    #[cfg(unix)]
    Unix {
        graceful: CancellationToken,
        hard: CancellationToken,
    },
}

impl ServerControl {
    /// Stop accepting and let open requests finish within `timeout`.
    fn drain(&self, timeout: Duration) {
        match self {
            ServerControl::Tcp(handle) => handle.graceful_shutdown(Some(timeout)),
            #[cfg(unix)]
            ServerControl::Unix { graceful, .. } => graceful.cancel(),
        }
    }

    fn close(&self) {
        match self {
            ServerControl::Tcp(handle) => handle.shutdown(),
            #[cfg(unix)]
            ServerControl::Unix { hard, .. } => hard.cancel(),
        }
    }
}

struct RunningServer {
    attempt: u64,
    control: ServerControl,
    /// Cancelled once the serve loop has returned and the socket is closed.
    finished: CancellationToken,
}

struct Inner {
    running: Mutex<Option<RunningServer>>,
    state: watch::Sender<ServeState>,
    attempts: AtomicU64,
}

impl Inner {
    /// Record the outcome of `attempt` unless a newer attempt has started.
    fn settle(&self, attempt: u64, state: ServeState) {
        if self.attempts.load(Ordering::SeqCst) == attempt {
            self.state.send_replace(state);
        }
    }

    async fn stop(&self) {
        let Some(server) = self.running.lock().await.take() else {
            return;
        };
        server.control.close();
        server.finished.cancelled().await;
        tracing::info!("Extension http server stopped");
    }

    async fn stop_gracefully(&self) {
        let Some(server) = self.running.lock().await.take() else {
            return;
        };
        tracing::info!(
            timeout_secs = GRACEFUL_SHUTDOWN_TIMEOUT.as_secs(),
            "Draining extension http server"
        );
        server.control.drain(GRACEFUL_SHUTDOWN_TIMEOUT);

        let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, server.finished.cancelled())
            .await
            .is_ok();
        if !drained {
            tracing::warn!("Extension http server did not drain in time, closing");
            server.control.close();
            server.finished.cancelled().await;
        }
        tracing::info!("Extension http server stopped");
    }
}

/// Owns the extension's HTTP server.
///
/// Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct ExtensionServer {
    inner: Arc<Inner>,
}

impl ExtensionServer {
    /// Create the coordinator and register its shutdown handler on `registry`.
    pub fn new(registry: &ShutdownRegistry) -> Self {
        let (state, _) = watch::channel(ServeState::Idle);
        let inner = Arc::new(Inner {
            running: Mutex::new(None),
            state,
            attempts: AtomicU64::new(0),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        registry.add(ShutdownHandler::new(
            EXTENSION_HTTP_HANDLER,
            ORDER_STOP_EXTENSION_HTTP,
            move |_signal| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.stop_gracefully().await;
                    }
                }
            },
        ));

        Self { inner }
    }

    /// Serve `router` as configured by the `STEADYBIT_EXTENSION_*` environment.
    pub async fn listen(&self, router: Router, opts: ListenOptions) -> Result<(), ListenError> {
        self.run(router, opts, ListenSpecification::from_env()).await
    }

    /// Serve `router` as configured by `spec`.
    ///
    /// Returns once the server has stopped. Stopping through [`stop_listen`]
    /// or the shutdown handler yields `Ok(())`.
    ///
    /// [`stop_listen`]: ExtensionServer::stop_listen
    pub async fn listen_with(
        &self,
        router: Router,
        opts: ListenOptions,
        spec: ListenSpecification,
    ) -> Result<(), ListenError> {
        self.run(router, opts, Ok(spec)).await
    }

    async fn run(
        &self,
        router: Router,
        opts: ListenOptions,
        spec: Result<ListenSpecification, ConfigError>,
    ) -> Result<(), ListenError> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return Err(ListenError::AlreadyListening);
        }
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_replace(ServeState::Starting);

        let binding = match spec.map_err(ListenError::from).and_then(|spec| Binding::open(&spec, opts)) {
            Ok(binding) => binding,
            Err(e) => {
                drop(running);
                tracing::error!(error = %e, "Failed to start extension server");
                self.inner.settle(attempt, ServeState::Failed(e.to_string()));
                return Err(e);
            }
        };

        let control = binding.control();
        let finished = CancellationToken::new();
        *running = Some(RunningServer {
            attempt,
            control: control.clone(),
            finished: finished.clone(),
        });
        drop(running);
        let _finished = finished.drop_guard();

        let address = binding.address();
        self.inner.state.send_replace(ServeState::Serving(address));

        let result = binding
            .serve(http::layered(router), control)
            .await
            .map_err(ListenError::Serve);

        {
            let mut running = self.inner.running.lock().await;
            if running.as_ref().is_some_and(|server| server.attempt == attempt) {
                *running = None;
            }
        }
        match &result {
            Ok(()) => self.inner.settle(attempt, ServeState::Idle),
            Err(e) => {
                tracing::error!(error = %e, "Extension server failed");
                self.inner.settle(attempt, ServeState::Failed(e.to_string()));
            }
        }
        result
    }

    /// Wait until the current listen attempt accepts connections.
    ///
    /// Fails with [`ListenError::NotServing`] when the attempt failed before
    /// it could serve.
    pub async fn wait_for_serve(&self) -> Result<BoundAddress, ListenError> {
        let mut state = self.inner.state.subscribe();
        let settled = state
            .wait_for(|s| matches!(s, ServeState::Serving(_) | ServeState::Failed(_)))
            .await
            .map_err(|_| ListenError::NotServing("server dropped".to_string()))?;

        match &*settled {
            ServeState::Serving(address) => Ok(address.clone()),
            ServeState::Failed(reason) => Err(ListenError::NotServing(reason.clone())),
            other => Err(ListenError::NotServing(format!("{other:?}"))),
        }
    }

    /// Close the server immediately. No-op when nothing is running.
    ///
    /// Returns after the listening socket has been closed.
    pub async fn stop_listen(&self) {
        self.inner.stop().await;
    }

    pub fn state(&self) -> ServeState {
        self.inner.state.borrow().clone()
    }

    pub async fn is_listening(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }
}

impl fmt::Debug for ExtensionServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionServer")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Whether `STEADYBIT_EXTENSION_UNIX_SOCKET` selects a unix socket.
pub fn is_unix_socket_enabled() -> bool {
    ListenSpecification::from_env().is_ok_and(|spec| spec.is_unix_socket_enabled())
}

/// A bound socket ready to serve.
enum Binding {
    Http {
        listener: std::net::TcpListener,
        address: SocketAddr,
    },
    Https {
        listener: std::net::TcpListener,
        address: SocketAddr,
        config: RustlsConfig,
    },
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
}

impl Binding {
    fn open(spec: &ListenSpecification, opts: ListenOptions) -> Result<Self, ListenError> {
        spec.validate()?;
        if spec.enable_pprof {
            tracing::warn!("STEADYBIT_EXTENSION_ENABLE_PPROF is set but profiling endpoints are not available");
        }

        if let Some(path) = &spec.unix_socket {
            return Self::unix(path.clone());
        }

        let address = SocketAddr::new(opts.address, spec.effective_port(opts.port));
        match (&spec.tls_server_cert, &spec.tls_server_key) {
            (Some(cert), Some(key)) => {
                let reloader = Arc::new(CertReloader::new(cert, key)?);
                let client_cas = spec
                    .requires_client_auth()
                    .then(|| tls::load_client_cas(spec.tls_client_cas.paths()));
                let config = tls::server_config(reloader, client_cas)?;

                let (listener, address) = bind_tcp(address)?;
                tracing::info!(
                    address = %address,
                    client_auth = spec.requires_client_auth(),
                    "Starting extension https server"
                );
                Ok(Binding::Https {
                    listener,
                    address,
                    config: RustlsConfig::from_config(Arc::new(config)),
                })
            }
            _ => {
                let (listener, address) = bind_tcp(address)?;
                tracing::info!(address = %address, "Starting extension http server");
                Ok(Binding::Http { listener, address })
            }
        }
    }

    #[cfg(unix)]
    fn unix(path: PathBuf) -> Result<Self, ListenError> {
        let unix_error = |source| ListenError::UnixSocket {
            path: path.clone(),
            source,
        };
        crate::net::socket::prepare_unix_socket(&path).map_err(unix_error)?;
        let listener = tokio::net::UnixListener::bind(&path).map_err(unix_error)?;

        tracing::info!(path = %path.display(), "Starting extension http server on unix domain socket");
        Ok(Binding::Unix { listener, path })
    }

    #[cfg(not(unix))]
    fn unix(_path: PathBuf) -> Result<Self, ListenError> {
        Err(ListenError::UnixSocketUnsupported)
    }

    fn address(&self) -> BoundAddress {
        match self {
            Binding::Http { address, .. } | Binding::Https { address, .. } => BoundAddress::Tcp(*address),
            #[cfg(unix)]
            Binding::Unix { path, .. } => BoundAddress::Unix(path.clone()),
        }
    }

    fn control(&self) -> ServerControl {
        match self {
            Binding::Http { .. } | Binding::Https { .. } => ServerControl::Tcp(Handle::new()),
            #[cfg(unix)]
            Binding::Unix { .. } => ServerControl::Unix {
                graceful: CancellationToken::new(),
                hard: CancellationToken::new(),
            },
        }
    }

    async fn serve(self, app: Router, control: ServerControl) -> io::Result<()> {
        match (self, control) {
            (Binding::Http { listener, .. }, ServerControl::Tcp(handle)) => {
                axum_server::from_tcp(listener)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
            }
            (Binding::Https { listener, config, .. }, ServerControl::Tcp(handle)) => {
                axum_server::tls_rustls::from_tcp_rustls(listener, config)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
            }
            #[cfg(unix)]
            (Binding::Unix { listener, .. }, ServerControl::Unix { graceful, hard }) => {
                serve_unix(listener, app, graceful, hard).await
            }
            #[cfg(unix)]
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "transport and control do not match")),
        }
    }
}

/// Accept loop for unix domain sockets.
///
/// Every connection runs in `connections`. `graceful` stops accepting and asks
/// each connection to finish its open request; `hard` aborts whatever is left.
#[cfg(unix)]
async fn serve_unix(
    listener: tokio::net::UnixListener,
    app: Router,
    graceful: CancellationToken,
    hard: CancellationToken,
) -> io::Result<()> {
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use hyper_util::server::conn::auto::Builder;
    use hyper_util::service::TowerToHyperService;
    use tokio::task::JoinSet;

    let mut connections = JoinSet::new();
    loop {
        let stream = tokio::select! {
            biased;
            _ = hard.cancelled() => break,
            _ = graceful.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept unix socket connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        let service = TowerToHyperService::new(app.clone());
        let graceful = graceful.clone();
        connections.spawn(async move {
            let builder = Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = graceful.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "Unix socket connection ended with error");
            }
        });
    }
    drop(listener);

    tokio::select! {
        biased;
        _ = hard.cancelled() => {
            connections.abort_all();
            join_all(&mut connections).await;
        }
        _ = join_all(&mut connections) => {}
    }
    Ok(())
}

#[cfg(unix)]
async fn join_all(connections: &mut tokio::task::JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}

fn bind_tcp(address: SocketAddr) -> Result<(std::net::TcpListener, SocketAddr), ListenError> {
    let bind_error = |source| ListenError::Bind {
        address: address.to_string(),
        source,
    };
    let listener = std::net::TcpListener::bind(address).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    let bound = listener.local_addr().map_err(bind_error)?;
    Ok((listener, bound))
}
