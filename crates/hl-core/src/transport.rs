//! Duplex byte-stream transports between producer and consumer.
//!
//! Two bindings sit behind the [`Transport`] trait:
//!
//! - **local**: Unix domain socket at a filesystem path ([`LocalTransport`])
//! - **remote**: TCP to a `host:port` pair ([`RemoteTransport`])
//!
//! Both are stream sockets, so frames arrive in order with no silent drops.
//! The binding is picked once from an [`Endpoint`] by [`connect`] (client side)
//! or [`bind`] (server side); nothing above this module branches on it.
//!
//! Connection establishment is bounded by [`ConnectOptions::connect_timeout`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::error::HlError;
use crate::wire::{DEFAULT_MAX_FRAME_LEN, Frame, FramedStream};

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Which binding a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Local,
    Remote,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Address of a session peer. Immutable for a session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Unix domain socket path.
    Local(PathBuf),
    /// TCP host and port.
    Remote { host: String, port: u16 },
}

impl Endpoint {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Local(_) => TransportKind::Local,
            Self::Remote { .. } => TransportKind::Remote,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "unix://{}", path.display()),
            Self::Remote { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Tunables for establishing and using a transport.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound for connection establishment (including DNS).
    pub connect_timeout: Duration,
    /// Upper bound for waiting on the peer's summary after finishing.
    pub summary_timeout: Duration,
    /// Largest frame body accepted or produced.
    pub max_frame_len: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            summary_timeout: Duration::from_secs(30),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport / Listener traits
// ---------------------------------------------------------------------------

/// An open, ordered, reliable frame channel to one peer.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Human-readable peer description for logs.
    fn peer(&self) -> String;

    /// Write one frame. Completes once the frame is handed to the OS.
    async fn send(&mut self, frame: &Frame) -> Result<(), HlError>;

    /// Read the next frame, or `None` if the peer closed cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, HlError>;

    /// Shut down the write half. The socket is released on drop.
    async fn close(&mut self) -> Result<(), HlError>;
}

/// Server-side acceptor producing [`Transport`]s.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Endpoint actually bound (resolves port 0 to the assigned port).
    fn local_endpoint(&self) -> Endpoint;

    async fn accept(&self) -> Result<Box<dyn Transport>, HlError>;
}

// ---------------------------------------------------------------------------
// Local (Unix domain socket)
// ---------------------------------------------------------------------------

#[cfg(unix)]
pub use local::{LocalListener, LocalTransport};

#[cfg(unix)]
mod local {
    use super::*;
    use tokio::net::{UnixListener, UnixStream};

    /// Unix domain socket binding.
    pub struct LocalTransport {
        io: FramedStream<UnixStream>,
        path: PathBuf,
    }

    impl LocalTransport {
        /// Connect to a listening socket at `path`.
        ///
        /// A missing path, a refused connection or a timeout are all
        /// `EndpointUnavailable`.
        pub async fn connect(path: &Path, opts: &ConnectOptions) -> Result<Self, HlError> {
            let unavailable = |reason: String| HlError::EndpointUnavailable {
                endpoint: format!("unix://{}", path.display()),
                reason,
            };

            if !path.exists() {
                return Err(unavailable("socket path does not exist".into()));
            }

            let stream = match timeout(opts.connect_timeout, UnixStream::connect(path)).await {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => return Err(unavailable(e.to_string())),
                Err(_) => return Err(unavailable(format!("connect timed out after {:?}", opts.connect_timeout))),
            };

            Ok(Self { io: FramedStream::new(stream, opts.max_frame_len), path: path.to_path_buf() })
        }
    }

    #[async_trait]
    impl Transport for LocalTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Local
        }

        fn peer(&self) -> String {
            format!("unix://{}", self.path.display())
        }

        async fn send(&mut self, frame: &Frame) -> Result<(), HlError> {
            self.io.write_frame(frame).await
        }

        async fn recv(&mut self) -> Result<Option<Frame>, HlError> {
            self.io.read_frame().await
        }

        async fn close(&mut self) -> Result<(), HlError> {
            self.io.shutdown().await
        }
    }

    /// Unix domain socket acceptor.
    ///
    /// A stale socket file left by a previous run is removed before binding;
    /// the file is removed again when the listener is dropped.
    pub struct LocalListener {
        listener: UnixListener,
        path: PathBuf,
        max_frame_len: usize,
    }

    impl LocalListener {
        pub fn bind(path: &Path, max_frame_len: usize) -> Result<Self, HlError> {
            if path.exists() {
                debug!("removing stale socket {}", path.display());
                std::fs::remove_file(path)
                    .map_err(|e| HlError::Listen(format!("remove stale socket {}: {e}", path.display())))?;
            }
            let listener =
                UnixListener::bind(path).map_err(|e| HlError::Listen(format!("bind {}: {e}", path.display())))?;
            info!("listening on unix socket {}", path.display());
            Ok(Self { listener, path: path.to_path_buf(), max_frame_len })
        }
    }

    #[async_trait]
    impl Listener for LocalListener {
        fn local_endpoint(&self) -> Endpoint {
            Endpoint::Local(self.path.clone())
        }

        async fn accept(&self) -> Result<Box<dyn Transport>, HlError> {
            let (stream, _addr) = self.listener.accept().await.map_err(|e| HlError::Listen(format!("accept: {e}")))?;
            Ok(Box::new(LocalTransport { io: FramedStream::new(stream, self.max_frame_len), path: self.path.clone() }))
        }
    }

    impl Drop for LocalListener {
        fn drop(&mut self) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("failed to remove socket {}: {e}", self.path.display());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Remote (TCP)
// ---------------------------------------------------------------------------

/// TCP binding.
pub struct RemoteTransport {
    io: FramedStream<TcpStream>,
    peer: SocketAddr,
}

impl RemoteTransport {
    /// Resolve `host` and connect to the first address that accepts.
    ///
    /// DNS failure, unreachable routes and timeouts are `EndpointUnreachable`;
    /// a refused connection on every address is `EndpointUnavailable`.
    pub async fn connect(host: &str, port: u16, opts: &ConnectOptions) -> Result<Self, HlError> {
        let endpoint = format!("{host}:{port}");
        let unreachable = |reason: String| HlError::EndpointUnreachable { endpoint: endpoint.clone(), reason };
        let deadline = Instant::now() + opts.connect_timeout;

        let addrs: Vec<SocketAddr> = match timeout(opts.connect_timeout, tokio::net::lookup_host((host, port))).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => return Err(unreachable(format!("resolve: {e}"))),
            Err(_) => return Err(unreachable("resolve timed out".into())),
        };
        if addrs.is_empty() {
            return Err(unreachable("host resolved to no addresses".into()));
        }

        let mut last_err = None;
        for addr in addrs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("set_nodelay on {addr} failed: {e}");
                    }
                    return Ok(Self { io: FramedStream::new(stream, opts.max_frame_len), peer: addr });
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    debug!("{addr} refused connection");
                    last_err =
                        Some(HlError::EndpointUnavailable { endpoint: endpoint.clone(), reason: e.to_string() });
                }
                Ok(Err(e)) => {
                    debug!("{addr} connect error: {e}");
                    last_err = Some(unreachable(e.to_string()));
                }
                Err(_) => {
                    last_err = Some(unreachable(format!("connect timed out after {:?}", opts.connect_timeout)));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| unreachable(format!("connect timed out after {:?}", opts.connect_timeout))))
    }
}

#[async_trait]
impl Transport for RemoteTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Remote
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), HlError> {
        self.io.write_frame(frame).await
    }

    async fn recv(&mut self) -> Result<Option<Frame>, HlError> {
        self.io.read_frame().await
    }

    async fn close(&mut self) -> Result<(), HlError> {
        self.io.shutdown().await
    }
}

/// TCP acceptor.
pub struct RemoteListener {
    listener: TcpListener,
    host: String,
    max_frame_len: usize,
}

impl RemoteListener {
    pub async fn bind(host: &str, port: u16, max_frame_len: usize) -> Result<Self, HlError> {
        let listener =
            TcpListener::bind((host, port)).await.map_err(|e| HlError::Listen(format!("bind {host}:{port}: {e}")))?;
        info!("listening on tcp {host}:{port}");
        Ok(Self { listener, host: host.to_string(), max_frame_len })
    }
}

#[async_trait]
impl Listener for RemoteListener {
    fn local_endpoint(&self) -> Endpoint {
        let port = self.listener.local_addr().map(|a| a.port()).unwrap_or_default();
        Endpoint::Remote { host: self.host.clone(), port }
    }

    async fn accept(&self) -> Result<Box<dyn Transport>, HlError> {
        let (stream, peer) = self.listener.accept().await.map_err(|e| HlError::Listen(format!("accept: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("set_nodelay on {peer} failed: {e}");
        }
        Ok(Box::new(RemoteTransport { io: FramedStream::new(stream, self.max_frame_len), peer }))
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Open a transport to `endpoint` using the binding it names.
pub async fn connect(endpoint: &Endpoint, opts: &ConnectOptions) -> Result<Box<dyn Transport>, HlError> {
    match endpoint {
        #[cfg(unix)]
        Endpoint::Local(path) => Ok(Box::new(LocalTransport::connect(path, opts).await?)),
        #[cfg(not(unix))]
        Endpoint::Local(_) => Err(HlError::Config("unix domain sockets are not supported on this platform".into())),
        Endpoint::Remote { host, port } => Ok(Box::new(RemoteTransport::connect(host, *port, opts).await?)),
    }
}

/// Bind a server-side listener on `endpoint`.
pub async fn bind(endpoint: &Endpoint, max_frame_len: usize) -> Result<Box<dyn Listener>, HlError> {
    match endpoint {
        #[cfg(unix)]
        Endpoint::Local(path) => Ok(Box::new(LocalListener::bind(path, max_frame_len)?)),
        #[cfg(not(unix))]
        Endpoint::Local(_) => Err(HlError::Config("unix domain sockets are not supported on this platform".into())),
        Endpoint::Remote { host, port } => Ok(Box::new(RemoteListener::bind(host, *port, max_frame_len).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Batch, Item, Summary};

    fn opts(ms: u64) -> ConnectOptions {
        ConnectOptions { connect_timeout: Duration::from_millis(ms), ..ConnectOptions::default() }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_socket_path_is_unavailable_within_bound() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Local(dir.path().join("nobody-home.sock"));

        let started = std::time::Instant::now();
        let err = connect(&endpoint, &opts(500)).await.err().unwrap();
        assert!(matches!(err, HlError::EndpointUnavailable { .. }), "got {err}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn local_listener_replaces_stale_file_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hl.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = bind(&Endpoint::Local(path.clone()), DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn local_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Local(dir.path().join("hl.sock"));
        let listener = bind(&endpoint, DEFAULT_MAX_FRAME_LEN).await.unwrap();

        let server = tokio::spawn(async move {
            let mut t = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            while let Some(Frame::Batch(b)) = t.recv().await.unwrap() {
                seen.push(b.items[0].text.clone());
            }
            t.send(&Frame::Summary(Summary { processed_count: seen.len() as u64, batch_count: seen.len() as u64 }))
                .await
                .unwrap();
            seen
        });

        let mut client = connect(&endpoint, &opts(1_000)).await.unwrap();
        assert_eq!(client.kind(), TransportKind::Local);
        for text in ["one", "two", "three"] {
            let b = Batch::new(vec![Item::new("AAPL", text, 1)], 0).unwrap();
            client.send(&Frame::Batch(b)).await.unwrap();
        }
        client.send(&Frame::EndOfStream).await.unwrap();
        let reply = client.recv().await.unwrap();
        assert_eq!(reply, Some(Frame::Summary(Summary { processed_count: 3, batch_count: 3 })));

        assert_eq!(server.await.unwrap(), ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn refused_tcp_connection_is_unavailable() {
        // Grab a free port, then release it so nothing is listening.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = connect(&Endpoint::Remote { host: "127.0.0.1".into(), port }, &opts(1_000)).await.err().unwrap();
        assert!(matches!(err, HlError::EndpointUnavailable { .. }), "got {err}");
    }

    #[tokio::test]
    async fn unresolvable_host_is_unreachable() {
        let endpoint = Endpoint::Remote { host: "no-such-host.invalid".into(), port: 50051 };
        let err = connect(&endpoint, &opts(2_000)).await.err().unwrap();
        assert!(matches!(err, HlError::EndpointUnreachable { .. }), "got {err}");
    }

    #[tokio::test]
    async fn tcp_listener_reports_assigned_port() {
        let listener = bind(&Endpoint::Remote { host: "127.0.0.1".into(), port: 0 }, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        let endpoint = listener.local_endpoint();
        let Endpoint::Remote { port, .. } = &endpoint else { panic!("expected remote endpoint") };
        assert_ne!(*port, 0);

        let accept = tokio::spawn(async move { listener.accept().await.map(|t| t.kind()) });
        let client = connect(&endpoint, &opts(1_000)).await.unwrap();
        assert_eq!(client.kind(), TransportKind::Remote);
        assert_eq!(accept.await.unwrap().unwrap(), TransportKind::Remote);
    }
}
