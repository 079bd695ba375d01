//! OS-level connections: TCP everywhere, Unix domain sockets on Unix.
//!
//! # Example
//!
//! ```no_run
//! use streamwire::transport::{connect, Endpoint, Listener};
//!
//! # async fn run() -> streamwire::error::Result<()> {
//! let listener = Listener::bind(&Endpoint::Tcp("127.0.0.1:0".parse().unwrap())).await?;
//! let endpoint = listener.local_endpoint()?;
//!
//! let (client, server) = tokio::join!(connect(&endpoint), listener.accept());
//! let (_client, _server) = (client?, server?);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use crate::error::Result;

/// An open duplex byte channel.
///
/// Anything tokio can read from and write to qualifies, including
/// `tokio::io::DuplexStream` for in-memory tests.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased connection handed to engines.
pub type BoxedConnection = Box<dyn Connection>;

/// Where to connect or listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Tcp(addr)
    }
}

/// Open a connection to `endpoint`.
pub async fn connect(endpoint: &Endpoint) -> Result<BoxedConnection> {
    let conn: BoxedConnection = match endpoint {
        Endpoint::Tcp(addr) => Box::new(TcpStream::connect(addr).await?),
        #[cfg(unix)]
        Endpoint::Unix(path) => Box::new(UnixStream::connect(path).await?),
    };
    tracing::debug!(%endpoint, "connected");
    Ok(conn)
}

/// Generate a unique socket path for this process.
///
/// Format: `{temp_dir}/streamwire-{pid}-{random}.sock`
#[cfg(unix)]
pub fn generate_socket_path() -> PathBuf {
    let pid = std::process::id();
    std::env::temp_dir().join(format!("streamwire-{}-{:x}.sock", pid, rand_u64()))
}

/// Time, pid and a counter mixed together; unique within the process.
#[cfg(unix)]
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ count.rotate_left(32)
}

enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

/// Accepts incoming connections.
///
/// A Unix listener removes its socket file when dropped.
pub struct Listener {
    kind: ListenerKind,
}

impl Listener {
    /// Bind to `endpoint`.
    ///
    /// For Unix sockets any stale file at the path is removed first.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        let kind = match endpoint {
            Endpoint::Tcp(addr) => ListenerKind::Tcp(TcpListener::bind(addr).await?),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                remove_stale(path)?;
                ListenerKind::Unix {
                    listener: UnixListener::bind(path)?,
                    path: path.clone(),
                }
            }
        };
        tracing::debug!(%endpoint, "listening");
        Ok(Self { kind })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<BoxedConnection> {
        let conn: BoxedConnection = match &self.kind {
            ListenerKind::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                tracing::debug!(%peer, "accepted");
                Box::new(stream)
            }
            #[cfg(unix)]
            ListenerKind::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Box::new(stream)
            }
        };
        Ok(conn)
    }

    /// The bound endpoint, with the actual port for `:0` TCP binds.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        Ok(match &self.kind {
            ListenerKind::Tcp(listener) => Endpoint::Tcp(listener.local_addr()?),
            #[cfg(unix)]
            ListenerKind::Unix { path, .. } => Endpoint::Unix(path.clone()),
        })
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = self.local_endpoint().ok();
        f.debug_struct("Listener")
            .field("endpoint", &endpoint)
            .finish()
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let ListenerKind::Unix { path, .. } = &self.kind {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(unix)]
fn remove_stale(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
