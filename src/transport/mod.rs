//! Transport module - OS connections and the [`Connection`] abstraction.
//!
//! Provides:
//! - TCP streams and listeners
//! - Unix Domain Sockets (Linux/macOS)

mod socket;

#[cfg(unix)]
pub use socket::generate_socket_path;
pub use socket::{connect, BoxedConnection, Connection, Endpoint, Listener};
