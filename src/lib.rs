//! A single-threaded, readiness-based WebSocket server implementation of
//! [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455), version 13.
//!
//! One reactor thread multiplexes every accepted peer with `mio`. Each
//! connection moves through [`WebSocketConfig`]-bounded handshake parsing,
//! then RFC-compliant frame reading and fragment assembly, and dispatches
//! to user code through the [`ClientHandler`] capability object rather than
//! an inheritance chain. There is no client (outbound-connect) role and no
//! TLS: both are left to whatever wraps the accepted `mio::net::TcpStream`.
//!
//! A minimal server:
//!
//! ```no_run
//! use socket_reactor::{ServerConfig, WebSocketServer};
//!
//! let config = ServerConfig::new("0.0.0.0:9001".parse().unwrap());
//! let mut server = WebSocketServer::bind(config, || {
//!     Box::new(socket_reactor::DefaultHandler)
//! }).unwrap();
//! server.run().unwrap();
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod frame_handler;
pub mod frame_reader;
pub mod handshake;
pub mod reactor;
pub mod server;
mod transport;

pub use client::WebSocketClient;
pub use config::{ServerConfig, WebSocketConfig};
pub use error::{Error, Result};
pub use frame::{Frame, OpCode};
pub use frame_handler::{ClientHandler, DefaultHandler, InboundEvent, Responder};
pub use reactor::{Reactor, ReactiveHandle};
pub use server::WebSocketServer;
pub use transport::Transport;
