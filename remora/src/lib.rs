//! Wire protocol engine for a remote database access layer.
//!
//! `remora` multiplexes database operations (attach, transactions, statement
//! execution, blob I/O, batched row fetch) over a single bidirectional
//! connection, with optional stream compression and an in-band negotiated
//! wire-encryption layer.
//!
//! The engine owns everything between a byte-stream transport and the caller:
//! packet framing, the compression filter, crypt negotiation, and the
//! client-side bookkeeping for pipelined requests, cursors and blobs.
//!
//! # Examples
//!
//! ```no_run
//! use remora::{Config, Port, proto::packet::Attach, proto::params::ParamBuf};
//!
//! # async fn app() -> remora::Result<()> {
//! let stream = tokio::net::TcpStream::connect("db.example:3050").await?;
//! let mut port = Port::connect(stream, Config::from_env()).await?;
//!
//! port.send(&Attach {
//!     database: "employee".into(),
//!     params: ParamBuf::new(),
//! }.into()).await?;
//!
//! let packet = port.receive().await?;
//! let attach = port.check_response(packet)?;
//! println!("attached as object {}", attach.object);
//! # Ok(())
//! # }
//! ```

pub mod common;

// Protocol
pub mod proto;
pub mod status;

// Filters
pub mod compress;
pub mod crypt;

// Connection
pub mod transport;
pub mod port;

// Bookkeeping
pub mod message;
pub mod request;
pub mod statement;
pub mod blob;
pub mod session;

// Operation
pub mod fetch;

pub mod config;
mod error;

pub use proto::packet::Packet;
pub use status::StatusVector;

pub use transport::Transport;
pub use port::Port;

pub use message::MessageRing;
pub use request::{Request, RowFormat};
pub use statement::Statement;
pub use blob::Blob;
pub use session::Session;

pub use crypt::{CryptKey, CryptProvider, WireCryptPlugin};
pub use config::{Config, WireCrypt};

pub use error::{Error, ErrorKind, Result};
