//! `remora` error types.
use std::{fmt, io};

use crate::{
    compress::CompressError,
    config::ConfigError,
    crypt::CryptError,
    proto::ProtocolError,
    status::{AttachmentShutdown, DbError},
};

/// A specialized [`Result`] type for `remora` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from the `remora` engine.
///
/// Transport, protocol and negotiation faults leave the originating port
/// unusable; database errors are ordinary results of a remote call and do
/// not tear the connection down.
pub struct Error {
    context: String,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Attach operation context, shown ahead of the error message.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Whether the error leaves the port unusable.
    pub fn is_fatal(&self) -> bool {
        match &self.kind {
            ErrorKind::Io(_)
            | ErrorKind::Protocol(_)
            | ErrorKind::Compress(_)
            | ErrorKind::Crypt(_) => true,
            ErrorKind::Config(_) | ErrorKind::Database(_) | ErrorKind::Shutdown(_) => false,
        }
    }
}

/// All possible error kind from the `remora` engine.
pub enum ErrorKind {
    /// Transport fault: connection reset, timeout, short read.
    Io(io::Error),
    /// Protocol fault: malformed packet, unsupported operation.
    Protocol(ProtocolError),
    /// Stream compression fault, fatal to the connection.
    Compress(CompressError),
    /// Wire encryption negotiation fault.
    Crypt(CryptError),
    /// Configuration value could not be parsed.
    Config(ConfigError),
    /// Error reported by the remote database inside a response packet.
    Database(DbError),
    /// The attachment is shutting down; remote calls short-circuit.
    Shutdown(AttachmentShutdown),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                Self { context: String::new(), kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<io::Error>e => ErrorKind::Io(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<CompressError>e => ErrorKind::Compress(e));
from!(<CryptError>e => ErrorKind::Crypt(e));
from!(<ConfigError>e => ErrorKind::Config(e));
from!(<DbError>e => ErrorKind::Database(e));
from!(<AttachmentShutdown>e => ErrorKind::Shutdown(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }
        fmt::Display::fmt(&self.kind, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Compress(e) => e.fmt(f),
            Self::Crypt(e) => e.fmt(f),
            Self::Config(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Shutdown(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
