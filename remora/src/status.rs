//! Status vectors and the errors carried inside response packets.
//!
//! A status vector is the database's structured error/warning report: a
//! stream of tagged entries terminated by an end marker. Text-bearing tags
//! carry a string argument, the rest carry one numeric argument.

/// Engine status codes carried in status-vector entries.
///
/// Code `0` is success everywhere.
pub mod codes {
    pub const SUCCESS: u32 = 0;
    /// Generic failure reading from the remote end.
    pub const NETWORK_READ: u32 = 101;
    pub const NETWORK_WRITE: u32 = 102;
    pub const CONNECTION_RESET: u32 = 103;
    /// Auxiliary channel could not be established.
    pub const AUX_CONNECT: u32 = 104;
    /// The whole server is shutting down.
    pub const SHUTDOWN: u32 = 201;
    /// This attachment is shutting down.
    pub const ATTACHMENT_SHUTDOWN: u32 = 202;
    pub const OUT_OF_MEMORY: u32 = 301;
    pub const DEFLATE_INIT: u32 = 401;
    pub const INFLATE_INIT: u32 = 402;
    /// Client and server wire-crypt requirements cannot both be met.
    pub const WIRECRYPT_INCOMPATIBLE: u32 = 501;
    /// Peer rejected or failed the selected crypt plugin.
    pub const CRYPT_PLUGIN: u32 = 502;
}

/// One entry of a [`StatusVector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEntry {
    /// An error code; the first one is the primary error.
    Error(u32),
    /// A warning code; does not fail the operation.
    Warning(u32),
    /// Human-readable argument for the preceding code.
    Text(String),
    /// Numeric argument for the preceding code.
    Number(u32),
}

/// Wire tags of status-vector entries. `TAG_TEXT` is the string-bearing
/// tag; the end marker closes the vector.
pub(crate) const TAG_END: u32 = 0;
pub(crate) const TAG_ERROR: u32 = 1;
pub(crate) const TAG_WARNING: u32 = 2;
pub(crate) const TAG_TEXT: u32 = 3;
pub(crate) const TAG_NUMBER: u32 = 4;

impl StatusEntry {
    pub(crate) fn tag(&self) -> u32 {
        match self {
            Self::Error(_) => TAG_ERROR,
            Self::Warning(_) => TAG_WARNING,
            Self::Text(_) => TAG_TEXT,
            Self::Number(_) => TAG_NUMBER,
        }
    }
}

/// A decoded status vector.
///
/// The end marker is implicit: it terminates the wire form but is not
/// stored as an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusVector {
    entries: Vec<StatusEntry>,
}

impl StatusVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success() -> Self {
        Self { entries: vec![StatusEntry::Error(codes::SUCCESS)] }
    }

    pub fn error(code: u32) -> Self {
        Self { entries: vec![StatusEntry::Error(code)] }
    }

    pub fn push(&mut self, entry: StatusEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[StatusEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The primary error code: the first `Error` entry, or success when
    /// the vector carries none.
    pub fn primary_code(&self) -> u32 {
        self.entries
            .iter()
            .find_map(|e| match e {
                StatusEntry::Error(code) => Some(*code),
                _ => None,
            })
            .unwrap_or(codes::SUCCESS)
    }

    /// Whether the vector reports success, possibly with warnings.
    pub fn is_success(&self) -> bool {
        self.primary_code() == codes::SUCCESS
    }

    pub fn warnings(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().filter_map(|e| match e {
            StatusEntry::Warning(code) => Some(*code),
            _ => None,
        })
    }

    /// Re-walk the vector copying each entry with the argument count its
    /// tag implies, producing the normalized form handed to callers.
    ///
    /// Arguments that trail the final code-bearing entry without one are
    /// dropped, matching the walk a peer would perform.
    pub fn normalize(&self) -> StatusVector {
        let mut out = StatusVector::new();
        let mut it = self.entries.iter().peekable();

        while let Some(entry) = it.next() {
            match entry {
                StatusEntry::Error(_) | StatusEntry::Warning(_) => {
                    out.push(entry.clone());
                    // string-bearing continuation consumes the extra argument
                    while let Some(arg @ (StatusEntry::Text(_) | StatusEntry::Number(_))) =
                        it.peek()
                    {
                        out.push((*arg).clone());
                        it.next();
                    }
                }
                // argument without a leading code, drop
                StatusEntry::Text(_) | StatusEntry::Number(_) => {}
            }
        }

        out
    }
}

impl std::fmt::Display for StatusVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status {}", self.primary_code())?;
        for e in &self.entries {
            if let StatusEntry::Text(text) = e {
                write!(f, ": {text}")?;
            }
        }
        Ok(())
    }
}

/// An error reported by the remote database inside a response packet.
///
/// Database errors are results of the remote call, they never tear the
/// connection down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{vector}")]
pub struct DbError {
    pub vector: StatusVector,
}

impl DbError {
    pub fn new(vector: StatusVector) -> Self {
        Self { vector }
    }

    pub fn code(&self) -> u32 {
        self.vector.primary_code()
    }
}

/// The attachment saw a shutdown condition; remote calls short-circuit
/// instead of failing with a generic I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("attachment shutdown")]
pub struct AttachmentShutdown;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn primary_code_is_first_error() {
        let mut v = StatusVector::new();
        v.push(StatusEntry::Warning(7));
        v.push(StatusEntry::Error(codes::NETWORK_READ));
        v.push(StatusEntry::Error(codes::SHUTDOWN));
        assert_eq!(v.primary_code(), codes::NETWORK_READ);
        assert!(!v.is_success());
    }

    #[test]
    fn empty_vector_is_success() {
        assert!(StatusVector::new().is_success());
        assert!(StatusVector::success().is_success());
    }

    #[test]
    fn normalize_keeps_code_arguments() {
        let mut v = StatusVector::new();
        v.push(StatusEntry::Error(42));
        v.push(StatusEntry::Text("table unknown".into()));
        v.push(StatusEntry::Number(5));
        v.push(StatusEntry::Warning(9));

        let n = v.normalize();
        assert_eq!(n.entries().len(), 4);
        assert_eq!(n, v);
    }

    #[test]
    fn normalize_drops_leading_arguments() {
        let mut v = StatusVector::new();
        v.push(StatusEntry::Text("stray".into()));
        v.push(StatusEntry::Error(42));

        let n = v.normalize();
        assert_eq!(n.entries(), &[StatusEntry::Error(42)]);
    }

    #[test]
    fn warnings_iterates_only_warnings() {
        let mut v = StatusVector::success();
        v.push(StatusEntry::Warning(7));
        v.push(StatusEntry::Warning(8));
        assert_eq!(v.warnings().collect::<Vec<_>>(), vec![7, 8]);
    }
}
