use thiserror::Error;

/// Error taxonomy for the block substrate.
///
/// Each variant corresponds to one of the failure classes named by the
/// component design: OS-level I/O failures, resource exhaustion, allocator
/// exhaustion, malformed configuration, and broken internal invariants.
#[derive(Error, Debug)]
pub enum Error {
    /// OS-level I/O failure (read, write, open, mmap, aio submit/reap).
    /// Carries a description and, where available, the originating errno.
    #[error("I/O error: {0}")]
    Io(String),

    /// Out-of-memory, AIO ring exhaustion, or thread creation failure.
    #[error("resource error: {0}")]
    Resource(String),

    /// The block allocator for a disk is exhausted and cannot grow.
    #[error("block allocator exhausted: {0}")]
    BadExtAlloc(String),

    /// A disk configuration line or open-mode flag combination is malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A contract internal to the substrate was violated (double free,
    /// double completion, use of a destroyed request). Debug-only class:
    /// production builds may choose to log and continue rather than abort.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl Error {
    pub fn io<S: Into<String>>(msg: S) -> Self {
        Error::Io(msg.into())
    }

    pub fn resource<S: Into<String>>(msg: S) -> Self {
        Error::Resource(msg.into())
    }

    pub fn bad_ext_alloc<S: Into<String>>(msg: S) -> Self {
        Error::BadExtAlloc(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Error::Invariant(msg.into())
    }

    /// True for the classes a caller might reasonably retry (I/O, resource
    /// exhaustion); false for configuration and invariant failures, which
    /// are bugs rather than transient conditions.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Resource(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
