//! Error chain types
//!
//! Every failure in tsbridge is an [`Error`]: a tagged [`ErrorKind`], the
//! innermost [`Cause`], and the context messages added while the error
//! propagated outward. The rendered chain (outermost context first) is what
//! the host sees in the diagnostic frame and what the binary prints on stderr.
//!
//! ```text
//! executing command: performing query "SELECT ...": influxdb returned 400: error parsing query
//! ^ outermost context                                                        ^ innermost cause
//! ```

use std::fmt;
use thiserror::Error;

/// Classification of an error chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed header, metadata or action; aborts before any data is produced
    Protocol,
    /// The backing engine rejected or failed a query
    Execution,
    /// Stream read/write failed or was short
    Io,
    /// Configuration could not be loaded
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Protocol => write!(f, "protocol"),
            ErrorKind::Execution => write!(f, "execution"),
            ErrorKind::Io => write!(f, "io"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}

/// Innermost cause of an error chain
#[derive(Error, Debug)]
pub enum Cause {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Message(String),
}

impl From<String> for Cause {
    fn from(message: String) -> Self {
        Cause::Message(message)
    }
}

impl From<&str> for Cause {
    fn from(message: &str) -> Self {
        Cause::Message(message.to_string())
    }
}

/// A causal error chain
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    cause: Cause,
    /// Context messages, innermost first
    context: Vec<String>,
}

impl Error {
    /// Create a new chain from its innermost cause
    pub fn new(kind: ErrorKind, cause: impl Into<Cause>) -> Self {
        Self {
            kind,
            cause: cause.into(),
            context: Vec::new(),
        }
    }

    pub fn protocol(cause: impl Into<Cause>) -> Self {
        Self::new(ErrorKind::Protocol, cause)
    }

    pub fn execution(cause: impl Into<Cause>) -> Self {
        Self::new(ErrorKind::Execution, cause)
    }

    pub fn io(cause: impl Into<Cause>) -> Self {
        Self::new(ErrorKind::Io, cause)
    }

    pub fn config(cause: impl Into<Cause>) -> Self {
        Self::new(ErrorKind::Config, cause)
    }

    /// Wrap the chain in one more (outer) context message
    pub fn context(mut self, message: impl Into<String>) -> Self {
        self.context.push(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Is-a predicate on the chain's classification
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Context messages, innermost first
    pub fn context_messages(&self) -> &[String] {
        &self.context
    }

    /// True when the innermost cause is an I/O error of the given kind
    pub fn is_io_kind(&self, kind: std::io::ErrorKind) -> bool {
        matches!(&self.cause, Cause::Io(e) if e.kind() == kind)
    }

    /// Render the whole chain, outermost context first
    pub fn render_chain(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for message in self.context.iter().rev() {
            write!(f, "{}: ", message)?;
        }
        write!(f, "{}", self.cause)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::io(err)
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Adds context to the error of a `Result`
pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T>;

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(message))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
