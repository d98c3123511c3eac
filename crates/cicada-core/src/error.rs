use std::fmt;

/// Machine-readable error codes for scripted and agent-driven callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    AmbiguousMatch,
    Conflict,
    CorruptStorage,
    Io,
    Locked,
    Internal,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidInput => "E2001",
            Self::NotFound => "E2002",
            Self::AmbiguousMatch => "E2003",
            Self::Conflict => "E2004",
            Self::CorruptStorage => "E3001",
            Self::Io => "E5001",
            Self::Locked => "E5002",
            Self::Internal => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidInput => "Invalid input",
            Self::NotFound => "Not found",
            Self::AmbiguousMatch => "Ambiguous match",
            Self::Conflict => "Merge conflict",
            Self::CorruptStorage => "Corrupt storage",
            Self::Io => "I/O failure",
            Self::Locked => "Repository locked",
            Self::Internal => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::InvalidInput => None,
            Self::NotFound => None,
            Self::AmbiguousMatch => Some("Use a longer id prefix to disambiguate."),
            Self::Conflict => Some("The remote history violates a bug invariant; inspect both replicas."),
            Self::CorruptStorage => Some("The object store holds data this version cannot read."),
            Self::Io => Some("Check disk space and permissions."),
            Self::Locked => Some("Retry after the other process releases the repository."),
            Self::Internal => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Crate-wide error type.
///
/// Every failure surfaced by this crate is one of these kinds. Module-local
/// error enums (validation, codec, lock, query parse) convert into the
/// matching kind via `From`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A bug, identity or operation does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// What was looked up ("bug", "identity", "operation", ...).
        kind: &'static str,
        /// The id or prefix that failed to resolve.
        id: String,
    },

    /// A prefix or metadata lookup matched more than one entity.
    #[error("multiple matches for {query}: {}", matches.join(", "))]
    AmbiguousMatch {
        /// The prefix or metadata description used for the lookup.
        query: String,
        /// Every id that matched.
        matches: Vec<String>,
    },

    /// A merge violated a bug invariant.
    #[error("merge conflict: {0}")]
    Conflict(String),

    /// The object store or filesystem holds data of an unexpected shape.
    #[error("corrupt storage: {0}")]
    CorruptStorage(String),

    /// An object store or filesystem operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Another process holds the repository lock.
    #[error("repository locked by running process {pid}")]
    Locked {
        /// Pid found in the lock file.
        pid: u32,
    },

    /// A precondition was broken; treated as fatal.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Return the machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AmbiguousMatch { .. } => ErrorCode::AmbiguousMatch,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::CorruptStorage(_) => ErrorCode::CorruptStorage,
            Self::Io(_) => ErrorCode::Io,
            Self::Locked { .. } => ErrorCode::Locked,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Optional remediation hint for this error.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
