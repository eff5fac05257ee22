use std::fmt;

/// Error kinds raised by the vector index manager.
///
/// Errors propagate upward unchanged; the manager never swallows a build or
/// replay failure.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("raft node not found for region {0}")]
    RaftNotFound(u64),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The handle refused the operation because it is offline (mid rebuild
    /// write-freeze window).
    #[error("index handle for region {0} is offline")]
    Offline(u64),

    /// A `set_status` call attempted a transition the status machine does
    /// not allow.
    #[error("illegal status transition for region {region_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        region_id: u64,
        from: crate::status::IndexStatus,
        to: crate::status::IndexStatus,
    },
}

pub type ManagerResult<T> = Result<T, ManagerError>;

/// A coarse error-kind taxonomy for callers that want to branch on kind
/// rather than match the full enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Ok,
    Internal,
    RaftNotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Ok => write!(f, "OK"),
            ErrorKind::Internal => write!(f, "EINTERNAL"),
            ErrorKind::RaftNotFound => write!(f, "ERAFT_NOT_FOUND"),
        }
    }
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::RaftNotFound(_) => ErrorKind::RaftNotFound,
            _ => ErrorKind::Internal,
        }
    }
}
