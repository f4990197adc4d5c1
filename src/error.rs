use thiserror::Error;

/// Everything a poll operation can fail with.
///
/// The vote-state variants carry messages meant to be shown to the voter as-is.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Poll not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("You have already voted for this option.")]
    AlreadyVoted,

    #[error("You have already voted. Clear your response to change your vote.")]
    ConflictingVote,

    #[error("You have not voted yet.")]
    NoActiveVote,

    #[error("Your vote has changed since this page was loaded. Refresh the poll and try again.")]
    StaleVote,

    #[error("The poll is busy, please retry shortly.")]
    Busy,

    #[error("Poll state is inconsistent: {0}")]
    Corrupted(String),

    #[error("Storage error: {0}")]
    Storage(#[source] sqlx::Error),
}

impl From<sqlx::Error> for PollError {
    /// Waiting out the storage lock or the connection pool is contention, not failure.
    fn from(err: sqlx::Error) -> Self {
        let contended = match &err {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db) => is_lock_contention(db.code().as_deref()),
            _ => false,
        };

        if contended {
            PollError::Busy
        } else {
            PollError::Storage(err)
        }
    }
}

// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes such as 517.
fn is_lock_contention(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok()).is_some_and(|c| matches!(c & 0xff, 5 | 6))
}

impl PollError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        PollError::InvalidArgument(msg.into())
    }

    pub fn corrupted(msg: impl Into<String>) -> Self {
        PollError::Corrupted(msg.into())
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PollError::Busy)
    }

    /// True for errors caused by server state rather than by the request.
    pub fn is_internal(&self) -> bool {
        matches!(self, PollError::Corrupted(_) | PollError::Storage(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}
