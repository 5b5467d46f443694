use lifeline_shared::CoreError;
use thiserror::Error;

/// Errors produced by the store layer.
///
/// Besides plumbing failures this enum carries the domain outcomes of the
/// call state machine, since the guards live in the same SQL statements that
/// enforce them.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A participant of the prospective call already has a non-terminal one.
    #[error("A participant is already in an active call")]
    AlreadyInCall,

    /// An unordered pair was given the same user on both sides.
    #[error("Both sides of the pair are the same user")]
    SelfPair,

    /// The requested transition is illegal from the record's current state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A compare-and-set affected zero rows after a valid read; the record
    /// changed concurrently.
    #[error("State changed concurrently")]
    StaleState,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A persisted row failed to decode (bad uuid, unknown status).
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CoreError::NotFound,
            StoreError::AlreadyInCall => CoreError::AlreadyInCall,
            StoreError::SelfPair => {
                CoreError::BadRequest("both sides of the pair are the same user".to_string())
            }
            StoreError::InvalidTransition(msg) => CoreError::InvalidTransition(msg),
            StoreError::StaleState => CoreError::StaleState,
            other => CoreError::Internal(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
