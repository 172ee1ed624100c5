//! # Persistence Errors
//!
//! `DbError` classifies what SQLite reported so the engine can tell a
//! caller mistake (duplicate SKU or sale number) from a storage fault.
//!
//! ```text
//!   sqlx::Error ──► DbError ──► EngineError::Db ──► ErrorKind
//!                                                    VALIDATION   (UniqueViolation)
//!                                                    CONSISTENCY  (Conflict, CheckViolation)
//!                                                    PERSISTENCE  (everything else)
//! ```

use thiserror::Error;

/// Failure of a repository call.
#[derive(Debug, Error)]
pub enum DbError {
    /// No row with that id (or not in the requested shop).
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation (duplicate SKU, duplicate sale number).
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// A row references a product, sale or customer that does not exist.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// CHECK constraint violation (negative stock, over-refund, ...).
    ///
    /// The engine's guarded writes should make these unreachable; seeing one
    /// means an invariant was about to be broken and the write was refused.
    #[error("Check constraint violated: {message}")]
    CheckViolation { message: String },

    /// A guarded write matched no row although the preceding read said it
    /// should have.
    #[error("Concurrent modification of {entity} {id}")]
    Conflict { entity: String, id: String },

    /// Opening the SQLite file failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Any other statement failure reported by SQLite.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked by another writer past the busy timeout.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Transaction begin/commit failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// No connection became free within the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Conflict error for a guarded write that matched nothing.
    pub fn conflict(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::Conflict {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True for lock contention and pool exhaustion.
    pub fn is_contention(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }
}

/// SQLite only reports constraint failures as text
/// (`"<KIND> constraint failed: <table.column>"`), so database errors are
/// classified by message.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("row", "?"),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                if msg.contains("UNIQUE constraint failed") {
                    let column = msg.rsplit(": ").next().unwrap_or(msg);
                    DbError::UniqueViolation {
                        field: column.to_string(),
                        value: String::new(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("CHECK constraint failed") {
                    DbError::CheckViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("database is locked") || msg.contains("database is busy") {
                    DbError::Busy(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("database closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
