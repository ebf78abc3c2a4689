//! Storage error types (§6 Error surface, §7 Error handling design).

/// Errors that can occur during storage operations.
///
/// Variants correspond to the error kinds a caller dispatches on (§6, §7):
/// `NotFound`, `AlreadyExists`, `UniqueViolation`, `ValidationError`,
/// `CycleDetected`, `InvalidParentChildDirection`, `SelfDependency`,
/// `DatabaseUninitialised`, `IoError`.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g., "issue", "config").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// An entity with the same identity already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        entity: String,
        id: String,
    },

    /// A caller-supplied identifier or external-ref collided with an existing row.
    #[error("unique constraint violated on {field}: {value}")]
    UniqueViolation {
        field: String,
        value: String,
    },

    /// A field-level validation constraint was violated (§3).
    #[error("validation error: {message}")]
    ValidationError {
        message: String,
    },

    /// Adding a dependency would create a cycle in the dependency graph (§4.4).
    ///
    /// Carries the would-be cycle's path, e.g. `["bd-1", "bd-2", "bd-1"]`.
    #[error("adding this dependency would create a cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// A `parent-child` edge was proposed in the wrong direction (epic as child).
    #[error("invalid parent-child direction: {message}")]
    InvalidParentChildDirection { message: String },

    /// An edge was proposed from an issue to itself.
    #[error("issue {id} cannot depend on itself")]
    SelfDependency { id: String },

    /// The database is missing required configuration on a non-empty database.
    #[error("database not initialised: {reason}")]
    DatabaseUninitialised { reason: String },

    /// Wrapped engine-level I/O failure (filesystem, connection, busy-timeout).
    #[error("I/O error: {0}")]
    IoError(String),

    /// The database is locked by another process (caller-retryable, §7).
    #[error("database locked: {0}")]
    DatabaseLocked(String),

    /// A schema migration failed.
    #[error("migration {name} failed: {reason}")]
    Migration { name: String, reason: String },

    /// Failed to open or configure the database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction could not be started, committed, or rolled back.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The database has not had its schema bootstrapped yet.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// A raw SQLite query error.
    #[error("query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StorageError::NotFound`] for the given entity kind and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::AlreadyExists`] for the given entity kind and id.
    pub fn already_exists(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::ValidationError`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Creates a [`StorageError::CycleDetected`] carrying the offending path.
    pub fn cycle(path: Vec<String>) -> Self {
        Self::CycleDetected { path }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a [`StorageError::CycleDetected`].
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CycleDetected { .. })
    }

    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry (database locked, I/O). Cycle detection and validation
    /// errors are non-retryable (§7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DatabaseLocked(_) | Self::IoError(_))
    }
}
