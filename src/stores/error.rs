const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// State store error with retry classification
///
/// Backends return this error type to tell callers whether the failure is transient.
/// The status tracker uses `is_unavailable()` to decide between retrying the same event
/// (without committing its offset) and skipping it.
///
/// # Error Classification
///
/// **Retryable / unavailable (is_retryable = true)**:
/// - Database busy/locked
/// - Connection or pool timeouts
/// - I/O failures
///
/// **Permanent (is_retryable = false)**:
/// - Constraint violations (duplicate order id)
/// - Corrupt rows (unrecognized status label, invalid JSON details)
/// - Invalid arguments (unknown retention column)
/// - Any other database-reported error (missing table, SQL errors)
///
/// A missing order is never an error: lookups return `Ok(None)`.
///
/// # Example Usage
///
/// ```rust
/// use orderflow::stores::StoreError;
///
/// let busy = StoreError::retryable("upsert_status", "database is locked");
/// assert!(busy.is_unavailable());
///
/// let dup = StoreError::permanent("add_order", "order already exists");
/// assert!(!dup.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// Operation that failed (e.g., "get_order_id", "mark_stuck_if_present")
    pub operation: String,
    /// Human-readable error message
    pub message: String,
    /// Whether this error should be retried
    pub retryable: bool,
}

impl StoreError {
    /// Create a retryable (transient) error: the store is unavailable right now.
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable (permanent) error
    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// The "store unavailable" condition. Callers must not treat it as "order not found".
    pub fn is_unavailable(&self) -> bool {
        self.retryable
    }

    /// Convert a sqlx error, classifying by failure kind.
    pub(crate) fn from_sqlx(operation: &str, e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                return StoreError::retryable(operation, format!("Connection error: {e}"));
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                return StoreError::permanent(operation, format!("Corrupt row: {e}"));
            }
            sqlx::Error::Database(db) => {
                // SQLite reports extended result codes; the low byte is the primary code
                let primary = db.code().and_then(|c| c.parse::<i32>().ok()).map(|c| c & 0xff);
                if matches!(primary, Some(SQLITE_BUSY | SQLITE_LOCKED)) || db.message().contains("database is locked") {
                    return StoreError::retryable(operation, format!("Database locked: {e}"));
                }
                if db.is_unique_violation() {
                    return StoreError::permanent(operation, format!("Constraint violation: {e}"));
                }
                // schema and SQL errors do not go away on retry
                return StoreError::permanent(operation, format!("Database error: {e}"));
            }
            _ => {}
        }

        let error_msg = e.to_string();

        // SQLITE_BUSY (database locked)
        if error_msg.contains("database is locked") || error_msg.contains("SQLITE_BUSY") {
            return StoreError::retryable(operation, format!("Database locked: {error_msg}"));
        }

        if error_msg.contains("UNIQUE constraint") || error_msg.contains("PRIMARY KEY") {
            return StoreError::permanent(operation, format!("Constraint violation: {error_msg}"));
        }

        if error_msg.contains("connection") || error_msg.contains("timeout") {
            return StoreError::retryable(operation, format!("Connection error: {error_msg}"));
        }

        // Default: treat as retryable (conservative approach)
        StoreError::retryable(operation, error_msg)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.retryable { "unavailable" } else { "permanent" };
        write!(f, "{} ({kind}): {}", self.operation, self.message)
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        let retryable = StoreError::retryable("get_order_id", "Database is busy");
        assert!(retryable.is_retryable());
        assert!(retryable.is_unavailable());
        assert_eq!(retryable.operation, "get_order_id");

        let permanent = StoreError::permanent("add_order", "Duplicate order");
        assert!(!permanent.is_retryable());
        assert!(!permanent.is_unavailable());

        let display = format!("{permanent}");
        assert!(display.contains("add_order"));
        assert!(display.contains("permanent"));
        assert!(display.contains("Duplicate"));

        let _err: Box<dyn std::error::Error> = Box::new(permanent);
    }

    #[test]
    fn test_sqlx_error_mapping() {
        let pool = StoreError::from_sqlx("upsert_status", sqlx::Error::PoolTimedOut);
        assert!(pool.is_unavailable());
        assert_eq!(pool.operation, "upsert_status");

        let missing = StoreError::from_sqlx("get_order_id", sqlx::Error::RowNotFound);
        // unclassified errors default to retryable
        assert!(missing.is_retryable());

        let protocol = StoreError::from_sqlx("add_order", sqlx::Error::Protocol("UNIQUE constraint failed".into()));
        assert!(!protocol.is_retryable());
    }

    #[test]
    fn test_store_error_equality() {
        let err1 = StoreError::retryable("op", "msg");
        let err2 = StoreError::retryable("op", "msg");
        let err3 = StoreError::permanent("op", "msg");

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
