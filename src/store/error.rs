//! Portable store error taxonomy.
//!
//! Every backend fault is classified here, once. Code above the store
//! boundary matches on `StoreError` and never inspects driver errors.

use std::borrow::Cow;

/// Constraint name reported when a balance or amount leaves the `BIGINT` range.
pub const NUMERIC_OUT_OF_RANGE: &str = "numeric_value_out_of_range";

/// Failure of a store operation or of a transactional unit.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No row with the given key exists.
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    /// The backend detected a write-write conflict (serialization failure or
    /// deadlock victim). The whole unit was rolled back and may be retried.
    #[error("write conflict, transaction rolled back")]
    Conflict,

    /// Connectivity, pool, or driver fault.
    #[error("store unavailable: {0}")]
    Unavailable(Cow<'static, str>),

    /// A row lock or a pooled connection was not obtained in time.
    #[error("timed out waiting for a lock or connection")]
    Timeout,

    /// The caller cancelled the unit before it committed.
    #[error("transaction cancelled")]
    Cancelled,

    /// A unique, foreign-key or check constraint rejected the write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Map a sqlx error onto the portable taxonomy.
    ///
    /// SQLSTATE reference:
    /// - `40001` serialization_failure, `40P01` deadlock_detected → `Conflict`
    /// - `55P03` lock_not_available, `57014` query_canceled → `Timeout`
    /// - class `23` integrity violations and `22003` numeric overflow →
    ///   `ConstraintViolation`
    pub fn classify(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::not_found("row", "<unknown>"),
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".into()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                match code.as_str() {
                    "40001" | "40P01" => StoreError::Conflict,
                    "55P03" | "57014" => StoreError::Timeout,
                    "22003" => StoreError::ConstraintViolation(NUMERIC_OUT_OF_RANGE.to_string()),
                    c if c.starts_with("23") => StoreError::ConstraintViolation(
                        db_err
                            .constraint()
                            .map(str::to_string)
                            .unwrap_or_else(|| db_err.message().to_string()),
                    ),
                    _ => StoreError::Unavailable(
                        format!("database error {code}: {}", db_err.message()).into(),
                    ),
                }
            }
            other => StoreError::Unavailable(other.to_string().into()),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::classify(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_faults_are_classified() {
        assert!(matches!(
            StoreError::classify(sqlx::Error::PoolTimedOut),
            StoreError::Timeout
        ));
        assert!(matches!(
            StoreError::classify(sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::classify(sqlx::Error::Protocol("bad frame".into())),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn sqlstates_are_classified() {
        use crate::test_util::database_error;

        for code in ["40001", "40P01"] {
            assert!(
                matches!(StoreError::classify(database_error(code, None)), StoreError::Conflict),
                "{code}"
            );
        }
        for code in ["55P03", "57014"] {
            assert!(
                matches!(StoreError::classify(database_error(code, None)), StoreError::Timeout),
                "{code}"
            );
        }

        assert!(matches!(
            StoreError::classify(database_error("23505", Some("accounts_owner_currency_key"))),
            StoreError::ConstraintViolation(ref c) if c == "accounts_owner_currency_key"
        ));
        assert!(matches!(
            StoreError::classify(database_error("23514", Some("transfers_amount_check"))),
            StoreError::ConstraintViolation(ref c) if c == "transfers_amount_check"
        ));
        // No constraint name: the driver message stands in.
        assert!(matches!(
            StoreError::classify(database_error("23502", None)),
            StoreError::ConstraintViolation(ref c) if c == "simulated database error"
        ));
        assert!(matches!(
            StoreError::classify(database_error("22003", None)),
            StoreError::ConstraintViolation(ref c) if c == NUMERIC_OUT_OF_RANGE
        ));

        for code in ["08006", "53300", "XX000"] {
            assert!(
                matches!(
                    StoreError::classify(database_error(code, None)),
                    StoreError::Unavailable(_)
                ),
                "{code}"
            );
        }
    }

    #[test]
    fn not_found_message_names_the_row() {
        assert_eq!(
            StoreError::not_found("account", 42).to_string(),
            "account 42 not found"
        );
    }
}
