use serde::Serialize;
use uuid::Uuid;

/// Central error type for the stock engine.
///
/// Every fallible operation in the crate returns `Result<_, StockError>`;
/// callers can branch on the variant to decide whether the failure is
/// recoverable (e.g. [`StockError::InsufficientStock`]) or must abort.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum StockError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i64,
        available: i64,
    },

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("Movement not found: {0}")]
    MovementNotFound(Uuid),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(
        #[from]
        #[serde(skip)]
        serde_json::Error,
    ),

    #[error("Partial commit: {0}")]
    PartialCommit(String),

    #[error("Event error: {0}")]
    Event(String),
}

impl From<validator::ValidationErrors> for StockError {
    fn from(err: validator::ValidationErrors) -> Self {
        StockError::Validation(err.to_string())
    }
}

impl StockError {
    /// Convenience constructor for substrate failures.
    pub fn store(message: impl Into<String>) -> Self {
        StockError::Store(message.into())
    }

    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, Self::InsufficientStock { .. })
    }

    /// True only for errors a caller may retry without changing the request.
    /// `Conflict` signals a concurrent writer got between plan and commit;
    /// the allocator re-plans on it internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_carries_quantities() {
        let product_id = Uuid::now_v7();
        let err = StockError::InsufficientStock {
            product_id,
            requested: 20,
            available: 15,
        };
        let msg = err.to_string();
        assert!(msg.contains("requested 20"));
        assert!(msg.contains("available 15"));
        assert!(err.is_insufficient_stock());
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_conflict_is_retryable() {
        assert!(StockError::Conflict("stale plan".into()).is_retryable());
        assert!(!StockError::Store("write failed".into()).is_retryable());
        assert!(!StockError::InvalidQuantity("0".into()).is_retryable());
    }

    #[test]
    fn validation_errors_convert() {
        use validator::Validate;

        #[derive(Validate)]
        struct Input {
            #[validate(range(min = 1))]
            quantity: i64,
        }

        let err: StockError = Input { quantity: 0 }.validate().unwrap_err().into();
        assert!(matches!(err, StockError::Validation(_)));
    }
}
