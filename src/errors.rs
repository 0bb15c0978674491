use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::ledger_entry::MovementKind;
use crate::entities::reservation::ReservationState;

/// One failing item inside a batch operation. Carried by
/// [`StockError::BatchPartialFailure`] so callers can react per item
/// instead of seeing the whole cart fail opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Position of the failing item in the submitted batch.
    pub index: usize,
    pub product_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub requested: i32,
    pub available: Option<i32>,
    pub reason: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum StockError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        branch_id: Option<Uuid>,
        requested: i32,
        available: i32,
    },

    #[error("Movement kind {kind:?} does not allow quantity {quantity}")]
    InvalidMovementDirection { kind: MovementKind, quantity: i32 },

    #[error("Reservation {id} is not active (state: {state:?})")]
    ReservationNotActive { id: Uuid, state: ReservationState },

    #[error("Reservation {0} not found")]
    ReservationNotFound(Uuid),

    #[error("Stock item not found for product {product_id}")]
    StockItemNotFound {
        product_id: Uuid,
        branch_id: Option<Uuid>,
    },

    #[error("{} item(s) in batch failed", .0.len())]
    BatchPartialFailure(Vec<BatchFailure>),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Invalid TTL: {0} minutes")]
    InvalidTtl(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for StockError {
    fn from(err: validator::ValidationErrors) -> Self {
        StockError::ValidationError(err.to_string())
    }
}

impl StockError {
    /// Normalizes any database-ish error into the `DatabaseError` variant.
    pub fn db_error(error: DbErr) -> Self {
        StockError::DatabaseError(error)
    }

    /// True for store-level contention failures that may be retried with a
    /// bounded number of attempts. Business-rule violations are never
    /// retryable: a reservation or ledger write is a user-significant fact.
    pub fn is_retryable(&self) -> bool {
        match self {
            StockError::DatabaseError(db_err) => {
                let msg = db_err.to_string().to_lowercase();
                msg.contains("deadlock")
                    || msg.contains("could not serialize")
                    || msg.contains("lock wait timeout")
                    || msg.contains("database is locked")
            }
            _ => false,
        }
    }

    /// Stable machine-readable code for logs and upstream error mapping.
    pub fn code(&self) -> &'static str {
        match self {
            StockError::DatabaseError(_) => "database_error",
            StockError::InsufficientStock { .. } => "insufficient_stock",
            StockError::InvalidMovementDirection { .. } => "invalid_movement_direction",
            StockError::ReservationNotActive { .. } => "reservation_not_active",
            StockError::ReservationNotFound(_) => "reservation_not_found",
            StockError::StockItemNotFound { .. } => "stock_item_not_found",
            StockError::BatchPartialFailure(_) => "batch_partial_failure",
            StockError::InvalidQuantity(_) => "invalid_quantity",
            StockError::InvalidTtl(_) => "invalid_ttl",
            StockError::ValidationError(_) => "validation_error",
            StockError::EventError(_) => "event_error",
            StockError::InternalError(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_covers_contention_only() {
        let deadlock = StockError::DatabaseError(DbErr::Custom(
            "Deadlock found when trying to get lock".into(),
        ));
        assert!(deadlock.is_retryable());

        let locked = StockError::DatabaseError(DbErr::Custom("database is locked".into()));
        assert!(locked.is_retryable());

        let shortfall = StockError::InsufficientStock {
            product_id: Uuid::new_v4(),
            branch_id: None,
            requested: 5,
            available: 3,
        };
        assert!(!shortfall.is_retryable());
    }

    #[test]
    fn insufficient_stock_names_the_item() {
        let product_id = Uuid::new_v4();
        let err = StockError::InsufficientStock {
            product_id,
            branch_id: None,
            requested: 7,
            available: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains(&product_id.to_string()));
        assert!(msg.contains("requested 7"));
        assert!(msg.contains("available 2"));
    }
}
