//! Error taxonomy for Kulfi Ops.
//!
//! Two layers: `StoreError` for the document store adapter, `OpsError` for
//! the operations engine built on top of it. Store failures are wrapped per
//! logical operation — there is no automatic retry and no compensating
//! rollback of writes already dispatched (the intent log in `intents` is the
//! recovery path for partially applied write sets).

use thiserror::Error;

use crate::types::ProductType;

/// Failures from a `DocumentStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("store backend: {0}")]
    Backend(String),
}

/// Failures from the operations engine.
///
/// Tally mismatches (`denominationTotal != cash`, unexplained balance short)
/// are deliberately NOT errors: the engine exposes them as disabled-action
/// guards (`can_advance`, `can_close_cart`) instead.
#[derive(Debug, Error)]
pub enum OpsError {
    /// Bad or missing input. The operation was not attempted.
    #[error("{0}")]
    Validation(String),

    /// A warehouse-to-cart transfer exceeds the available quantity.
    /// Rejected before any write is issued.
    #[error("not enough {kind} stock in warehouse: requested {requested}, available {available}")]
    InsufficientStock {
        kind: ProductType,
        requested: i64,
        available: i64,
    },

    /// Start-Day attempted while yesterday's summary is still unclosed.
    #[error("day {date} is still unclosed; close it before starting a new day")]
    PriorDayUnclosed { date: String },

    /// Close-Day attempted while carts are still open.
    #[error("{open} cart(s) still open; close all carts before ending the day")]
    CartsStillOpen { open: usize },

    /// Delete attempted on an open cart.
    #[error("cart {id} is open and cannot be deleted")]
    CartOpen { id: String },

    /// A store call failed mid-operation. Writes already dispatched in the
    /// same logical operation are NOT rolled back.
    #[error("persistence: {0}")]
    Persistence(#[from] StoreError),
}

impl OpsError {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        OpsError::Validation(msg.into())
    }
}
