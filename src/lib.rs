//! GeoMC Store
//!
//! Storefront for the GeoMC Towny server.
//!
//! ## Features
//! - Rank ladder with upgrade credit
//! - Cosmetic and utility store items with tiered discounts
//! - Per-user cart
//! - Hosted card checkout (single rank, gift, or whole cart)
//! - Webhook-driven fulfillment with in-game rank application over RCON

pub mod api;
pub mod config;
pub mod domain;
pub mod minecraft;
pub mod payments;
pub mod services;
pub mod storage;

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Rank already owned")]
    AlreadyOwned,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Payment processor error: {0}")]
    PaymentProcessor(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
