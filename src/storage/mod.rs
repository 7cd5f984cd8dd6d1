//! Persistence seam for the store.
//!
//! [`PgStore`] is the production backend; [`MemoryStore`] backs tests and
//! database-less local runs. Both enforce the same uniqueness rules, so ledger
//! idempotency is a storage guarantee rather than caller discipline.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;
use crate::domain::aggregates::{CartItem, LedgerWrite, Rank, StoreItem, StoreItemPurchase, UserProfile, UserPurchase, WebhookError};
use crate::domain::value_objects::{LineQuantity, QuantityAdjustment};
use crate::Result;

/// Result of adding store-item units to a cart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreLineWrite {
    pub item: CartItem,
    pub created: bool,
    pub adjustment: Option<QuantityAdjustment>,
}

#[async_trait]
pub trait Storefront: Send + Sync {
    async fn list_ranks(&self) -> Result<Vec<Rank>>;
    async fn rank(&self, id: Uuid) -> Result<Option<Rank>>;
    async fn list_store_items(&self) -> Result<Vec<StoreItem>>;
    async fn store_item(&self, id: Uuid) -> Result<Option<StoreItem>>;

    /// Ranks the user holds through a completed purchase.
    async fn owned_ranks(&self, user_id: Uuid) -> Result<Vec<Rank>>;

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>>;
    /// Case-insensitive lookup by in-game name.
    async fn profile_by_username(&self, username: &str) -> Result<Option<UserProfile>>;
    /// Creates or replaces a profile. Fails with a validation error when another
    /// profile already claims the username.
    async fn save_profile(&self, profile: &UserProfile) -> Result<()>;

    async fn cart_items(&self, user_id: Uuid) -> Result<Vec<CartItem>>;
    async fn cart_item(&self, id: Uuid) -> Result<Option<CartItem>>;
    /// Inserts a rank line. Returns `false` when the user already has this rank in their cart.
    async fn insert_rank_line(&self, item: &CartItem) -> Result<bool>;
    /// Creates a store-item line or adds to the existing one, capped at the line maximum.
    async fn add_store_line(&self, user_id: Uuid, store_item_id: Uuid, quantity: LineQuantity) -> Result<StoreLineWrite>;
    async fn set_line_quantity(&self, user_id: Uuid, id: Uuid, quantity: LineQuantity) -> Result<bool>;
    async fn delete_cart_item(&self, user_id: Uuid, id: Uuid) -> Result<bool>;

    /// Whether either ledger already holds this payment line.
    async fn ledger_contains(&self, payment_ref: &str, line_key: &str) -> Result<bool>;
    async fn record_rank_purchase(&self, purchase: &UserPurchase) -> Result<LedgerWrite>;
    /// Records a store-item purchase. A newly inserted completed row decrements stock in
    /// the same unit of work; unlimited items are left untouched.
    async fn record_store_purchase(&self, purchase: &StoreItemPurchase) -> Result<LedgerWrite>;
    async fn rank_purchases(&self, user_id: Uuid) -> Result<Vec<UserPurchase>>;
    async fn store_purchases(&self, user_id: Uuid) -> Result<Vec<StoreItemPurchase>>;

    async fn record_webhook_error(&self, error: &WebhookError) -> Result<()>;
}
