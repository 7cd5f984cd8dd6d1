//! Cart line aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{DiscountPercent, LineQuantity, Money, QuantityAdjustment};

/// What a cart line holds. A line is either a rank or a store item, never both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CartLine {
    Rank { rank_id: Uuid },
    StoreItem { store_item_id: Uuid, quantity: LineQuantity },
}

/// Price captured when a rank was added, so checkout and fulfillment charge what the buyer saw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub original_price: Money,
    pub discounted_price: Money,
    pub discount_percent: DiscountPercent,
    pub previous_rank_id: Option<Uuid>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub line: CartLine,
    pub snapshot: Option<PricingSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl CartItem {
    pub fn rank(user_id: Uuid, rank_id: Uuid, snapshot: Option<PricingSnapshot>) -> Self {
        Self { id: Uuid::now_v7(), user_id, line: CartLine::Rank { rank_id }, snapshot, created_at: Utc::now() }
    }

    pub fn store_item(user_id: Uuid, store_item_id: Uuid, quantity: LineQuantity) -> Self {
        Self { id: Uuid::now_v7(), user_id, line: CartLine::StoreItem { store_item_id, quantity }, snapshot: None, created_at: Utc::now() }
    }

    pub fn rank_id(&self) -> Option<Uuid> {
        match self.line { CartLine::Rank { rank_id } => Some(rank_id), CartLine::StoreItem { .. } => None }
    }

    pub fn store_item_id(&self) -> Option<Uuid> {
        match self.line { CartLine::StoreItem { store_item_id, .. } => Some(store_item_id), CartLine::Rank { .. } => None }
    }

    /// Units on this line; rank lines are always one.
    pub fn quantity(&self) -> LineQuantity {
        match self.line { CartLine::Rank { .. } => LineQuantity::ONE, CartLine::StoreItem { quantity, .. } => quantity }
    }

    pub fn belongs_to(&self, user_id: Uuid) -> bool { self.user_id == user_id }

    /// Sets a new quantity on a store-item line. Rank lines cannot change quantity.
    pub fn set_quantity(&mut self, requested: i64) -> Result<Option<QuantityAdjustment>, CartError> {
        match &mut self.line {
            CartLine::Rank { .. } => Err(CartError::RankQuantityFixed),
            CartLine::StoreItem { quantity, .. } => {
                let (q, note) = LineQuantity::clamp(requested);
                *quantity = q;
                Ok(note)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { RankQuantityFixed }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Rank quantity cannot be changed") }
}
