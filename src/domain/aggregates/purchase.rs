//! Purchase ledger rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus { #[default] Pending, Completed, Failed }

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Completed => "completed", Self::Failed => "failed" }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value { "pending" => Some(Self::Pending), "completed" => Some(Self::Completed), "failed" => Some(Self::Failed), _ => None }
    }
}

/// Ledger identity of one line within one payment. Ledger writes are idempotent on
/// `(payment_ref, line_key)`.
pub fn rank_line_key(rank_id: Uuid) -> String { format!("rank:{rank_id}") }
pub fn cart_line_key(cart_item_id: Uuid) -> String { format!("cart:{cart_item_id}") }

/// Durable record that a user obtained (or failed to obtain) a rank through a payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPurchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub rank_id: Option<Uuid>,
    pub amount: Money,
    pub payment_ref: String,
    pub line_key: String,
    pub status: PurchaseStatus,
    pub is_gift: bool,
    pub gifted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl UserPurchase {
    pub fn new(user_id: Uuid, rank_id: Uuid, amount: Money, payment_ref: impl Into<String>, line_key: impl Into<String>, status: PurchaseStatus) -> Self {
        Self {
            id: Uuid::now_v7(), user_id, rank_id: Some(rank_id), amount, payment_ref: payment_ref.into(), line_key: line_key.into(),
            status, is_gift: false, gifted_by: None, created_at: Utc::now(),
        }
    }

    /// Marks this row as a gift paid for by `payer`.
    pub fn gifted_by(mut self, payer: Uuid) -> Self {
        self.is_gift = true;
        self.gifted_by = Some(payer);
        self
    }

    pub fn is_completed(&self) -> bool { self.status == PurchaseStatus::Completed }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreItemPurchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub store_item_id: Option<Uuid>,
    pub quantity: u32,
    pub amount: Money,
    pub payment_ref: String,
    pub line_key: String,
    pub status: PurchaseStatus,
    pub created_at: DateTime<Utc>,
}

impl StoreItemPurchase {
    pub fn new(user_id: Uuid, store_item_id: Uuid, quantity: u32, amount: Money, payment_ref: impl Into<String>, line_key: impl Into<String>, status: PurchaseStatus) -> Self {
        Self {
            id: Uuid::now_v7(), user_id, store_item_id: Some(store_item_id), quantity, amount,
            payment_ref: payment_ref.into(), line_key: line_key.into(), status, created_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool { self.status == PurchaseStatus::Completed }
}

/// Outcome of an idempotent ledger write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerWrite {
    Inserted,
    /// A row with the same payment line, or a completed row for the same (user, rank), already exists.
    Duplicate,
}

/// Append-only diagnostic row for fulfillment problems.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookError {
    pub id: Uuid,
    pub event_type: String,
    pub session_id: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

impl WebhookError {
    pub fn new(event_type: impl Into<String>, session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self { id: Uuid::now_v7(), event_type: event_type.into(), session_id: session_id.into(), error: error.into(), created_at: Utc::now() }
    }
}
