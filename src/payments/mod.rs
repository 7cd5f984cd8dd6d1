//! Hosted payment processor boundary.
//!
//! Outbound: one checkout session per purchase, carrying typed metadata that
//! lets fulfillment replay the purchase without re-deriving prices.
//! Inbound: signed webhook events, see [`webhook`].

pub mod stripe;
pub mod webhook;

pub use stripe::StripeClient;
pub use webhook::{EventKind, EventObject, WebhookEvent, WebhookVerifier};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;
use crate::domain::value_objects::Money;
use crate::{Result, StoreError};

mod keys {
    pub const USER_ID: &str = "user_id";
    pub const RANK_ID: &str = "rank_id";
    pub const ORIGINAL_PRICE: &str = "original_price";
    pub const DISCOUNTED_PRICE: &str = "discounted_price";
    pub const PREVIOUS_RANK_ID: &str = "previous_rank_id";
    pub const IS_GIFT: &str = "is_gift";
    pub const RECIPIENT_ID: &str = "recipient_id";
    pub const RECIPIENT_USERNAME: &str = "recipient_username";
    pub const CART_ITEMS: &str = "cart_items";
}

/// What a payment session pays for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurchaseMetadata {
    Rank { user_id: Uuid, rank_id: Uuid, original_price: Money, discounted_price: Money, previous_rank_id: Option<Uuid> },
    Gift { user_id: Uuid, rank_id: Uuid, price: Money, recipient_id: Uuid, recipient_username: String },
    Cart { user_id: Uuid, cart_item_ids: Vec<Uuid> },
}

impl PurchaseMetadata {
    /// The paying user.
    pub fn buyer(&self) -> Uuid {
        match self {
            Self::Rank { user_id, .. } | Self::Gift { user_id, .. } | Self::Cart { user_id, .. } => *user_id,
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(keys::USER_ID.into(), self.buyer().to_string());
        match self {
            Self::Rank { rank_id, original_price, discounted_price, previous_rank_id, .. } => {
                map.insert(keys::RANK_ID.into(), rank_id.to_string());
                map.insert(keys::ORIGINAL_PRICE.into(), original_price.to_string());
                map.insert(keys::DISCOUNTED_PRICE.into(), discounted_price.to_string());
                if let Some(prev) = previous_rank_id { map.insert(keys::PREVIOUS_RANK_ID.into(), prev.to_string()); }
            }
            Self::Gift { rank_id, price, recipient_id, recipient_username, .. } => {
                map.insert(keys::RANK_ID.into(), rank_id.to_string());
                map.insert(keys::ORIGINAL_PRICE.into(), price.to_string());
                map.insert(keys::DISCOUNTED_PRICE.into(), price.to_string());
                map.insert(keys::IS_GIFT.into(), "true".into());
                map.insert(keys::RECIPIENT_ID.into(), recipient_id.to_string());
                map.insert(keys::RECIPIENT_USERNAME.into(), recipient_username.clone());
            }
            Self::Cart { cart_item_ids, .. } => {
                let ids: Vec<String> = cart_item_ids.iter().map(Uuid::to_string).collect();
                map.insert(keys::CART_ITEMS.into(), serde_json::Value::from(ids).to_string());
            }
        }
        map
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let user_id = uuid_field(map, keys::USER_ID)?;
        if let Some(raw) = map.get(keys::CART_ITEMS) {
            let cart_item_ids: Vec<Uuid> = serde_json::from_str(raw)
                .map_err(|e| StoreError::MalformedPayload(format!("{}: {e}", keys::CART_ITEMS)))?;
            return Ok(Self::Cart { user_id, cart_item_ids });
        }
        let rank_id = uuid_field(map, keys::RANK_ID)?;
        let discounted_price = money_field(map, keys::DISCOUNTED_PRICE)?;
        if map.get(keys::IS_GIFT).is_some_and(|v| v == "true") {
            return Ok(Self::Gift {
                user_id,
                rank_id,
                price: discounted_price,
                recipient_id: uuid_field(map, keys::RECIPIENT_ID)?,
                recipient_username: field(map, keys::RECIPIENT_USERNAME)?.to_string(),
            });
        }
        Ok(Self::Rank {
            user_id,
            rank_id,
            original_price: money_field(map, keys::ORIGINAL_PRICE)?,
            discounted_price,
            previous_rank_id: map.get(keys::PREVIOUS_RANK_ID).map(|v| parse_uuid(keys::PREVIOUS_RANK_ID, v)).transpose()?,
        })
    }
}

fn field<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    map.get(key).map(String::as_str).ok_or_else(|| StoreError::MalformedPayload(format!("missing metadata field {key}")))
}

fn parse_uuid(key: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::MalformedPayload(format!("{key}: {e}")))
}

fn uuid_field(map: &HashMap<String, String>, key: &str) -> Result<Uuid> { parse_uuid(key, field(map, key)?) }

fn money_field(map: &HashMap<String, String>, key: &str) -> Result<Money> {
    field(map, key)?.parse::<Money>().map_err(|e| StoreError::MalformedPayload(format!("{key}: {e}")))
}

/// Outbound payment session request.
#[derive(Clone, Debug)]
pub struct SessionRequest {
    /// Total charge in minor currency units.
    pub unit_amount: i64,
    pub product_name: String,
    pub description: String,
    pub metadata: PurchaseMetadata,
    pub success_url: String,
    pub cancel_url: String,
}

/// Session created by the processor; the buyer is redirected to `url`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatedSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> Result<CreatedSession>;
}
