//! In-memory storefront

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;
use crate::domain::aggregates::{CartItem, CartLine, LedgerWrite, Rank, StoreItem, StoreItemPurchase, UserProfile, UserPurchase, WebhookError};
use crate::domain::value_objects::LineQuantity;
use crate::storage::{StoreLineWrite, Storefront};
use crate::{Result, StoreError};

#[derive(Default)]
struct Inner {
    ranks: HashMap<Uuid, Rank>,
    store_items: HashMap<Uuid, StoreItem>,
    profiles: HashMap<Uuid, UserProfile>,
    cart: Vec<CartItem>,
    rank_purchases: Vec<UserPurchase>,
    store_purchases: Vec<StoreItemPurchase>,
    webhook_errors: Vec<WebhookError>,
}

impl Inner {
    fn has_line(&self, payment_ref: &str, line_key: &str) -> bool {
        self.rank_purchases.iter().any(|p| p.payment_ref == payment_ref && p.line_key == line_key)
            || self.store_purchases.iter().any(|p| p.payment_ref == payment_ref && p.line_key == line_key)
    }
}

/// Storefront held in process memory. Every operation takes a single lock, which gives
/// the same atomicity the SQL backend gets from constraints and transactions.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn insert_rank(&self, rank: Rank) { self.inner.lock().await.ranks.insert(rank.id, rank); }

    pub async fn insert_store_item(&self, item: StoreItem) { self.inner.lock().await.store_items.insert(item.id, item); }

    pub async fn remove_rank(&self, id: Uuid) { self.inner.lock().await.ranks.remove(&id); }

    pub async fn webhook_errors(&self) -> Vec<WebhookError> { self.inner.lock().await.webhook_errors.clone() }
}

#[async_trait]
impl Storefront for MemoryStore {
    async fn list_ranks(&self) -> Result<Vec<Rank>> {
        let mut ranks: Vec<Rank> = self.inner.lock().await.ranks.values().cloned().collect();
        ranks.sort_by_key(|r| r.price);
        Ok(ranks)
    }

    async fn rank(&self, id: Uuid) -> Result<Option<Rank>> { Ok(self.inner.lock().await.ranks.get(&id).cloned()) }

    async fn list_store_items(&self) -> Result<Vec<StoreItem>> {
        let mut items: Vec<StoreItem> = self.inner.lock().await.store_items.values().cloned().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn store_item(&self, id: Uuid) -> Result<Option<StoreItem>> { Ok(self.inner.lock().await.store_items.get(&id).cloned()) }

    async fn owned_ranks(&self, user_id: Uuid) -> Result<Vec<Rank>> {
        let inner = self.inner.lock().await;
        let mut owned: Vec<Rank> = Vec::new();
        for p in inner.rank_purchases.iter().filter(|p| p.user_id == user_id && p.is_completed()) {
            if let Some(rank) = p.rank_id.and_then(|id| inner.ranks.get(&id)) {
                if !owned.iter().any(|r| r.id == rank.id) { owned.push(rank.clone()); }
            }
        }
        Ok(owned)
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> { Ok(self.inner.lock().await.profiles.get(&user_id).cloned()) }

    async fn profile_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let inner = self.inner.lock().await;
        Ok(inner.profiles.values()
            .find(|p| p.minecraft_username.as_ref().is_some_and(|u| u.as_str().eq_ignore_ascii_case(username)))
            .cloned())
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(name) = &profile.minecraft_username {
            let taken = inner.profiles.values().any(|p| {
                p.user_id != profile.user_id && p.minecraft_username.as_ref().is_some_and(|u| u.as_str().eq_ignore_ascii_case(name.as_str()))
            });
            if taken { return Err(StoreError::validation("Minecraft username already linked to another account")); }
        }
        inner.profiles.insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn cart_items(&self, user_id: Uuid) -> Result<Vec<CartItem>> {
        Ok(self.inner.lock().await.cart.iter().filter(|c| c.user_id == user_id).cloned().collect())
    }

    async fn cart_item(&self, id: Uuid) -> Result<Option<CartItem>> {
        Ok(self.inner.lock().await.cart.iter().find(|c| c.id == id).cloned())
    }

    async fn insert_rank_line(&self, item: &CartItem) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let exists = inner.cart.iter().any(|c| c.user_id == item.user_id && c.rank_id().is_some() && c.rank_id() == item.rank_id());
        if exists { return Ok(false); }
        inner.cart.push(item.clone());
        Ok(true)
    }

    async fn add_store_line(&self, user_id: Uuid, store_item_id: Uuid, quantity: LineQuantity) -> Result<StoreLineWrite> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.cart.iter_mut().find(|c| c.user_id == user_id && c.store_item_id() == Some(store_item_id)) {
            let (merged, adjustment) = existing.quantity().merge(quantity);
            existing.line = CartLine::StoreItem { store_item_id, quantity: merged };
            return Ok(StoreLineWrite { item: existing.clone(), created: false, adjustment });
        }
        let item = CartItem::store_item(user_id, store_item_id, quantity);
        inner.cart.push(item.clone());
        Ok(StoreLineWrite { item, created: true, adjustment: None })
    }

    async fn set_line_quantity(&self, user_id: Uuid, id: Uuid, quantity: LineQuantity) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.cart.iter_mut().find(|c| c.id == id && c.user_id == user_id) {
            Some(item) => match item.line {
                CartLine::StoreItem { store_item_id, .. } => {
                    item.line = CartLine::StoreItem { store_item_id, quantity };
                    Ok(true)
                }
                CartLine::Rank { .. } => Ok(false),
            },
            None => Ok(false),
        }
    }

    async fn delete_cart_item(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.cart.len();
        inner.cart.retain(|c| !(c.id == id && c.user_id == user_id));
        Ok(inner.cart.len() != before)
    }

    async fn ledger_contains(&self, payment_ref: &str, line_key: &str) -> Result<bool> {
        Ok(self.inner.lock().await.has_line(payment_ref, line_key))
    }

    async fn record_rank_purchase(&self, purchase: &UserPurchase) -> Result<LedgerWrite> {
        let mut inner = self.inner.lock().await;
        if inner.has_line(&purchase.payment_ref, &purchase.line_key) { return Ok(LedgerWrite::Duplicate); }
        if purchase.is_completed() {
            let owned = inner.rank_purchases.iter().any(|p| p.is_completed() && p.user_id == purchase.user_id && p.rank_id == purchase.rank_id);
            if owned { return Ok(LedgerWrite::Duplicate); }
        }
        inner.rank_purchases.push(purchase.clone());
        Ok(LedgerWrite::Inserted)
    }

    async fn record_store_purchase(&self, purchase: &StoreItemPurchase) -> Result<LedgerWrite> {
        let mut inner = self.inner.lock().await;
        if inner.has_line(&purchase.payment_ref, &purchase.line_key) { return Ok(LedgerWrite::Duplicate); }
        inner.store_purchases.push(purchase.clone());
        if purchase.is_completed() {
            if let Some(item) = purchase.store_item_id.and_then(|id| inner.store_items.get_mut(&id)) {
                item.stock = item.stock.after_sale(purchase.quantity);
            }
        }
        Ok(LedgerWrite::Inserted)
    }

    async fn rank_purchases(&self, user_id: Uuid) -> Result<Vec<UserPurchase>> {
        Ok(self.inner.lock().await.rank_purchases.iter().filter(|p| p.user_id == user_id).cloned().collect())
    }

    async fn store_purchases(&self, user_id: Uuid) -> Result<Vec<StoreItemPurchase>> {
        Ok(self.inner.lock().await.store_purchases.iter().filter(|p| p.user_id == user_id).cloned().collect())
    }

    async fn record_webhook_error(&self, error: &WebhookError) -> Result<()> {
        self.inner.lock().await.webhook_errors.push(error.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{ItemCategory, PurchaseStatus};
    use crate::domain::value_objects::{Money, Stock};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_rank_line_unique_per_user() {
        let store = MemoryStore::new();
        let (user, rank) = (Uuid::now_v7(), Uuid::now_v7());
        assert!(store.insert_rank_line(&CartItem::rank(user, rank, None)).await.unwrap());
        assert!(!store.insert_rank_line(&CartItem::rank(user, rank, None)).await.unwrap());
        assert!(store.insert_rank_line(&CartItem::rank(Uuid::now_v7(), rank, None)).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_line_merges_and_caps() {
        let store = MemoryStore::new();
        let (user, item) = (Uuid::now_v7(), Uuid::now_v7());
        let first = store.add_store_line(user, item, LineQuantity::clamp(60).0).await.unwrap();
        assert!(first.created);
        let second = store.add_store_line(user, item, LineQuantity::clamp(60).0).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.item.quantity().value(), 99);
        assert!(second.adjustment.is_some());
        assert_eq!(store.cart_items(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_purchase_decrements_once() {
        let store = MemoryStore::new();
        let item = StoreItem::new("Crown", Money::new(dec!(4)), ItemCategory::Collectible, Stock::Remaining(5));
        store.insert_store_item(item.clone()).await;
        let purchase = StoreItemPurchase::new(Uuid::now_v7(), item.id, 2, Money::new(dec!(8)), "cs_1", "cart:a", PurchaseStatus::Completed);
        assert_eq!(store.record_store_purchase(&purchase).await.unwrap(), LedgerWrite::Inserted);
        assert_eq!(store.record_store_purchase(&purchase).await.unwrap(), LedgerWrite::Duplicate);
        assert_eq!(store.store_item(item.id).await.unwrap().unwrap().stock, Stock::Remaining(3));
    }

    #[tokio::test]
    async fn test_completed_rank_unique_per_user() {
        let store = MemoryStore::new();
        let (user, rank) = (Uuid::now_v7(), Uuid::now_v7());
        let first = UserPurchase::new(user, rank, Money::new(dec!(5)), "cs_1", "rank:1", PurchaseStatus::Completed);
        let second = UserPurchase::new(user, rank, Money::new(dec!(5)), "cs_2", "rank:1", PurchaseStatus::Completed);
        assert_eq!(store.record_rank_purchase(&first).await.unwrap(), LedgerWrite::Inserted);
        assert_eq!(store.record_rank_purchase(&second).await.unwrap(), LedgerWrite::Duplicate);
    }
}
