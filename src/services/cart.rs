//! Cart store

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use crate::domain::aggregates::{CartItem, CartLine};
use crate::domain::services::{BuyerPricing, LineTarget, PricingEngine};
use crate::domain::value_objects::{DiscountPercent, LineQuantity, Money, QuantityAdjustment};
use crate::services::load_buyer;
use crate::storage::Storefront;
use crate::{Result, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemRef { Rank(Uuid), StoreItem(Uuid) }

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AddOutcome {
    Added { item: CartItem, adjustment: Option<QuantityAdjustment> },
    Incremented { item: CartItem, adjustment: Option<QuantityAdjustment> },
    AlreadyInCart,
}

#[derive(Clone, Debug, Serialize)]
pub struct PricedLine {
    pub item: CartItem,
    pub name: String,
    pub unit_price: Money,
    pub subtotal: Money,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    pub lines: Vec<PricedLine>,
    pub total: Money,
    pub discount: DiscountPercent,
}

impl CartView {
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Storefront>,
    pricing: PricingEngine,
}

impl CartService {
    pub fn new(store: Arc<dyn Storefront>, pricing: PricingEngine) -> Self { Self { store, pricing } }

    pub async fn add_item(&self, user_id: Uuid, item: ItemRef, requested: i64) -> Result<AddOutcome> {
        match item {
            ItemRef::Rank(rank_id) => {
                let rank = self.store.rank(rank_id).await?.ok_or_else(|| StoreError::not_found("Rank"))?;
                let buyer = load_buyer(self.store.as_ref(), &self.pricing, Some(user_id)).await?;
                if buyer.owns(rank.id) { return Err(StoreError::AlreadyOwned); }
                if !buyer.can_upgrade_to(&rank) {
                    return Err(StoreError::validation("Only ranks above your current rank can be purchased"));
                }
                let snapshot = self.pricing.quote_rank(&rank, &buyer).snapshot();
                let line = CartItem::rank(user_id, rank.id, Some(snapshot));
                if !self.store.insert_rank_line(&line).await? {
                    tracing::info!(%user_id, rank = %rank.name, "Rank already in cart");
                    return Ok(AddOutcome::AlreadyInCart);
                }
                tracing::info!(%user_id, rank = %rank.name, "Rank added to cart");
                Ok(AddOutcome::Added { item: line, adjustment: None })
            }
            ItemRef::StoreItem(store_item_id) => {
                let store_item = self.store.store_item(store_item_id).await?.ok_or_else(|| StoreError::not_found("Store item"))?;
                if !store_item.is_available() { return Err(StoreError::validation(format!("{} is sold out", store_item.name))); }
                let (quantity, requested_note) = LineQuantity::clamp(requested);
                if let Some(note) = requested_note {
                    tracing::warn!(%user_id, requested, ?note, "Requested quantity adjusted");
                }
                let write = self.store.add_store_line(user_id, store_item.id, quantity).await?;
                let adjustment = requested_note.or(write.adjustment);
                if write.adjustment.is_some() {
                    tracing::warn!(%user_id, item = %store_item.name, "Cart line capped at {}", LineQuantity::MAX);
                }
                Ok(if write.created {
                    AddOutcome::Added { item: write.item, adjustment }
                } else {
                    AddOutcome::Incremented { item: write.item, adjustment }
                })
            }
        }
    }

    pub async fn update_quantity(&self, user_id: Uuid, cart_item_id: Uuid, requested: i64) -> Result<(CartItem, Option<QuantityAdjustment>)> {
        let mut item = self.owned_line(user_id, cart_item_id).await?;
        let adjustment = item.set_quantity(requested).map_err(|e| StoreError::validation(e.to_string()))?;
        if !self.store.set_line_quantity(user_id, item.id, item.quantity()).await? {
            return Err(StoreError::not_found("Cart item"));
        }
        if let Some(note) = adjustment {
            tracing::warn!(%user_id, %cart_item_id, requested, ?note, "Quantity clamped");
        }
        Ok((item, adjustment))
    }

    pub async fn remove_item(&self, user_id: Uuid, cart_item_id: Uuid) -> Result<()> {
        if !self.store.delete_cart_item(user_id, cart_item_id).await? {
            tracing::info!(%user_id, %cart_item_id, "Cart item already gone");
            return Err(StoreError::not_found("Cart item"));
        }
        Ok(())
    }

    /// Subtotal of a single line as the buyer would pay it now.
    pub async fn subtotal(&self, user_id: Uuid, cart_item_id: Uuid) -> Result<Money> {
        let item = self.owned_line(user_id, cart_item_id).await?;
        let buyer = load_buyer(self.store.as_ref(), &self.pricing, Some(user_id)).await?;
        let priced = self.price_line(item, &buyer).await?.ok_or_else(|| StoreError::not_found("Catalog entry"))?;
        Ok(priced.subtotal)
    }

    pub async fn total(&self, user_id: Uuid) -> Result<Money> { Ok(self.view(user_id).await?.total) }

    /// All lines with current prices. Lines whose catalog entry was deleted are left out.
    pub async fn view(&self, user_id: Uuid) -> Result<CartView> {
        let buyer = load_buyer(self.store.as_ref(), &self.pricing, Some(user_id)).await?;
        let mut lines = Vec::new();
        for item in self.store.cart_items(user_id).await? {
            let id = item.id;
            match self.price_line(item, &buyer).await? {
                Some(line) => lines.push(line),
                None => tracing::warn!(%user_id, cart_item_id = %id, "Cart line references a deleted catalog entry"),
            }
        }
        let total = lines.iter().fold(Money::zero(), |acc, l| acc.add(&l.subtotal));
        Ok(CartView { lines, total, discount: buyer.discount })
    }

    async fn owned_line(&self, user_id: Uuid, cart_item_id: Uuid) -> Result<CartItem> {
        self.store
            .cart_item(cart_item_id)
            .await?
            .filter(|item| item.belongs_to(user_id))
            .ok_or_else(|| StoreError::not_found("Cart item"))
    }

    async fn price_line(&self, item: CartItem, buyer: &BuyerPricing) -> Result<Option<PricedLine>> {
        let priced = match item.line {
            CartLine::Rank { rank_id } => self.store.rank(rank_id).await?.map(|rank| {
                let subtotal = self.pricing.line_subtotal(&item, LineTarget::Rank(&rank), buyer);
                PricedLine { name: rank.name, unit_price: subtotal, subtotal, item }
            }),
            CartLine::StoreItem { store_item_id, .. } => self.store.store_item(store_item_id).await?.map(|store_item| {
                let unit_price = self.pricing.store_unit_price(&store_item, buyer);
                let subtotal = self.pricing.line_subtotal(&item, LineTarget::StoreItem(&store_item), buyer);
                PricedLine { name: store_item.name, unit_price, subtotal, item }
            }),
        };
        Ok(priced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{ItemCategory, PurchaseStatus, Rank, StoreItem, UserPurchase};
    use crate::domain::value_objects::Stock;
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;

    async fn setup() -> (Arc<MemoryStore>, CartService, Rank, StoreItem) {
        let store = Arc::new(MemoryStore::new());
        let hero = Rank::new("Hero", Money::new(dec!(5.00)));
        let hat = StoreItem::new("Top Hat", Money::new(dec!(20.00)), ItemCategory::Cosmetic, Stock::Unlimited);
        store.insert_rank(hero.clone()).await;
        store.insert_store_item(hat.clone()).await;
        let cart = CartService::new(store.clone(), PricingEngine::default());
        (store, cart, hero, hat)
    }

    #[tokio::test]
    async fn test_rank_added_once() {
        let (store, cart, hero, _) = setup().await;
        let user = Uuid::now_v7();
        assert!(matches!(cart.add_item(user, ItemRef::Rank(hero.id), 1).await.unwrap(), AddOutcome::Added { .. }));
        assert_eq!(cart.add_item(user, ItemRef::Rank(hero.id), 1).await.unwrap(), AddOutcome::AlreadyInCart);
        assert_eq!(store.cart_items(user).await.unwrap().len(), 1);
        assert_eq!(cart.total(user).await.unwrap().amount(), dec!(5.00));
    }

    #[tokio::test]
    async fn test_owned_rank_rejected() {
        let (store, cart, hero, _) = setup().await;
        let user = Uuid::now_v7();
        let row = UserPurchase::new(user, hero.id, hero.price, "cs_old", "rank:old", PurchaseStatus::Completed);
        store.record_rank_purchase(&row).await.unwrap();
        assert!(matches!(cart.add_item(user, ItemRef::Rank(hero.id), 1).await, Err(StoreError::AlreadyOwned)));
    }

    #[tokio::test]
    async fn test_lower_rank_rejected() {
        let (store, cart, hero, _) = setup().await;
        let champion = Rank::new("Champion", Money::new(dec!(15.00)));
        store.insert_rank(champion.clone()).await;
        let user = Uuid::now_v7();
        let row = UserPurchase::new(user, champion.id, champion.price, "cs_old", "rank:old", PurchaseStatus::Completed);
        store.record_rank_purchase(&row).await.unwrap();

        assert!(matches!(cart.add_item(user, ItemRef::Rank(hero.id), 1).await, Err(StoreError::Validation(_))));
        assert!(store.cart_items(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_item_quantity_rules() {
        let (_, cart, _, hat) = setup().await;
        let user = Uuid::now_v7();
        match cart.add_item(user, ItemRef::StoreItem(hat.id), 0).await.unwrap() {
            AddOutcome::Added { item, adjustment } => {
                assert_eq!(item.quantity().value(), 1);
                assert_eq!(adjustment, Some(QuantityAdjustment::RaisedToMinimum));
            }
            other => panic!("unexpected {other:?}"),
        }
        match cart.add_item(user, ItemRef::StoreItem(hat.id), 120).await.unwrap() {
            AddOutcome::Incremented { item, adjustment } => {
                assert_eq!(item.quantity().value(), 99);
                assert_eq!(adjustment, Some(QuantityAdjustment::CappedAtMaximum));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_quantity() {
        let (_, cart, hero, hat) = setup().await;
        let user = Uuid::now_v7();
        let AddOutcome::Added { item: hat_line, .. } = cart.add_item(user, ItemRef::StoreItem(hat.id), 1).await.unwrap() else { panic!() };
        let AddOutcome::Added { item: hero_line, .. } = cart.add_item(user, ItemRef::Rank(hero.id), 1).await.unwrap() else { panic!() };

        let (updated, note) = cart.update_quantity(user, hat_line.id, 3).await.unwrap();
        assert_eq!(updated.quantity().value(), 3);
        assert_eq!(note, None);
        assert_eq!(cart.subtotal(user, hat_line.id).await.unwrap().amount(), dec!(60.00));
        assert!(matches!(cart.update_quantity(user, hero_line.id, 2).await, Err(StoreError::Validation(_))));
        assert!(matches!(cart.update_quantity(Uuid::now_v7(), hat_line.id, 2).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_but_reported() {
        let (_, cart, hero, _) = setup().await;
        let user = Uuid::now_v7();
        let AddOutcome::Added { item, .. } = cart.add_item(user, ItemRef::Rank(hero.id), 1).await.unwrap() else { panic!() };
        cart.remove_item(user, item.id).await.unwrap();
        assert!(matches!(cart.remove_item(user, item.id).await, Err(StoreError::NotFound(_))));
        assert!(cart.view(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sold_out_item_rejected() {
        let (store, cart, _, _) = setup().await;
        let crown = StoreItem::new("Crown", Money::new(dec!(9)), ItemCategory::Collectible, Stock::Remaining(0));
        store.insert_store_item(crown.clone()).await;
        assert!(matches!(cart.add_item(Uuid::now_v7(), ItemRef::StoreItem(crown.id), 1).await, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_deleted_rank_dropped_from_view() {
        let (store, cart, hero, hat) = setup().await;
        let user = Uuid::now_v7();
        cart.add_item(user, ItemRef::Rank(hero.id), 1).await.unwrap();
        cart.add_item(user, ItemRef::StoreItem(hat.id), 2).await.unwrap();
        store.remove_rank(hero.id).await;
        let view = cart.view(user).await.unwrap();
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.total.amount(), dec!(40.00));
    }
}
