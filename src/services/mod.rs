//! Application services: cart, checkout and fulfillment
pub mod cart;
pub mod checkout;
pub mod fulfillment;

pub use cart::{AddOutcome, CartService, CartView, ItemRef, PricedLine};
pub use checkout::{CheckoutService, RedirectUrls};
pub use fulfillment::{FulfillmentEngine, FulfillmentReport, RankGrant};

use uuid::Uuid;
use crate::domain::services::{BuyerPricing, PricingEngine};
use crate::storage::Storefront;
use crate::Result;

/// Pricing context for a buyer; anonymous buyers own nothing and get no discount.
pub async fn load_buyer(store: &dyn Storefront, pricing: &PricingEngine, user_id: Option<Uuid>) -> Result<BuyerPricing> {
    match user_id {
        Some(id) => Ok(pricing.buyer(store.owned_ranks(id).await?)),
        None => Ok(BuyerPricing::anonymous()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{PurchaseStatus, Rank, UserPurchase};
    use crate::domain::value_objects::{DiscountPercent, Money};
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_anonymous_buyer_gets_nothing() {
        let store = MemoryStore::new();
        let legend = Rank::new("Legend", Money::new(dec!(50.00)));
        store.insert_rank(legend.clone()).await;
        let user = Uuid::now_v7();
        let row = UserPurchase::new(user, legend.id, legend.price, "cs_1", "rank:1", PurchaseStatus::Completed);
        store.record_rank_purchase(&row).await.unwrap();
        let pricing = PricingEngine::default();

        let anonymous = load_buyer(&store, &pricing, None).await.unwrap();
        assert_eq!(anonymous.discount, DiscountPercent::NONE);
        assert!(anonymous.owned.is_empty());
        assert_eq!(load_buyer(&store, &pricing, Some(user)).await.unwrap().discount.value(), 20);
    }
}
