//! Checkout session builder
//!
//! Shapes one outbound payment session per purchase. Nothing here writes to the
//! store; fulfillment happens only when the processor reports the payment.

use std::sync::Arc;
use uuid::Uuid;
use crate::domain::aggregates::Rank;
use crate::domain::services::{PricingEngine, RankQuote};
use crate::domain::value_objects::Money;
use crate::payments::{CreatedSession, PaymentProcessor, PurchaseMetadata, SessionRequest};
use crate::services::{load_buyer, CartService, CartView};
use crate::storage::Storefront;
use crate::{Result, StoreError};

#[derive(Clone, Debug)]
pub struct RedirectUrls {
    pub success: String,
    pub cancel: String,
}

impl RedirectUrls {
    pub fn for_site(site_url: &str) -> Self {
        let base = site_url.trim_end_matches('/');
        Self {
            success: format!("{base}/api/v1/payment/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel: format!("{base}/api/v1/payment/cancel"),
        }
    }
}

fn charge(amount: Money) -> Result<i64> {
    match amount.minor_units() {
        Some(units) if units > 0 => Ok(units),
        _ => Err(StoreError::validation(format!("Cannot charge {amount}"))),
    }
}

/// Session for one rank bought for oneself, carrying the quoted price.
pub fn rank_session(user_id: Uuid, rank: &Rank, quote: &RankQuote, redirects: &RedirectUrls) -> Result<SessionRequest> {
    let description = match quote.credit_from {
        Some(_) => format!("Upgrade to {} ({} credited from your current rank)", rank.name, quote.original.saturating_sub(&quote.price)),
        None => rank.description.clone(),
    };
    Ok(SessionRequest {
        unit_amount: charge(quote.price)?,
        product_name: format!("Rank {}", rank.name),
        description,
        metadata: PurchaseMetadata::Rank {
            user_id,
            rank_id: rank.id,
            original_price: quote.original,
            discounted_price: quote.price,
            previous_rank_id: quote.credit_from,
        },
        success_url: redirects.success.clone(),
        cancel_url: redirects.cancel.clone(),
    })
}

/// Session for a rank gifted to another player, always at full price.
pub fn gift_session(user_id: Uuid, rank: &Rank, recipient_id: Uuid, recipient_username: &str, redirects: &RedirectUrls) -> Result<SessionRequest> {
    Ok(SessionRequest {
        unit_amount: charge(rank.price)?,
        product_name: format!("Gift: Rank {}", rank.name),
        description: format!("Rank {} for {recipient_username}", rank.name),
        metadata: PurchaseMetadata::Gift {
            user_id,
            rank_id: rank.id,
            price: rank.price,
            recipient_id,
            recipient_username: recipient_username.to_string(),
        },
        success_url: redirects.success.clone(),
        cancel_url: redirects.cancel.clone(),
    })
}

/// Session for a whole cart, charged as one total.
pub fn cart_session(user_id: Uuid, cart: &CartView, redirects: &RedirectUrls) -> Result<SessionRequest> {
    if cart.is_empty() { return Err(StoreError::validation("Cart is empty")); }
    let description = cart.lines.iter()
        .map(|l| match l.item.quantity().value() { 1 => l.name.clone(), n => format!("{} x{n}", l.name) })
        .collect::<Vec<_>>()
        .join(", ");
    let count = cart.lines.len();
    Ok(SessionRequest {
        unit_amount: charge(cart.total)?,
        product_name: format!("GeoMC Store ({count} item{})", if count == 1 { "" } else { "s" }),
        description,
        metadata: PurchaseMetadata::Cart { user_id, cart_item_ids: cart.lines.iter().map(|l| l.item.id).collect() },
        success_url: redirects.success.clone(),
        cancel_url: redirects.cancel.clone(),
    })
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn Storefront>,
    pricing: PricingEngine,
    cart: CartService,
    processor: Arc<dyn PaymentProcessor>,
    redirects: RedirectUrls,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn Storefront>, pricing: PricingEngine, processor: Arc<dyn PaymentProcessor>, redirects: RedirectUrls) -> Self {
        let cart = CartService::new(store.clone(), pricing.clone());
        Self { store, pricing, cart, processor, redirects }
    }

    pub async fn checkout_rank(&self, user_id: Uuid, rank_id: Uuid) -> Result<CreatedSession> {
        let rank = self.store.rank(rank_id).await?.ok_or_else(|| StoreError::not_found("Rank"))?;
        let buyer = load_buyer(self.store.as_ref(), &self.pricing, Some(user_id)).await?;
        if buyer.owns(rank.id) { return Err(StoreError::AlreadyOwned); }
        if !buyer.can_upgrade_to(&rank) {
            return Err(StoreError::validation("Only ranks above your current rank can be purchased"));
        }
        let quote = self.pricing.quote_rank(&rank, &buyer);
        let request = rank_session(user_id, &rank, &quote, &self.redirects)?;
        tracing::info!(%user_id, rank = %rank.name, price = %quote.price, "Starting rank checkout");
        self.processor.create_session(&request).await
    }

    /// Refuses the cart when it holds ranks the buyer has since obtained or outgrown. Those
    /// lines are removed so the buyer can review the new total before paying.
    pub async fn checkout_cart(&self, user_id: Uuid) -> Result<CreatedSession> {
        self.drop_outgrown_ranks(user_id).await?;
        let cart = self.cart.view(user_id).await?;
        let request = cart_session(user_id, &cart, &self.redirects)?;
        tracing::info!(%user_id, lines = cart.lines.len(), total = %cart.total, "Starting cart checkout");
        self.processor.create_session(&request).await
    }

    async fn drop_outgrown_ranks(&self, user_id: Uuid) -> Result<()> {
        let buyer = load_buyer(self.store.as_ref(), &self.pricing, Some(user_id)).await?;
        let mut dropped = Vec::new();
        for item in self.store.cart_items(user_id).await? {
            let Some(rank_id) = item.rank_id() else { continue };
            let Some(rank) = self.store.rank(rank_id).await? else { continue };
            if buyer.can_upgrade_to(&rank) { continue; }
            self.store.delete_cart_item(user_id, item.id).await?;
            tracing::info!(%user_id, rank = %rank.name, "Dropped outgrown rank from cart");
            dropped.push(rank.name);
        }
        if dropped.is_empty() { return Ok(()); }
        Err(StoreError::validation(format!(
            "Removed from your cart because you already hold this rank or a higher one: {}",
            dropped.join(", ")
        )))
    }

    pub async fn gift_rank(&self, user_id: Uuid, rank_id: Uuid, recipient_username: &str) -> Result<CreatedSession> {
        let rank = self.store.rank(rank_id).await?.ok_or_else(|| StoreError::not_found("Rank"))?;
        let recipient = self.store.profile_by_username(recipient_username).await?.ok_or_else(|| StoreError::not_found("Player"))?;
        if recipient.user_id == user_id { return Err(StoreError::validation("You cannot gift a rank to yourself")); }
        let owned = self.store.owned_ranks(recipient.user_id).await?;
        if owned.iter().any(|r| r.id == rank.id) { return Err(StoreError::AlreadyOwned); }
        let username = recipient.minecraft_username.map(String::from).unwrap_or_else(|| recipient_username.to_string());
        let request = gift_session(user_id, &rank, recipient.user_id, &username, &self.redirects)?;
        tracing::info!(%user_id, recipient = %username, rank = %rank.name, "Starting gift checkout");
        self.processor.create_session(&request).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::aggregates::{PurchaseStatus, UserProfile, UserPurchase};
    use crate::domain::value_objects::MinecraftUsername;
    use crate::services::ItemRef;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    /// Records requests instead of calling out.
    #[derive(Default)]
    pub(crate) struct RecordingProcessor { pub requests: Mutex<Vec<SessionRequest>> }

    #[async_trait]
    impl PaymentProcessor for RecordingProcessor {
        async fn create_session(&self, request: &SessionRequest) -> Result<CreatedSession> {
            let mut requests = self.requests.lock().await;
            requests.push(request.clone());
            let id = format!("cs_test_{}", requests.len());
            Ok(CreatedSession { url: format!("https://checkout.test/{id}"), id })
        }
    }

    struct Fixture { store: Arc<MemoryStore>, processor: Arc<RecordingProcessor>, checkout: CheckoutService, hero: Rank, champion: Rank }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hero = Rank::new("Hero", Money::new(dec!(5.00)));
        let champion = Rank::new("Champion", Money::new(dec!(15.00)));
        store.insert_rank(hero.clone()).await;
        store.insert_rank(champion.clone()).await;
        let processor = Arc::new(RecordingProcessor::default());
        let checkout = CheckoutService::new(store.clone(), PricingEngine::default(), processor.clone(), RedirectUrls::for_site("https://geomc.fr/"));
        Fixture { store, processor, checkout, hero, champion }
    }

    async fn grant(store: &MemoryStore, user: Uuid, rank: &Rank) {
        let row = UserPurchase::new(user, rank.id, rank.price, format!("cs_{}", Uuid::now_v7()), "rank", PurchaseStatus::Completed);
        store.record_rank_purchase(&row).await.unwrap();
    }

    #[test]
    fn test_redirects() {
        let r = RedirectUrls::for_site("https://geomc.fr/");
        assert_eq!(r.success, "https://geomc.fr/api/v1/payment/success?session_id={CHECKOUT_SESSION_ID}");
        assert_eq!(r.cancel, "https://geomc.fr/api/v1/payment/cancel");
    }

    #[tokio::test]
    async fn test_rank_checkout_applies_upgrade_credit() {
        let f = fixture().await;
        let user = Uuid::now_v7();
        grant(&f.store, user, &f.hero).await;
        let session = f.checkout.checkout_rank(user, f.champion.id).await.unwrap();
        assert_eq!(session.id, "cs_test_1");
        let requests = f.processor.requests.lock().await;
        assert_eq!(requests[0].unit_amount, 1000);
        match &requests[0].metadata {
            PurchaseMetadata::Rank { previous_rank_id, discounted_price, .. } => {
                assert_eq!(*previous_rank_id, Some(f.hero.id));
                assert_eq!(discounted_price.amount(), dec!(10.00));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rank_checkout_rejects_lower_or_owned() {
        let f = fixture().await;
        let user = Uuid::now_v7();
        grant(&f.store, user, &f.champion).await;
        assert!(matches!(f.checkout.checkout_rank(user, f.champion.id).await, Err(StoreError::AlreadyOwned)));
        assert!(matches!(f.checkout.checkout_rank(user, f.hero.id).await, Err(StoreError::Validation(_))));
        assert!(f.processor.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_cart_checkout_embeds_line_ids() {
        let f = fixture().await;
        let user = Uuid::now_v7();
        let cart = CartService::new(f.store.clone(), PricingEngine::default());
        cart.add_item(user, ItemRef::Rank(f.hero.id), 1).await.unwrap();
        f.checkout.checkout_cart(user).await.unwrap();
        let requests = f.processor.requests.lock().await;
        assert_eq!(requests[0].unit_amount, 500);
        let lines = f.store.cart_items(user).await.unwrap();
        assert_eq!(requests[0].metadata, PurchaseMetadata::Cart { user_id: user, cart_item_ids: vec![lines[0].id] });
        // Building a session leaves the cart untouched.
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn test_cart_checkout_drops_rank_obtained_meanwhile() {
        let f = fixture().await;
        let user = Uuid::now_v7();
        let cart = CartService::new(f.store.clone(), PricingEngine::default());
        cart.add_item(user, ItemRef::Rank(f.hero.id), 1).await.unwrap();
        cart.add_item(user, ItemRef::Rank(f.champion.id), 1).await.unwrap();
        grant(&f.store, user, &f.champion).await;

        assert!(matches!(f.checkout.checkout_cart(user).await, Err(StoreError::Validation(_))));
        assert!(f.processor.requests.lock().await.is_empty());
        assert!(f.store.cart_items(user).await.unwrap().is_empty());
        // Nothing left to pay for.
        assert!(matches!(f.checkout.checkout_cart(user).await, Err(StoreError::Validation(_))));
        assert!(f.processor.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_cart_rejected() {
        let f = fixture().await;
        assert!(matches!(f.checkout.checkout_cart(Uuid::now_v7()).await, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_gift_is_full_price() {
        let f = fixture().await;
        let (payer, friend) = (Uuid::now_v7(), Uuid::now_v7());
        grant(&f.store, payer, &f.hero).await;
        let mut profile = UserProfile::new(friend);
        profile.link(MinecraftUsername::new("Alex_01").unwrap(), None);
        f.store.save_profile(&profile).await.unwrap();

        f.checkout.gift_rank(payer, f.champion.id, "alex_01").await.unwrap();
        let requests = f.processor.requests.lock().await;
        assert_eq!(requests[0].unit_amount, 1500);
        match &requests[0].metadata {
            PurchaseMetadata::Gift { recipient_id, recipient_username, .. } => {
                assert_eq!(*recipient_id, friend);
                assert_eq!(recipient_username, "Alex_01");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gift_to_self_or_unknown_rejected() {
        let f = fixture().await;
        let payer = Uuid::now_v7();
        let mut profile = UserProfile::new(payer);
        profile.link(MinecraftUsername::new("Steve").unwrap(), None);
        f.store.save_profile(&profile).await.unwrap();
        assert!(matches!(f.checkout.gift_rank(payer, f.hero.id, "Steve").await, Err(StoreError::Validation(_))));
        assert!(matches!(f.checkout.gift_rank(payer, f.hero.id, "Nobody").await, Err(StoreError::NotFound(_))));
    }
}
