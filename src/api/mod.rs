//! HTTP surface
//!
//! Authentication happens upstream; the caller's id arrives in `X-User-Id`.

use axum::{body::Bytes, extract::{Path, Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post, put}, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{CartItem, Rank, StoreItem, StoreItemPurchase, UserProfile, UserPurchase};
use crate::domain::events::EventPublisher;
use crate::domain::services::{PricingEngine, RankOffer};
use crate::domain::value_objects::{DiscountPercent, MinecraftUsername, Money, QuantityAdjustment};
use crate::minecraft::{EntitlementGateway, ProfileDirectory};
use crate::payments::{CreatedSession, PaymentProcessor, WebhookVerifier};
use crate::services::{load_buyer, AddOutcome, CartService, CartView, CheckoutService, FulfillmentEngine, ItemRef, RedirectUrls};
use crate::storage::Storefront;
use crate::StoreError;

pub const USER_HEADER: &str = "x-user-id";
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Outbound collaborators the HTTP layer wires into the services.
pub struct Integrations {
    pub processor: Arc<dyn PaymentProcessor>,
    pub entitlements: Arc<dyn EntitlementGateway>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub events: EventPublisher,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Storefront>,
    pub pricing: PricingEngine,
    pub cart: CartService,
    pub checkout: Arc<CheckoutService>,
    pub fulfillment: Arc<FulfillmentEngine>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub verifier: WebhookVerifier,
}

impl AppState {
    pub fn new(store: Arc<dyn Storefront>, integrations: Integrations, verifier: WebhookVerifier, redirects: RedirectUrls) -> Self {
        let pricing = PricingEngine::default();
        let Integrations { processor, entitlements, profiles, events } = integrations;
        Self {
            cart: CartService::new(store.clone(), pricing.clone()),
            checkout: Arc::new(CheckoutService::new(store.clone(), pricing.clone(), processor, redirects)),
            fulfillment: Arc::new(FulfillmentEngine::new(store.clone(), pricing.clone(), entitlements, events)),
            store,
            pricing,
            profiles,
            verifier,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "geomc-store"})) }))
        .route("/api/v1/store", get(store_page))
        .route("/api/v1/cart", get(get_cart))
        .route("/api/v1/cart/items", post(add_to_cart))
        .route("/api/v1/cart/items/:id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/cart/checkout", post(checkout_cart))
        .route("/api/v1/checkout/rank/:rank_id", post(checkout_rank))
        .route("/api/v1/gift/rank/:rank_id", post(gift_rank))
        .route("/api/v1/webhooks/stripe", post(stripe_webhook))
        .route("/api/v1/payment/success", get(payment_success))
        .route("/api/v1/payment/cancel", get(payment_cancel))
        .route("/api/v1/payment/failed", get(payment_failed))
        .route("/api/v1/minecraft/username/:name", get(check_username))
        .route("/api/v1/profile/minecraft", put(link_minecraft))
        .route("/api/v1/profile/purchases", get(purchase_history))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn reject(e: StoreError) -> (StatusCode, String) {
    let status = match &e {
        StoreError::Validation(_) | StoreError::MalformedPayload(_) | StoreError::InvalidSignature => StatusCode::BAD_REQUEST,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyOwned => StatusCode::CONFLICT,
        StoreError::PaymentProcessor(_) => StatusCode::BAD_GATEWAY,
        StoreError::Storage(msg) => {
            tracing::error!(error = %msg, "Storage failure");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string());
        }
    };
    (status, e.to_string())
}

fn caller(headers: &HeaderMap) -> Option<Uuid> {
    headers.get(USER_HEADER).and_then(|v| v.to_str().ok()).and_then(|v| Uuid::parse_str(v.trim()).ok())
}

fn require_caller(headers: &HeaderMap) -> ApiResult<Uuid> {
    caller(headers).ok_or((StatusCode::UNAUTHORIZED, "Sign in required".to_string()))
}

// ---- store ----

#[derive(Debug, Serialize)] pub struct RankListing { #[serde(flatten)] pub rank: Rank, pub price: Money, pub credit_from: Option<Uuid> }
#[derive(Debug, Serialize)] pub struct ItemListing { #[serde(flatten)] pub item: StoreItem, pub price: Money, pub available: bool }
#[derive(Debug, Serialize)] pub struct StorePage { pub ranks: Vec<RankListing>, pub no_further_ranks: bool, pub items: Vec<ItemListing>, pub discount: DiscountPercent }

async fn store_page(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<Json<StorePage>> {
    let buyer = load_buyer(s.store.as_ref(), &s.pricing, caller(&headers)).await.map_err(reject)?;
    let all_ranks = s.store.list_ranks().await.map_err(reject)?;
    let (ranks, no_further_ranks) = match s.pricing.available_ranks(&all_ranks, &buyer) {
        RankOffer::Available(ranks) => (ranks, false),
        RankOffer::NoFurtherRanks => (Vec::new(), true),
    };
    let ranks = ranks.into_iter().map(|rank| {
        let quote = s.pricing.quote_rank(&rank, &buyer);
        RankListing { rank, price: quote.price, credit_from: quote.credit_from }
    }).collect();
    let items = s.store.list_store_items().await.map_err(reject)?.into_iter().map(|item| {
        let price = s.pricing.store_unit_price(&item, &buyer);
        ItemListing { available: item.is_available(), item, price }
    }).collect();
    Ok(Json(StorePage { ranks, no_further_ranks, items, discount: buyer.discount }))
}

// ---- cart ----

#[derive(Debug, Deserialize)] pub struct AddToCartRequest { pub rank_id: Option<Uuid>, pub store_item_id: Option<Uuid>, pub quantity: Option<i64> }
#[derive(Debug, Deserialize)] pub struct UpdateQuantityRequest { pub quantity: i64 }
#[derive(Debug, Serialize)] pub struct UpdatedLine { pub item: CartItem, pub adjustment: Option<QuantityAdjustment> }

async fn get_cart(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<Json<CartView>> {
    let user = require_caller(&headers)?;
    s.cart.view(user).await.map(Json).map_err(reject)
}

async fn add_to_cart(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<AddToCartRequest>) -> ApiResult<(StatusCode, Json<AddOutcome>)> {
    let user = require_caller(&headers)?;
    let item = match (r.rank_id, r.store_item_id) {
        (Some(id), None) => ItemRef::Rank(id),
        (None, Some(id)) => ItemRef::StoreItem(id),
        _ => return Err((StatusCode::BAD_REQUEST, "Exactly one of rank_id or store_item_id is required".to_string())),
    };
    let outcome = s.cart.add_item(user, item, r.quantity.unwrap_or(1)).await.map_err(reject)?;
    let status = if matches!(outcome, AddOutcome::Added { .. }) { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(outcome)))
}

async fn update_cart_item(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>, Json(r): Json<UpdateQuantityRequest>) -> ApiResult<Json<UpdatedLine>> {
    let user = require_caller(&headers)?;
    let (item, adjustment) = s.cart.update_quantity(user, id, r.quantity).await.map_err(reject)?;
    Ok(Json(UpdatedLine { item, adjustment }))
}

async fn remove_cart_item(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let user = require_caller(&headers)?;
    s.cart.remove_item(user, id).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- checkout ----

#[derive(Debug, Deserialize, Validate)]
pub struct GiftRequest {
    #[validate(length(min = 3, max = 16))]
    pub recipient_username: String,
}

async fn checkout_cart(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<Json<CreatedSession>> {
    let user = require_caller(&headers)?;
    s.checkout.checkout_cart(user).await.map(Json).map_err(reject)
}

async fn checkout_rank(State(s): State<AppState>, headers: HeaderMap, Path(rank_id): Path<Uuid>) -> ApiResult<Json<CreatedSession>> {
    let user = require_caller(&headers)?;
    s.checkout.checkout_rank(user, rank_id).await.map(Json).map_err(reject)
}

async fn gift_rank(State(s): State<AppState>, headers: HeaderMap, Path(rank_id): Path<Uuid>, Json(r): Json<GiftRequest>) -> ApiResult<Json<CreatedSession>> {
    let user = require_caller(&headers)?;
    r.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    s.checkout.gift_rank(user, rank_id, r.recipient_username.trim()).await.map(Json).map_err(reject)
}

// ---- payment processor ----

/// Rejects unsigned or tampered deliveries; everything else is acknowledged so the
/// processor does not retry into repeated side effects.
async fn stripe_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).ok_or_else(|| {
        tracing::warn!("Webhook without signature header");
        (StatusCode::BAD_REQUEST, "Missing signature".to_string())
    })?;
    let event = s.verifier.verify(&body, signature).map_err(reject)?;
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Webhook received");
    let report = s.fulfillment.handle(&event).await;
    tracing::debug!(?report, "Webhook handled");
    Ok(Json(serde_json::json!({"received": true})))
}

#[derive(Debug, Deserialize)] pub struct LandingParams { pub session_id: Option<String> }

async fn payment_success(Query(p): Query<LandingParams>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "success",
        "session_id": p.session_id,
        "message": "Payment received. Your purchase will be applied shortly."
    }))
}

async fn payment_cancel() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "cancelled", "message": "Checkout cancelled. You have not been charged."}))
}

async fn payment_failed() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "failed", "message": "Payment failed. Please try again or use another card."}))
}

// ---- minecraft profile ----

#[derive(Debug, Serialize)]
pub struct UsernameCheck { pub username: String, pub available: bool, pub exists: bool, pub uuid: Option<String> }

#[derive(Debug, Deserialize, Validate)]
pub struct LinkMinecraftRequest {
    #[validate(length(min = 3, max = 16))]
    pub username: String,
}

fn parse_username(raw: &str) -> ApiResult<MinecraftUsername> {
    MinecraftUsername::new(raw.trim()).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

async fn check_username(State(s): State<AppState>, headers: HeaderMap, Path(name): Path<String>) -> ApiResult<Json<UsernameCheck>> {
    let username = parse_username(&name)?;
    let me = caller(&headers);
    let claimed = s.store.profile_by_username(username.as_str()).await.map_err(reject)?;
    let available = claimed.map_or(true, |p| Some(p.user_id) == me);
    let uuid = s.profiles.lookup_uuid(username.as_str()).await;
    Ok(Json(UsernameCheck { username: username.to_string(), available, exists: uuid.is_some(), uuid }))
}

async fn link_minecraft(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<LinkMinecraftRequest>) -> ApiResult<Json<UserProfile>> {
    let user = require_caller(&headers)?;
    r.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let username = parse_username(&r.username)?;
    let uuid = s.profiles.lookup_uuid(username.as_str()).await;
    let mut profile = s.store.profile(user).await.map_err(reject)?.unwrap_or_else(|| UserProfile::new(user));
    profile.link(username, uuid);
    s.store.save_profile(&profile).await.map_err(reject)?;
    tracing::info!(user_id = %user, username = ?profile.minecraft_username, "Minecraft username linked");
    Ok(Json(profile))
}

#[derive(Debug, Serialize)] pub struct PurchaseHistory { pub ranks: Vec<UserPurchase>, pub store_items: Vec<StoreItemPurchase> }

async fn purchase_history(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<Json<PurchaseHistory>> {
    let user = require_caller(&headers)?;
    let ranks = s.store.rank_purchases(user).await.map_err(reject)?;
    let store_items = s.store.store_purchases(user).await.map_err(reject)?;
    Ok(Json(PurchaseHistory { ranks, store_items }))
}
