//! Fulfillment engine
//!
//! Turns payment notifications into ledger rows, stock movements and in-game
//! ranks. Every notification is acknowledged: problems are written to the
//! webhook error log instead of being handed back to the processor, whose
//! retries would otherwise repeat side effects.
//!
//! Ordering within one notification:
//! 1. ledger rows (and stock, in the same unit of work per line)
//! 2. cart line removal
//! 3. rank commands to the game server, outside any storage transaction

use std::sync::Arc;
use uuid::Uuid;
use crate::domain::aggregates::purchase::{cart_line_key, rank_line_key};
use crate::domain::aggregates::{CartLine, LedgerWrite, PurchaseStatus, Rank, StoreItemPurchase, UserPurchase, WebhookError};
use crate::domain::events::{DomainEvent, EventPublisher};
use crate::domain::services::{BuyerPricing, PricingEngine};
use crate::domain::value_objects::Money;
use crate::minecraft::EntitlementGateway;
use crate::payments::{EventKind, PurchaseMetadata, WebhookEvent};
use crate::services::load_buyer;
use crate::storage::Storefront;
use crate::{Result, StoreError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankGrant {
    pub user_id: Uuid,
    pub rank_name: String,
    /// Whether the game server accepted the rank command.
    pub applied: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FulfillmentReport {
    pub granted: Vec<RankGrant>,
    pub store_lines: usize,
    /// Lines already processed, or ranks the recipient already owned.
    pub skipped: usize,
    pub failed_rows: usize,
    pub errors: usize,
    pub ignored: bool,
    /// Sum of the ledger rows written for this notification.
    pub recorded: Money,
}

pub struct FulfillmentEngine {
    store: Arc<dyn Storefront>,
    pricing: PricingEngine,
    entitlements: Arc<dyn EntitlementGateway>,
    events: EventPublisher,
}

impl FulfillmentEngine {
    pub fn new(store: Arc<dyn Storefront>, pricing: PricingEngine, entitlements: Arc<dyn EntitlementGateway>, events: EventPublisher) -> Self {
        Self { store, pricing, entitlements, events }
    }

    /// Processes one verified notification. Never fails.
    pub async fn handle(&self, event: &WebhookEvent) -> FulfillmentReport {
        let result = match &event.kind {
            EventKind::CheckoutCompleted => self.complete(event).await,
            EventKind::PaymentFailed | EventKind::CheckoutExpired => self.record_failure(event).await,
            EventKind::Other(kind) => {
                tracing::debug!(event_type = %kind, "Ignoring webhook event");
                return FulfillmentReport { ignored: true, ..Default::default() };
            }
        };
        match result {
            Ok(report) => report,
            Err(e) => {
                self.log_error(event, e.to_string()).await;
                FulfillmentReport { errors: 1, ..Default::default() }
            }
        }
    }

    async fn complete(&self, event: &WebhookEvent) -> Result<FulfillmentReport> {
        if event.object.payment_status.as_deref() == Some("unpaid") {
            tracing::info!(session_id = %event.object.id, "Checkout completed without payment yet, waiting");
            return Ok(FulfillmentReport { ignored: true, ..Default::default() });
        }
        let metadata = PurchaseMetadata::from_map(&event.object.metadata)?;
        let payment_ref = event.object.id.as_str();
        let mut report = FulfillmentReport::default();

        match &metadata {
            PurchaseMetadata::Rank { user_id, rank_id, discounted_price, .. } => {
                let rank = self.rank(*rank_id).await?;
                self.record_rank(payment_ref, &rank_line_key(rank.id), *user_id, &rank, *discounted_price, None, &mut report).await?;
            }
            PurchaseMetadata::Gift { user_id, rank_id, price, recipient_id, .. } => {
                let rank = self.rank(*rank_id).await?;
                self.record_rank(payment_ref, &rank_line_key(rank.id), *recipient_id, &rank, *price, Some(*user_id), &mut report).await?;
            }
            PurchaseMetadata::Cart { user_id, cart_item_ids } => {
                // Priced as at checkout: ranks recorded below must not raise the discount of later lines.
                let buyer = load_buyer(self.store.as_ref(), &self.pricing, Some(*user_id)).await?;
                for id in cart_item_ids {
                    if let Err(e) = self.fulfil_line(payment_ref, *user_id, *id, &buyer, &mut report).await {
                        report.errors += 1;
                        self.log_error(event, format!("cart item {id}: {e}")).await;
                    }
                }
            }
        }
        self.check_charged_total(event, &mut report).await;

        for grant in report.granted.iter_mut() {
            let applied = self.push_entitlement(grant).await;
            grant.applied = applied;
        }

        tracing::info!(
            session_id = %payment_ref,
            granted = report.granted.len(),
            store_lines = report.store_lines,
            skipped = report.skipped,
            errors = report.errors,
            "Checkout fulfilled"
        );
        if !report.granted.is_empty() || report.store_lines > 0 {
            self.events.publish(DomainEvent::PurchaseCompleted {
                session_id: payment_ref.to_string(),
                user_id: metadata.buyer(),
                ranks: report.granted.iter().map(|g| g.rank_name.clone()).collect(),
                store_lines: report.store_lines,
            }).await;
        }
        Ok(report)
    }

    async fn fulfil_line(&self, payment_ref: &str, user_id: Uuid, cart_item_id: Uuid, buyer: &BuyerPricing, report: &mut FulfillmentReport) -> Result<()> {
        let line_key = cart_line_key(cart_item_id);
        if self.store.ledger_contains(payment_ref, &line_key).await? {
            report.skipped += 1;
            return Ok(());
        }
        let item = self.store.cart_item(cart_item_id).await?.ok_or_else(|| StoreError::not_found("Cart item"))?;
        if !item.belongs_to(user_id) {
            return Err(StoreError::validation("cart item belongs to another user"));
        }

        match item.line {
            CartLine::Rank { rank_id } => {
                let rank = self.rank(rank_id).await?;
                let amount = match &item.snapshot {
                    Some(snapshot) => snapshot.discounted_price,
                    None => self.pricing.quote_rank(&rank, buyer).price,
                };
                self.record_rank(payment_ref, &line_key, user_id, &rank, amount, None, report).await?;
            }
            CartLine::StoreItem { store_item_id, quantity } => {
                let store_item = self.store.store_item(store_item_id).await?.ok_or_else(|| StoreError::not_found("Store item"))?;
                let qty = u32::from(quantity.value());
                let amount = self.pricing.store_unit_price(&store_item, buyer).multiply(qty);
                let row = StoreItemPurchase::new(user_id, store_item.id, qty, amount, payment_ref, line_key, PurchaseStatus::Completed);
                match self.store.record_store_purchase(&row).await? {
                    LedgerWrite::Inserted => {
                        tracing::info!(%user_id, item = %store_item.name, qty, %amount, "Store item purchased");
                        report.store_lines += 1;
                        report.recorded = report.recorded.add(&amount);
                    }
                    LedgerWrite::Duplicate => report.skipped += 1,
                }
            }
        }

        self.store.delete_cart_item(user_id, cart_item_id).await?;
        Ok(())
    }

    /// Writes a completed rank row unless the recipient already owns the rank.
    #[allow(clippy::too_many_arguments)]
    async fn record_rank(
        &self,
        payment_ref: &str,
        line_key: &str,
        recipient: Uuid,
        rank: &Rank,
        amount: Money,
        gifted_by: Option<Uuid>,
        report: &mut FulfillmentReport,
    ) -> Result<()> {
        if self.store.ledger_contains(payment_ref, line_key).await? {
            tracing::info!(session_id = %payment_ref, rank = %rank.name, "Payment line already recorded");
            report.skipped += 1;
            return Ok(());
        }
        if self.store.owned_ranks(recipient).await?.iter().any(|r| r.id == rank.id) {
            tracing::info!(user_id = %recipient, rank = %rank.name, "Rank already owned, not granting again");
            report.skipped += 1;
            return Ok(());
        }

        let mut row = UserPurchase::new(recipient, rank.id, amount, payment_ref, line_key, PurchaseStatus::Completed);
        if let Some(payer) = gifted_by { row = row.gifted_by(payer); }
        match self.store.record_rank_purchase(&row).await? {
            LedgerWrite::Inserted => {
                tracing::info!(user_id = %recipient, rank = %rank.name, %amount, gift = row.is_gift, "Rank purchase recorded");
                report.granted.push(RankGrant { user_id: recipient, rank_name: rank.name.clone(), applied: false });
                report.recorded = report.recorded.add(&amount);
            }
            LedgerWrite::Duplicate => report.skipped += 1,
        }
        Ok(())
    }

    async fn record_failure(&self, event: &WebhookEvent) -> Result<FulfillmentReport> {
        let metadata = PurchaseMetadata::from_map(&event.object.metadata)?;
        let payment_ref = event.object.id.as_str();
        let mut report = FulfillmentReport::default();
        let mut total = Money::zero();

        match &metadata {
            PurchaseMetadata::Rank { user_id, rank_id, discounted_price, .. } => {
                let row = UserPurchase::new(*user_id, *rank_id, *discounted_price, payment_ref, rank_line_key(*rank_id), PurchaseStatus::Failed);
                if self.store.record_rank_purchase(&row).await? == LedgerWrite::Inserted {
                    report.failed_rows += 1;
                    total = total.add(discounted_price);
                }
            }
            PurchaseMetadata::Gift { user_id, rank_id, price, recipient_id, .. } => {
                let row = UserPurchase::new(*recipient_id, *rank_id, *price, payment_ref, rank_line_key(*rank_id), PurchaseStatus::Failed).gifted_by(*user_id);
                if self.store.record_rank_purchase(&row).await? == LedgerWrite::Inserted {
                    report.failed_rows += 1;
                    total = total.add(price);
                }
            }
            PurchaseMetadata::Cart { user_id, cart_item_ids } => {
                let buyer = load_buyer(self.store.as_ref(), &self.pricing, Some(*user_id)).await?;
                for id in cart_item_ids {
                    let Some(item) = self.store.cart_item(*id).await?.filter(|i| i.belongs_to(*user_id)) else { continue };
                    let line_key = cart_line_key(item.id);
                    let write = match item.line {
                        CartLine::Rank { rank_id } => {
                            let Some(rank) = self.store.rank(rank_id).await? else { continue };
                            let amount = item.snapshot.as_ref().map(|s| s.discounted_price).unwrap_or_else(|| self.pricing.quote_rank(&rank, &buyer).price);
                            total = total.add(&amount);
                            let row = UserPurchase::new(*user_id, rank_id, amount, payment_ref, line_key, PurchaseStatus::Failed);
                            self.store.record_rank_purchase(&row).await?
                        }
                        CartLine::StoreItem { store_item_id, quantity } => {
                            let Some(store_item) = self.store.store_item(store_item_id).await? else { continue };
                            let qty = u32::from(quantity.value());
                            let amount = self.pricing.store_unit_price(&store_item, &buyer).multiply(qty);
                            total = total.add(&amount);
                            let row = StoreItemPurchase::new(*user_id, store_item_id, qty, amount, payment_ref, line_key, PurchaseStatus::Failed);
                            self.store.record_store_purchase(&row).await?
                        }
                    };
                    if write == LedgerWrite::Inserted { report.failed_rows += 1; }
                }
            }
        }

        tracing::warn!(event_type = %event.event_type, payment_ref, rows = report.failed_rows, "Payment did not complete");
        if report.failed_rows > 0 {
            self.events.publish(DomainEvent::PaymentFailed { payment_ref: payment_ref.to_string(), user_id: metadata.buyer(), amount: total.amount() }).await;
        }
        Ok(report)
    }

    /// Logs a diagnostic when a fully recorded payment does not add up to what the processor charged.
    async fn check_charged_total(&self, event: &WebhookEvent, report: &mut FulfillmentReport) {
        let Some(charged) = event.object.amount_total else { return };
        if report.skipped > 0 || report.errors > 0 || report.recorded.minor_units() == Some(charged) {
            return;
        }
        report.errors += 1;
        self.log_error(event, format!("ledger total {} does not match charged amount of {charged} minor units", report.recorded)).await;
    }

    /// Best effort: the ledger already says the rank is owned whatever happens here.
    async fn push_entitlement(&self, grant: &RankGrant) -> bool {
        let profile = match self.store.profile(grant.user_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(user_id = %grant.user_id, error = %e, "Could not load profile for rank grant");
                None
            }
        };
        let Some(username) = profile.and_then(|p| p.minecraft_username) else {
            tracing::warn!(user_id = %grant.user_id, rank = %grant.rank_name, "No Minecraft username linked, rank not applied in game");
            self.events.publish(DomainEvent::RankGrantFailed {
                user_id: grant.user_id,
                rank: grant.rank_name.clone(),
                reason: "no linked Minecraft username".into(),
            }).await;
            return false;
        };

        if self.entitlements.apply_rank(username.as_str(), &grant.rank_name).await {
            self.events.publish(DomainEvent::RankGranted { user_id: grant.user_id, username: username.to_string(), rank: grant.rank_name.clone() }).await;
            true
        } else {
            tracing::warn!(user_id = %grant.user_id, username = %username, rank = %grant.rank_name, "Rank paid for but not applied in game");
            self.events.publish(DomainEvent::RankGrantFailed {
                user_id: grant.user_id,
                rank: grant.rank_name.clone(),
                reason: "game server command failed".into(),
            }).await;
            false
        }
    }

    async fn rank(&self, rank_id: Uuid) -> Result<Rank> {
        self.store.rank(rank_id).await?.ok_or_else(|| StoreError::not_found(format!("Rank {rank_id}")))
    }

    async fn log_error(&self, event: &WebhookEvent, error: String) {
        tracing::error!(event_type = %event.event_type, session_id = %event.object.id, %error, "Webhook processing error");
        let row = WebhookError::new(event.event_type.clone(), event.object.id.clone(), error);
        if let Err(e) = self.store.record_webhook_error(&row).await {
            tracing::error!(error = %e, "Could not persist webhook error");
        }
    }
}
