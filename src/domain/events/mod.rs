//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    PurchaseCompleted { session_id: String, user_id: Uuid, ranks: Vec<String>, store_lines: usize },
    RankGranted { user_id: Uuid, username: String, rank: String },
    RankGrantFailed { user_id: Uuid, rank: String, reason: String },
    PaymentFailed { payment_ref: String, user_id: Uuid, amount: Decimal },
}

impl DomainEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::PurchaseCompleted { .. } => "store.purchase.completed",
            Self::RankGranted { .. } => "store.rank.granted",
            Self::RankGrantFailed { .. } => "store.rank.grant_failed",
            Self::PaymentFailed { .. } => "store.payment.failed",
        }
    }
}

/// Best-effort publisher of domain events. Without a NATS connection events are only logged.
#[derive(Clone, Default)]
pub struct EventPublisher { nats: Option<async_nats::Client> }

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub async fn publish(&self, event: DomainEvent) {
        let subject = event.subject();
        let Some(nats) = &self.nats else {
            tracing::debug!(subject, ?event, "No event bus configured");
            return;
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => { tracing::warn!(subject, error = %e, "Failed to serialize domain event"); return; }
        };
        if let Err(e) = nats.publish(subject.to_string(), payload.into()).await {
            tracing::warn!(subject, error = %e, "Failed to publish domain event");
        }
    }
}
