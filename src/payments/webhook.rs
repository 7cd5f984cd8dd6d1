//! Webhook signature verification and event envelope parsing.
//!
//! Signature header format: `t=<unix seconds>,v1=<hex hmac>[,v1=...]`, where the
//! HMAC-SHA256 is computed over `"{t}.{raw body}"` with the shared webhook secret.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use crate::{Result, StoreError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    CheckoutCompleted,
    PaymentFailed,
    CheckoutExpired,
    Other(String),
}

impl EventKind {
    fn from_type(value: &str) -> Self {
        match value {
            "checkout.session.completed" => Self::CheckoutCompleted,
            "payment_intent.payment_failed" => Self::PaymentFailed,
            "checkout.session.expired" => Self::CheckoutExpired,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The `data.object` of an event: a checkout session or a payment intent.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EventObject {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub payment_status: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub kind: EventKind,
    pub object: EventObject,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData { object: EventObject }

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(payload).map_err(|e| StoreError::MalformedPayload(e.to_string()))?;
        Ok(Self {
            id: envelope.id,
            kind: EventKind::from_type(&envelope.event_type),
            event_type: envelope.event_type,
            object: envelope.data.object,
        })
    }
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self { Self { secret: secret.into(), tolerance } }

    /// Verifies the signature against the current clock, then parses the envelope.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<WebhookEvent> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())?;
        WebhookEvent::parse(payload)
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<()> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = v.parse().ok(),
                Some(("v1", v)) => candidates.push(v),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Webhook signature header has no timestamp");
            StoreError::InvalidSignature
        })?;
        if candidates.is_empty() {
            tracing::warn!("Webhook signature header has no v1 signature");
            return Err(StoreError::InvalidSignature);
        }
        let age = now.abs_diff(timestamp);
        if age > self.tolerance.as_secs() {
            tracing::warn!(timestamp, now, "Webhook timestamp outside tolerance");
            return Err(StoreError::InvalidSignature);
        }

        let mac = self.mac(payload, timestamp)?;
        let matched = candidates
            .iter()
            .filter_map(|c| hex::decode(c).ok())
            .any(|sig| mac.clone().verify_slice(&sig).is_ok());
        if !matched {
            tracing::warn!("Webhook signature mismatch");
            return Err(StoreError::InvalidSignature);
        }
        Ok(())
    }

    /// Builds a valid signature header for `payload`, as the processor would send it.
    pub fn signature_header(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let digest = self.mac(payload, timestamp)?.finalize().into_bytes();
        Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
    }

    fn mac(&self, payload: &[u8], timestamp: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|_| StoreError::InvalidSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1","metadata":{"user_id":"x"}}}}"#;

    fn verifier() -> WebhookVerifier { WebhookVerifier::new("whsec_test", Duration::from_secs(300)) }

    #[test]
    fn test_valid_signature() {
        let header = verifier().signature_header(BODY, NOW).unwrap();
        assert!(verifier().verify_at(BODY, &header, NOW + 10).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = WebhookVerifier::new("whsec_other", Duration::from_secs(300)).signature_header(BODY, NOW).unwrap();
        assert!(matches!(verifier().verify_at(BODY, &header, NOW), Err(StoreError::InvalidSignature)));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = verifier().signature_header(BODY, NOW).unwrap();
        assert!(verifier().verify_at(b"{}", &header, NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let header = verifier().signature_header(BODY, NOW).unwrap();
        assert!(verifier().verify_at(BODY, &header, NOW + 301).is_err());
    }

    #[test]
    fn test_garbage_headers_rejected() {
        for header in ["", "garbage", "t=1700000000", "v1=abcd"] {
            assert!(verifier().verify_at(BODY, header, NOW).is_err(), "{header}");
        }
    }

    #[test]
    fn test_any_matching_v1_accepted() {
        let good = verifier().signature_header(BODY, NOW).unwrap();
        let header = format!("t={NOW},v1=deadbeef,{}", good.split(',').nth(1).unwrap());
        assert!(verifier().verify_at(BODY, &header, NOW).is_ok());
    }

    #[test]
    fn test_parse_envelope() {
        let event = WebhookEvent::parse(BODY).unwrap();
        assert_eq!(event.kind, EventKind::CheckoutCompleted);
        assert_eq!(event.object.id, "cs_1");
        assert_eq!(event.object.metadata.get("user_id").map(String::as_str), Some("x"));
        let other = WebhookEvent::parse(br#"{"type":"invoice.paid","data":{"object":{"id":"in_1"}}}"#).unwrap();
        assert_eq!(other.kind, EventKind::Other("invoice.paid".into()));
        assert!(WebhookEvent::parse(b"not json").is_err());
    }
}
