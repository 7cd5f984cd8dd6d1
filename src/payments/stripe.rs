//! Stripe Checkout client

use async_trait::async_trait;
use serde::Deserialize;
use crate::config::PaymentConfig;
use crate::payments::{CreatedSession, PaymentProcessor, SessionRequest};
use crate::{Result, StoreError};

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    cfg: PaymentConfig,
}

#[derive(Deserialize)]
struct SessionResponse { id: String, url: Option<String> }

impl StripeClient {
    pub fn new(cfg: PaymentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| StoreError::PaymentProcessor(e.to_string()))?;
        Ok(Self { http, cfg })
    }

    /// Form body for `POST /v1/checkout/sessions`. The whole purchase is charged as a single
    /// line of quantity one; metadata is copied onto the payment intent so failure events
    /// carry it too.
    pub fn session_form(&self, req: &SessionRequest) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), req.success_url.clone()),
            ("cancel_url".into(), req.cancel_url.clone()),
            ("line_items[0][quantity]".into(), "1".into()),
            ("line_items[0][price_data][currency]".into(), self.cfg.currency.clone()),
            ("line_items[0][price_data][unit_amount]".into(), req.unit_amount.to_string()),
            ("line_items[0][price_data][product_data][name]".into(), req.product_name.clone()),
        ];
        if !req.description.is_empty() {
            form.push(("line_items[0][price_data][product_data][description]".into(), req.description.clone()));
        }
        for (k, v) in req.metadata.to_map() {
            form.push((format!("metadata[{k}]"), v.clone()));
            form.push((format!("payment_intent_data[metadata][{k}]"), v));
        }
        form
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_session(&self, req: &SessionRequest) -> Result<CreatedSession> {
        let url = format!("{}/v1/checkout/sessions", self.cfg.api_base.trim_end_matches('/'));
        let resp = self.http
            .post(url)
            .basic_auth(&self.cfg.secret_key, None::<&str>)
            .form(&self.session_form(req))
            .send()
            .await
            .map_err(|e| StoreError::PaymentProcessor(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(%status, body = %body, "Checkout session creation rejected");
            return Err(StoreError::PaymentProcessor(format!("session creation failed with {status}")));
        }

        let session: SessionResponse = resp.json().await.map_err(|e| StoreError::PaymentProcessor(e.to_string()))?;
        let url = session.url.ok_or_else(|| StoreError::PaymentProcessor("session has no redirect url".into()))?;
        tracing::info!(session_id = %session.id, amount = req.unit_amount, "Checkout session created");
        Ok(CreatedSession { id: session.id, url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Money;
    use crate::payments::PurchaseMetadata;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use uuid::Uuid;

    fn client() -> StripeClient {
        StripeClient::new(PaymentConfig {
            secret_key: "sk_test".into(), webhook_secret: "whsec_test".into(), api_base: "https://api.stripe.com".into(),
            currency: "eur".into(), webhook_tolerance: Duration::from_secs(300), timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_session_form() {
        let req = SessionRequest {
            unit_amount: 500,
            product_name: "Rank Hero".into(),
            description: String::new(),
            metadata: PurchaseMetadata::Rank {
                user_id: Uuid::now_v7(), rank_id: Uuid::now_v7(), original_price: Money::new(dec!(5)),
                discounted_price: Money::new(dec!(5)), previous_rank_id: None,
            },
            success_url: "https://geomc.fr/payment/success".into(),
            cancel_url: "https://geomc.fr/payment/cancel".into(),
        };
        let form = client().session_form(&req);
        let get = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("500"));
        assert_eq!(get("line_items[0][quantity]"), Some("1"));
        assert_eq!(get("line_items[0][price_data][currency]"), Some("eur"));
        assert_eq!(get("metadata[discounted_price]"), Some("5.00"));
        assert_eq!(get("payment_intent_data[metadata][discounted_price]"), Some("5.00"));
        assert!(get("line_items[0][price_data][product_data][description]").is_none());
    }
}
