//! Stripe webhooks.
//!
//! `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`. The signed payload is
//! `"{t}.{raw body}"`; any `v1` entry may match. Timestamps outside the
//! tolerance window are rejected to limit replay.

use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use ledgerly_core::defaults::STRIPE_SIGNATURE_TOLERANCE_SECS;
use ledgerly_core::{JobId, ProviderKind};

use crate::error::ReconcileError;
use crate::provider::{number_at, str_at, PaidEvent, PaymentEvent, PaymentProvider};
use crate::signature::{sign_hex, verify_hex};

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub struct StripeProvider {
    secret: String,
    tolerance_secs: i64,
}

impl StripeProvider {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            secret: webhook_secret.into(),
            tolerance_secs: STRIPE_SIGNATURE_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance_secs(mut self, secs: i64) -> Self {
        self.tolerance_secs = secs;
        self
    }

    /// Verify against an explicit clock.
    pub fn verify_at(&self, raw: &[u8], header: &str, now: i64) -> Result<(), ReconcileError> {
        let mut timestamp: Option<&str> = None;
        let mut candidates = Vec::new();
        for item in header.split(',') {
            match item.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(ReconcileError::InvalidSignature)?;
        let issued: i64 = timestamp
            .parse()
            .map_err(|_| ReconcileError::InvalidSignature)?;
        let skew = now.checked_sub(issued).map(i64::unsigned_abs);
        if skew.map_or(true, |skew| skew > self.tolerance_secs.unsigned_abs()) {
            debug!(issued, now, "Stripe signature outside tolerance");
            return Err(ReconcileError::InvalidSignature);
        }

        let parts: [&[u8]; 3] = [timestamp.as_bytes(), b".", raw];
        if candidates
            .iter()
            .any(|sig| verify_hex(self.secret.as_bytes(), &parts, sig))
        {
            Ok(())
        } else {
            Err(ReconcileError::InvalidSignature)
        }
    }

    /// Header value a sender would produce for `raw` at `timestamp`.
    pub fn sign(&self, raw: &[u8], timestamp: i64) -> String {
        let t = timestamp.to_string();
        let sig = sign_hex(self.secret.as_bytes(), &[t.as_bytes(), b".", raw]);
        format!("t={},v1={}", t, sig)
    }
}

impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn signature_header(&self) -> &'static str {
        STRIPE_SIGNATURE_HEADER
    }

    fn verify(&self, raw: &[u8], signature: &str) -> Result<(), ReconcileError> {
        self.verify_at(raw, signature, Utc::now().timestamp())
    }

    fn parse(&self, raw: &[u8]) -> Result<PaymentEvent, ReconcileError> {
        let payload: JsonValue = serde_json::from_slice(raw)?;
        let event_type = str_at(&payload, "/type")
            .ok_or_else(|| ReconcileError::MalformedPayload("missing event type".into()))?;
        let object = payload
            .pointer("/data/object")
            .ok_or_else(|| ReconcileError::MalformedPayload("missing data.object".into()))?;
        let job_id = str_at(object, "/metadata/jobId").and_then(|id| JobId::parse(id).ok());

        match event_type {
            "checkout.session.completed" => {
                let job_id = job_id.ok_or_else(|| {
                    ReconcileError::MalformedPayload("no jobId in session metadata".into())
                })?;
                let amount = number_at(object, "/amount_total").unwrap_or(0.0) / 100.0;
                let currency = str_at(object, "/currency")
                    .unwrap_or("usd")
                    .to_ascii_lowercase();
                Ok(PaymentEvent::Paid(PaidEvent {
                    job_id,
                    email: str_at(object, "/customer_email").map(String::from),
                    amount,
                    currency,
                    provider_payment_id: str_at(object, "/id").map(String::from),
                    extra: Map::new(),
                }))
            }
            "checkout.session.expired" => Ok(PaymentEvent::Expired { job_id }),
            "payment_intent.succeeded" => Ok(PaymentEvent::Confirmed { job_id }),
            other => Ok(PaymentEvent::Ignored {
                event_type: other.to_string(),
            }),
        }
    }
}
