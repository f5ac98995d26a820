//! Xendit invoice callbacks.
//!
//! `x-callback-signature` carries the hex HMAC-SHA256 of the raw body keyed
//! with the webhook key. Jobs are referenced through the invoice
//! `external_id`, formatted `job_<jobId>_<suffix>`.

use serde_json::{Map, Value as JsonValue};

use ledgerly_core::defaults::EXTERNAL_ID_PREFIX;
use ledgerly_core::{JobId, ProviderKind};

use crate::error::ReconcileError;
use crate::provider::{number_at, str_at, PaidEvent, PaymentEvent, PaymentProvider};
use crate::signature::{sign_hex, verify_hex};

pub const XENDIT_SIGNATURE_HEADER: &str = "x-callback-signature";

pub struct XenditProvider {
    key: String,
}

impl XenditProvider {
    pub fn new(webhook_key: impl Into<String>) -> Self {
        Self {
            key: webhook_key.into(),
        }
    }

    /// Header value a sender would produce for `raw`.
    pub fn sign(&self, raw: &[u8]) -> String {
        sign_hex(self.key.as_bytes(), &[raw])
    }
}

/// Job id embedded in an invoice external id.
///
/// Drops a leading `job_`, then takes the first non-empty `_`-separated segment.
pub fn parse_external_job_id(external_id: &str) -> Option<JobId> {
    let rest = external_id
        .trim()
        .strip_prefix(EXTERNAL_ID_PREFIX)
        .unwrap_or(external_id.trim());
    rest.split('_')
        .find(|segment| !segment.is_empty())
        .and_then(|segment| JobId::parse(segment).ok())
}

/// External id for a new invoice.
pub fn external_id_for(job_id: &JobId, suffix: impl std::fmt::Display) -> String {
    format!("{}{}_{}", EXTERNAL_ID_PREFIX, job_id, suffix)
}

impl PaymentProvider for XenditProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Xendit
    }

    fn signature_header(&self) -> &'static str {
        XENDIT_SIGNATURE_HEADER
    }

    fn verify(&self, raw: &[u8], signature: &str) -> Result<(), ReconcileError> {
        if verify_hex(self.key.as_bytes(), &[raw], signature) {
            Ok(())
        } else {
            Err(ReconcileError::InvalidSignature)
        }
    }

    fn parse(&self, raw: &[u8]) -> Result<PaymentEvent, ReconcileError> {
        let payload: JsonValue = serde_json::from_slice(raw)?;
        let event_type = str_at(&payload, "/event")
            .ok_or_else(|| ReconcileError::MalformedPayload("missing event".into()))?;
        let data = payload
            .get("data")
            .ok_or_else(|| ReconcileError::MalformedPayload("missing data".into()))?;
        let job_id = str_at(data, "/external_id").and_then(parse_external_job_id);

        match event_type {
            "invoice.paid" => {
                let job_id = job_id.ok_or_else(|| {
                    ReconcileError::MalformedPayload("no jobId in invoice external_id".into())
                })?;
                let mut extra = Map::new();
                if let Some(url) = str_at(data, "/invoice_url") {
                    extra.insert("invoiceUrl".into(), JsonValue::String(url.to_string()));
                }
                Ok(PaymentEvent::Paid(PaidEvent {
                    job_id,
                    email: str_at(data, "/customer/email").map(String::from),
                    amount: number_at(data, "/amount").unwrap_or(0.0),
                    currency: str_at(data, "/currency")
                        .unwrap_or("idr")
                        .to_ascii_lowercase(),
                    provider_payment_id: str_at(data, "/id").map(String::from),
                    extra,
                }))
            }
            "invoice.expired" => Ok(PaymentEvent::Expired { job_id }),
            other => Ok(PaymentEvent::Ignored {
                event_type: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_external_id_with_suffix() {
        assert_eq!(
            parse_external_job_id("job_abc123_extra").unwrap().as_str(),
            "abc123"
        );
        assert_eq!(
            parse_external_job_id("job_abc123_1760000000").unwrap().as_str(),
            "abc123"
        );
    }

    #[test]
    fn test_external_id_edge_cases() {
        assert_eq!(parse_external_job_id("job_abc").unwrap().as_str(), "abc");
        assert_eq!(parse_external_job_id("job__abc").unwrap().as_str(), "abc");
        assert!(parse_external_job_id("job_").is_none());
        assert!(parse_external_job_id("").is_none());
    }

    #[test]
    fn test_external_id_round_trip() {
        let id = JobId::parse("0192f0c4a1b27e3c").unwrap();
        let external = external_id_for(&id, 1_760_000_000);
        assert_eq!(parse_external_job_id(&external), Some(id));
    }

    #[test]
    fn test_signature_over_raw_body() {
        let provider = XenditProvider::new("xnd_key");
        let body = br#"{"event":"invoice.paid"}"#;
        let sig = provider.sign(body);
        assert!(provider.verify(body, &sig).is_ok());
        assert!(provider.verify(b"{}", &sig).is_err());
    }

    #[test]
    fn test_parse_invoice_paid() {
        let body = json!({
            "event": "invoice.paid",
            "data": {
                "id": "inv_1",
                "external_id": "job_abc123_extra",
                "amount": 40000,
                "customer": {"email": "c@d.id"},
                "invoice_url": "https://checkout.xendit.co/inv_1"
            }
        });
        let event = XenditProvider::new("k")
            .parse(body.to_string().as_bytes())
            .unwrap();
        let PaymentEvent::Paid(paid) = event else {
            panic!("expected paid");
        };
        assert_eq!(paid.job_id.as_str(), "abc123");
        assert_eq!(paid.amount, 40000.0);
        assert_eq!(paid.currency, "idr");
        assert_eq!(
            paid.extra.get("invoiceUrl"),
            Some(&json!("https://checkout.xendit.co/inv_1"))
        );
    }

    #[test]
    fn test_expired_without_external_id_has_no_job() {
        let body = json!({"event": "invoice.expired", "data": {"id": "inv_2"}});
        let event = XenditProvider::new("k")
            .parse(body.to_string().as_bytes())
            .unwrap();
        assert_eq!(event, PaymentEvent::Expired { job_id: None });
    }
}
