//! Provider strategy and the normalized events it produces.

use serde_json::{Map, Value as JsonValue};

use ledgerly_core::{JobId, ProviderKind};

use crate::error::ReconcileError;

/// A completed payment as reported by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PaidEvent {
    pub job_id: JobId,
    pub email: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub provider_payment_id: Option<String>,
    /// Provider-specific fields stored alongside the ledger row.
    pub extra: Map<String, JsonValue>,
}

/// Provider webhook normalized to the effects the reconciler understands.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    Paid(PaidEvent),
    /// A previously recorded pending payment has settled.
    Confirmed { job_id: Option<JobId> },
    /// The checkout lapsed without payment.
    Expired { job_id: Option<JobId> },
    /// Recognized envelope, event type with no effect.
    Ignored { event_type: String },
}

impl PaymentEvent {
    pub fn name(&self) -> &str {
        match self {
            PaymentEvent::Paid(_) => "paid",
            PaymentEvent::Confirmed { .. } => "confirmed",
            PaymentEvent::Expired { .. } => "expired",
            PaymentEvent::Ignored { event_type } => event_type,
        }
    }
}

/// One payment processor's webhook dialect.
///
/// `verify` runs on the raw body before `parse` ever sees it.
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Request header carrying the signature.
    fn signature_header(&self) -> &'static str;

    fn verify(&self, raw: &[u8], signature: &str) -> Result<(), ReconcileError>;

    fn parse(&self, raw: &[u8]) -> Result<PaymentEvent, ReconcileError>;
}

/// Non-empty string at `pointer`.
pub(crate) fn str_at<'a>(value: &'a JsonValue, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Number at `pointer`, accepting numeric strings.
pub(crate) fn number_at(value: &JsonValue, pointer: &str) -> Option<f64> {
    match value.pointer(pointer)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
