//! # ledgerly-payments
//!
//! Payment webhooks for ledgerly. Each processor is a [`PaymentProvider`]
//! that verifies its own signature scheme and normalizes its payload into a
//! [`PaymentEvent`]; the [`PaymentReconciler`] applies those events to the
//! payment ledger and job store without looking at provider JSON.
//!
//! Also provides the price table and [`CheckoutService`], which records the
//! pending payment a later webhook settles.

pub mod checkout;
pub mod error;
pub mod pricing;
pub mod provider;
pub mod reconciler;
pub mod signature;
pub mod stripe;
pub mod xendit;

pub use checkout::{CheckoutRequest, CheckoutService, CheckoutSession};
pub use error::ReconcileError;
pub use pricing::{price_for, provider_for_currency, Plan, Price};
pub use provider::{PaidEvent, PaymentEvent, PaymentProvider};
pub use reconciler::{PaymentReconciler, ReconcileOutcome};
pub use stripe::{StripeProvider, STRIPE_SIGNATURE_HEADER};
pub use xendit::{external_id_for, parse_external_job_id, XenditProvider, XENDIT_SIGNATURE_HEADER};
