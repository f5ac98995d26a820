//! Shared handler state.

use std::sync::Arc;

use tracing::warn;

use ledgerly_core::{JobStore, PaymentLedger, QueueClient};
use ledgerly_payments::{CheckoutService, PaymentReconciler, StripeProvider, XenditProvider};

use crate::config::AppConfig;
use crate::services::DeliveryGate;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn QueueClient>,
    pub reconciler: Arc<PaymentReconciler>,
    pub checkout: Arc<CheckoutService>,
    pub gate: Arc<DeliveryGate>,
}

impl AppState {
    /// Wire the services over the given stores.
    ///
    /// A payment provider is registered only when its webhook secret is
    /// configured; webhooks for the other are rejected.
    pub fn new(
        config: AppConfig,
        jobs: Arc<dyn JobStore>,
        ledger: Arc<dyn PaymentLedger>,
        queue: Arc<dyn QueueClient>,
    ) -> Self {
        let mut reconciler = PaymentReconciler::new(jobs.clone(), ledger.clone());
        match &config.stripe_webhook_secret {
            Some(secret) => {
                reconciler = reconciler.with_provider(Arc::new(StripeProvider::new(secret.clone())))
            }
            None => warn!("STRIPE_WEBHOOK_SECRET not set, Stripe webhooks will be rejected"),
        }
        match &config.xendit_webhook_key {
            Some(key) => {
                reconciler = reconciler.with_provider(Arc::new(XenditProvider::new(key.clone())))
            }
            None => warn!("XENDIT_API_KEY not set, Xendit webhooks will be rejected"),
        }

        Self {
            checkout: Arc::new(CheckoutService::new(jobs.clone(), ledger.clone())),
            gate: Arc::new(DeliveryGate::new(jobs.clone(), ledger)),
            reconciler: Arc::new(reconciler),
            config: Arc::new(config),
            jobs,
            queue,
        }
    }
}
