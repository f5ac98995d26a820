//! Price table and currency routing.

use serde::{Deserialize, Serialize};

use ledgerly_core::defaults::{
    PRICE_IDR_MONTHLY, PRICE_IDR_SINGLE, PRICE_USD_MONTHLY, PRICE_USD_SINGLE,
};
use ledgerly_core::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Single,
    Monthly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    pub provider: ProviderKind,
    pub amount: f64,
    pub currency: &'static str,
}

/// Rupiah goes to Xendit, everything else to Stripe.
pub fn provider_for_currency(currency: &str) -> ProviderKind {
    if currency.eq_ignore_ascii_case("idr") {
        ProviderKind::Xendit
    } else {
        ProviderKind::Stripe
    }
}

/// `None` for currencies without a list price.
pub fn price_for(currency: &str, plan: Plan) -> Option<Price> {
    let (currency, amount) = match (currency.to_ascii_lowercase().as_str(), plan) {
        ("usd", Plan::Single) => ("usd", PRICE_USD_SINGLE),
        ("usd", Plan::Monthly) => ("usd", PRICE_USD_MONTHLY),
        ("idr", Plan::Single) => ("idr", PRICE_IDR_SINGLE),
        ("idr", Plan::Monthly) => ("idr", PRICE_IDR_MONTHLY),
        _ => return None,
    };
    Some(Price {
        provider: provider_for_currency(currency),
        amount,
        currency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing() {
        assert_eq!(provider_for_currency("IDR"), ProviderKind::Xendit);
        assert_eq!(provider_for_currency("usd"), ProviderKind::Stripe);
        assert_eq!(provider_for_currency("eur"), ProviderKind::Stripe);
    }

    #[test]
    fn test_price_table() {
        let usd = price_for("USD", Plan::Single).unwrap();
        assert_eq!(usd.amount, 5.0);
        assert_eq!(usd.provider, ProviderKind::Stripe);
        let idr = price_for("idr", Plan::Single).unwrap();
        assert_eq!(idr.amount, 40_000.0);
        assert_eq!(idr.provider, ProviderKind::Xendit);
        assert_eq!(price_for("idr", Plan::Monthly).unwrap().amount, 50_000.0);
        assert!(price_for("eur", Plan::Single).is_none());
    }
}
