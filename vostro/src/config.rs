use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Rates acquisition mode of a venue adapter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RatesPolling {
    /// Push adapter: `update_rates_start` is invoked once and the adapter
    /// feeds rates on its own.
    None,
    /// One `update_rates` call per period.
    UpdateRates,
    /// One `update_rates_currency` task per currency, in parallel.
    UpdateRatesSpecificCurrency,
    /// One `update_rates_pair` task per non-inverted pair, in parallel.
    UpdateRatesSpecificPair,
}

/// Per-exchange configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExchangeConfig {
    /// Where all exchange output (CSV recordings) is stored.
    pub output_directory: PathBuf,
    /// Whether the venue's balance already counts funds tied to open
    /// orders.
    pub balance_include_reserve: bool,
    /// Enable the rates CSV recorder.
    pub rates_recording: bool,
    pub rates_polling: RatesPolling,
    pub rates_polling_period_ms: u64,
    pub order_polling_period_ms: u64,
    pub properties_polling_period_ms: u64,
    /// Deadline for an order to appear on the venue after placement, and
    /// for a cancel to be confirmed.
    pub order_register_timeout_ms: u64,
    /// Cap per-transaction exposure and refuse overlapping orders.
    pub order_diversification: bool,
    /// Disable every write path.
    pub read_only: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("."),
            balance_include_reserve: false,
            rates_recording: true,
            rates_polling: RatesPolling::UpdateRates,
            rates_polling_period_ms: 1_000,
            order_polling_period_ms: 10_000,
            properties_polling_period_ms: 10 * 60 * 1_000,
            order_register_timeout_ms: 20_000,
            order_diversification: true,
            read_only: false,
        }
    }
}

impl ExchangeConfig {
    pub fn is_rates_polling(&self) -> bool {
        self.rates_polling != RatesPolling::None
    }

    pub fn rates_polling_period(&self) -> Duration {
        Duration::from_millis(self.rates_polling_period_ms)
    }

    pub fn order_polling_period(&self) -> Duration {
        Duration::from_millis(self.order_polling_period_ms)
    }

    pub fn properties_polling_period(&self) -> Duration {
        Duration::from_millis(self.properties_polling_period_ms)
    }

    pub fn order_register_timeout(&self) -> Duration {
        Duration::from_millis(self.order_register_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExchangeConfig::default();
        assert_eq!(config.rates_polling, RatesPolling::UpdateRates);
        assert_eq!(config.rates_polling_period(), Duration::from_secs(1));
        assert_eq!(config.order_polling_period(), Duration::from_secs(10));
        assert_eq!(config.order_register_timeout(), Duration::from_secs(20));
        assert!(config.order_diversification);
        assert!(!config.read_only);
    }

    #[test]
    fn test_partial_deserialisation_falls_back_to_defaults() {
        let config: ExchangeConfig =
            serde_json::from_str(r#"{"readOnly": true, "ratesPolling": "none"}"#).unwrap();
        assert!(config.read_only);
        assert_eq!(config.rates_polling, RatesPolling::None);
        assert_eq!(config.order_polling_period_ms, 10_000);
    }
}
