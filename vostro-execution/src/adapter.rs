use crate::{balance::Balance, error::AdapterError, id::OrderId, order::Order, track::TrackOrder};
use chrono::{DateTime, Utc};
use vostro_instrument::{currency::Currency, transaction::map::PairTransactionMap};

/// Per-venue adapter invoked by the exchange runtime.
///
/// Read-only calls and `cancel_order` are wrapped in the retry helper by
/// the runtime; `set_order` is never retried at this layer, re-submission
/// only happens through the order-error path after the available amount
/// has been recomputed.
pub trait ExchangeAdapter: Send + Sync {
    /// Populate a fresh pair map from the venue. Returns the venue's
    /// server time when it is known, so the runtime can track the clock
    /// delta.
    fn update_properties(
        &self,
        map: &PairTransactionMap,
    ) -> Result<Option<DateTime<Utc>>, AdapterError>;

    /// Update the rates of every pair of `map` in one call.
    fn update_rates(&self, _map: &PairTransactionMap) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported)
    }

    /// Update the rates of every pair of `map` involving `currency`.
    fn update_rates_currency(
        &self,
        _map: &PairTransactionMap,
        _currency: Currency,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported)
    }

    /// Update the rate of one non-inverted pair of `map`.
    fn update_rates_pair(
        &self,
        _map: &PairTransactionMap,
        _initial: Currency,
        _final_currency: Currency,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported)
    }

    /// Start a push-based rate feed (polling mode `None`).
    fn update_rates_start(&self) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported)
    }

    /// Stop the push-based rate feed.
    fn update_rates_stop(&self) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported)
    }

    /// Populate `balance` from the venue.
    fn update_balance(&self, balance: &Balance) -> Result<(), AdapterError>;

    /// Populate the open-orders snapshot.
    fn update_orders(&self, orders: &mut Vec<TrackOrder>) -> Result<(), AdapterError>;

    /// Submit an order. The venue may report zero or more ids; zero means
    /// the order will only be recognisable by reconciliation.
    fn set_order(&self, order: &Order, amount: f64) -> Result<Vec<OrderId>, AdapterError>;

    /// Cancel an order. Must be idempotent: cancelling twice is harmless.
    fn cancel_order(&self, track: &TrackOrder) -> Result<(), AdapterError>;

    /// Withdraw `amount` of `currency` from the venue.
    fn withdraw(&self, _currency: Currency, _amount: f64) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported)
    }
}
