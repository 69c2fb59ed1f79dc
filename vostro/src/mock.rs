use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{Arc, atomic::{AtomicBool, AtomicU64, Ordering}},
};
use tracing::debug;
use vostro_execution::{
    adapter::ExchangeAdapter,
    balance::Balance,
    error::AdapterError,
    id::OrderId,
    order::Order,
    track::TrackOrder,
};
use vostro_instrument::{
    currency::Currency,
    transaction::{Fees, Transaction, map::PairTransactionMap},
};

#[derive(Debug, Clone, Copy)]
struct MockPair {
    initial: Currency,
    final_currency: Currency,
    fee_percent: f64,
}

/// One row of the mock venue's open-orders book.
#[derive(Debug, Clone)]
pub struct MockOpenOrder {
    pub id: OrderId,
    pub initial: Currency,
    pub final_currency: Currency,
    pub rate: f64,
    pub amount: f64,
    pub creation_time: DateTime<Utc>,
}

/// Scripted in-memory venue.
///
/// Tests configure the tradable pairs, rates, balance and open-orders
/// book, and script `set_order` outcomes; every write call is recorded
/// for inspection.
#[derive(Debug, Default)]
pub struct MockExchange {
    pairs: Mutex<Vec<MockPair>>,
    rates: Mutex<Vec<((Currency, Currency), f64)>>,
    balances: Mutex<Vec<(Currency, f64)>>,
    open_orders: Mutex<Vec<MockOpenOrder>>,
    transactions: Mutex<Vec<(Currency, Currency, Arc<Transaction>)>>,
    set_order_results: Mutex<VecDeque<Result<Vec<OrderId>, AdapterError>>>,
    set_order_calls: Mutex<Vec<(Currency, Currency, f64)>>,
    cancelled: Mutex<Vec<OrderId>>,
    withdrawals: Mutex<Vec<(Currency, f64)>>,
    remove_on_cancel: AtomicBool,
    next_order_id: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_pair(&self, initial: Currency, final_currency: Currency, rate: f64) {
        self.add_pair_with_fee(initial, final_currency, rate, 0.0);
    }

    pub fn add_pair_with_fee(
        &self,
        initial: Currency,
        final_currency: Currency,
        rate: f64,
        fee_percent: f64,
    ) {
        self.pairs.lock().push(MockPair {
            initial,
            final_currency,
            fee_percent,
        });
        self.set_rate(initial, final_currency, rate);
    }

    pub fn set_rate(&self, initial: Currency, final_currency: Currency, rate: f64) {
        let mut rates = self.rates.lock();
        match rates
            .iter_mut()
            .find(|(pair, _)| *pair == (initial, final_currency))
        {
            Some((_, known)) => *known = rate,
            None => rates.push(((initial, final_currency), rate)),
        }
    }

    pub fn set_balance(&self, entries: &[(Currency, f64)]) {
        *self.balances.lock() = entries.to_vec();
    }

    pub fn set_open_orders(&self, orders: Vec<MockOpenOrder>) {
        *self.open_orders.lock() = orders;
    }

    /// Script the outcome of the next `set_order` call. Without a script
    /// the mock acknowledges with a generated id.
    pub fn push_set_order_result(&self, result: Result<Vec<OrderId>, AdapterError>) {
        self.set_order_results.lock().push_back(result);
    }

    /// Remove cancelled orders from the book automatically.
    pub fn set_remove_on_cancel(&self, enabled: bool) {
        self.remove_on_cancel.store(enabled, Ordering::SeqCst);
    }

    pub fn set_order_calls(&self) -> Vec<(Currency, Currency, f64)> {
        self.set_order_calls.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<OrderId> {
        self.cancelled.lock().clone()
    }

    pub fn withdrawals(&self) -> Vec<(Currency, f64)> {
        self.withdrawals.lock().clone()
    }

    /// The mock's own transaction for a pair, definition-equal to the one
    /// it reports through `update_properties`.
    fn transaction(&self, initial: Currency, final_currency: Currency) -> Option<Arc<Transaction>> {
        {
            let transactions = self.transactions.lock();
            if let Some((_, _, transaction)) = transactions
                .iter()
                .find(|(from, to, _)| (*from, *to) == (initial, final_currency))
            {
                return Some(Arc::clone(transaction));
            }
        }

        let pair = *self
            .pairs
            .lock()
            .iter()
            .find(|pair| (pair.initial, pair.final_currency) == (initial, final_currency))?;
        let transaction = Arc::new(
            Transaction::pair(initial, final_currency).with_fees(Fees {
                percent: pair.fee_percent,
                fixed: 0.0,
            }),
        );
        self.transactions
            .lock()
            .push((initial, final_currency, Arc::clone(&transaction)));
        Some(transaction)
    }

    fn apply_rates(&self, map: &PairTransactionMap) -> Result<(), AdapterError> {
        let now = Utc::now();
        for ((initial, final_currency), rate) in self.rates.lock().iter() {
            if let Some(transaction) = map.transaction(*initial, *final_currency) {
                transaction
                    .set_rate(*rate, now)
                    .map_err(|error| AdapterError::Api(error.to_string()))?;
            }
            if let Some(own) = self.transaction(*initial, *final_currency) {
                own.set_rate(*rate, now)
                    .map_err(|error| AdapterError::Api(error.to_string()))?;
            }
        }
        Ok(())
    }
}

impl ExchangeAdapter for MockExchange {
    fn update_properties(
        &self,
        map: &PairTransactionMap,
    ) -> Result<Option<DateTime<Utc>>, AdapterError> {
        let pairs = self.pairs.lock().clone();
        for pair in pairs {
            map.register_pair(
                Transaction::pair(pair.initial, pair.final_currency).with_fees(Fees {
                    percent: pair.fee_percent,
                    fixed: 0.0,
                }),
            )
            .map_err(|error| AdapterError::Api(error.to_string()))?;
        }
        Ok(Some(Utc::now()))
    }

    fn update_rates(&self, map: &PairTransactionMap) -> Result<(), AdapterError> {
        self.apply_rates(map)
    }

    fn update_rates_currency(
        &self,
        map: &PairTransactionMap,
        _currency: Currency,
    ) -> Result<(), AdapterError> {
        self.apply_rates(map)
    }

    fn update_rates_pair(
        &self,
        map: &PairTransactionMap,
        _initial: Currency,
        _final_currency: Currency,
    ) -> Result<(), AdapterError> {
        self.apply_rates(map)
    }

    fn update_balance(&self, balance: &Balance) -> Result<(), AdapterError> {
        for (currency, amount) in self.balances.lock().iter() {
            balance.set(*currency, *amount);
        }
        Ok(())
    }

    fn update_orders(&self, orders: &mut Vec<TrackOrder>) -> Result<(), AdapterError> {
        for open in self.open_orders.lock().iter() {
            let transaction = self
                .transaction(open.initial, open.final_currency)
                .ok_or_else(|| AdapterError::Api(format!("unknown pair for order {}", open.id)))?;
            orders.push(TrackOrder::from_transaction(
                open.id.clone(),
                transaction,
                open.rate,
                open.amount,
                open.creation_time,
            ));
        }
        Ok(())
    }

    fn set_order(&self, order: &Order, amount: f64) -> Result<Vec<OrderId>, AdapterError> {
        self.set_order_calls.lock().push((
            order.initial_currency(),
            order.first_final_currency(),
            amount,
        ));
        debug!(order = %order, amount, "mock set_order");

        match self.set_order_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(vec![OrderId::from(format!(
                "mock-{}",
                self.next_order_id.fetch_add(1, Ordering::Relaxed)
            ))]),
        }
    }

    fn cancel_order(&self, track: &TrackOrder) -> Result<(), AdapterError> {
        self.cancelled.lock().push(track.id().clone());
        if self.remove_on_cancel.load(Ordering::SeqCst) {
            self.open_orders
                .lock()
                .retain(|open| &open.id != track.id());
        }
        Ok(())
    }

    fn withdraw(&self, currency: Currency, amount: f64) -> Result<(), AdapterError> {
        self.withdrawals.lock().push((currency, amount));
        Ok(())
    }
}
