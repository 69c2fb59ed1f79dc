use std::{
    fmt::{Display, Formatter},
    sync::Arc,
    time::Duration,
};
use vostro_instrument::{currency::Currency, format, transaction::Transaction};

/// Default order timeout before the engine cancels it on the venue.
pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Tolerant float equality for amounts and rates that went through
/// decimal formatting.
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0) * 4.0
}

/// An order over a transaction, optionally chained to a next order.
///
/// The rate is either fixed by the strategy (limit) or tracks the
/// transaction's live rate (market). The chain is singly linked; the
/// engine completes one leg at a time, feeding each leg's final amount
/// into the next.
#[derive(Debug, Clone)]
pub struct Order {
    transaction: Arc<Transaction>,
    specific_rate: Option<f64>,
    timeout: Duration,
    next: Option<Box<Order>>,
}

impl Order {
    /// A market order: the rate follows the transaction.
    pub fn new(transaction: Arc<Transaction>) -> Self {
        Self {
            transaction,
            specific_rate: None,
            timeout: DEFAULT_ORDER_TIMEOUT,
            next: None,
        }
    }

    /// A limit order at `rate`.
    pub fn with_rate(transaction: Arc<Transaction>, rate: f64) -> Self {
        let mut order = Self::new(transaction);
        order.set_rate(rate);
        order
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fix the rate, ceiled at the transaction's precision so rounding
    /// never works against the engine.
    pub fn set_rate(&mut self, rate: f64) {
        self.specific_rate = Some(format::ceil_to(rate, self.transaction.decimal_place()));
    }

    pub fn is_fixed_rate(&self) -> bool {
        self.specific_rate.is_some()
    }

    /// The current rate of the first leg.
    pub fn rate(&self) -> f64 {
        self.specific_rate.unwrap_or_else(|| self.transaction.rate())
    }

    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.transaction
    }

    pub fn next(&self) -> Option<&Order> {
        self.next.as_deref()
    }

    /// The leg at `position` along the chain.
    pub fn at(&self, position: usize) -> Option<&Order> {
        let mut order = self;
        for _ in 0..position {
            order = order.next()?;
        }
        Some(order)
    }

    /// Append `order` at the end of the chain.
    pub fn push_next(&mut self, order: Order) {
        let mut tail = &mut self.next;
        while let Some(next) = tail {
            tail = &mut next.next;
        }
        *tail = Some(Box::new(order));
    }

    pub fn chain_len(&self) -> usize {
        let mut length = 1;
        let mut order = self;
        while let Some(next) = order.next() {
            length += 1;
            order = next;
        }
        length
    }

    pub fn initial_currency(&self) -> Currency {
        self.transaction.initial_currency()
    }

    /// Final currency of the whole chain.
    pub fn final_currency(&self) -> Currency {
        let mut order = self;
        while let Some(next) = order.next() {
            order = next;
        }
        order.transaction.final_currency()
    }

    /// Final currency of the first leg only.
    pub fn first_final_currency(&self) -> Currency {
        self.transaction.final_currency()
    }

    /// Final amount of the first leg at the order's rate.
    pub fn first_final_amount(&self, amount: f64, include_fee: bool) -> f64 {
        self.transaction
            .final_amount_at(amount, self.rate(), include_fee)
    }

    /// Final amount after walking the whole chain.
    pub fn final_amount(&self, amount: f64, include_fee: bool) -> f64 {
        let mut processed = amount;
        let mut order = self;
        loop {
            processed = order.first_final_amount(processed, include_fee);
            match order.next() {
                Some(next) => order = next,
                None => return processed,
            }
        }
    }

    /// Initial amount of the first leg required to obtain `amount`.
    pub fn first_initial_amount(&self, amount: f64, include_fee: bool) -> f64 {
        self.transaction
            .initial_amount_at(amount, self.rate(), include_fee)
    }

    /// Initial amount required so the whole chain yields `amount`.
    pub fn initial_amount(&self, amount: f64, include_fee: bool) -> f64 {
        let downstream = match self.next() {
            Some(next) => next.initial_amount(amount, include_fee),
            None => amount,
        };
        self.first_initial_amount(downstream, include_fee)
    }

    /// Chain fee expressed in the initial currency.
    pub fn fee_initial_currency(&self, amount: f64) -> f64 {
        let mut processed = amount;
        let mut processed_no_fee = amount;
        let mut conversion = 1.0;
        let mut order = self;
        loop {
            let rate = order.transaction.rate();
            conversion *= rate;
            processed_no_fee *= rate;
            processed = order.transaction.final_amount_at(processed, rate, true);
            match order.next() {
                Some(next) => order = next,
                None => return (processed_no_fee - processed) / conversion,
            }
        }
    }

    /// Chain fee expressed in the final currency.
    pub fn fee_final_currency(&self, amount: f64) -> f64 {
        let mut processed = amount;
        let mut processed_no_fee = amount;
        let mut order = self;
        loop {
            let rate = order.transaction.rate();
            processed_no_fee *= rate;
            processed = order.transaction.final_amount_at(processed, rate, true);
            match order.next() {
                Some(next) => order = next,
                None => return processed_no_fee - processed,
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Check every leg's boundaries and that consecutive legs compose.
    pub fn is_valid(&self, amount: f64) -> bool {
        let mut processed = amount;
        let mut order = self;
        loop {
            if !order.transaction.is_valid(processed, order.rate()) {
                return false;
            }
            processed = order.first_final_amount(processed, true);
            let currency_to_match = order.first_final_currency();
            match order.next() {
                Some(next) => {
                    if next.initial_currency() != currency_to_match {
                        return false;
                    }
                    order = next;
                }
                None => return true,
            }
        }
    }

    /// Check only the first leg's boundaries.
    pub fn first_valid(&self, amount: f64) -> bool {
        self.transaction.is_valid(amount, self.rate())
    }

    /// Copy the first leg only, optionally freezing the current rate.
    pub fn copy_first(&self, with_fixed_rate: bool) -> Order {
        Order {
            transaction: Arc::clone(&self.transaction),
            specific_rate: if with_fixed_rate {
                Some(self.rate())
            } else {
                self.specific_rate
            },
            timeout: self.timeout,
            next: None,
        }
    }

    /// Definition equality of the first legs: same transaction and same
    /// fixed rate.
    pub fn same_definition(&self, other: &Order) -> bool {
        self.transaction.same_definition(other.transaction())
            && match (self.specific_rate, other.specific_rate) {
                (Some(a), Some(b)) => approx_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

impl Display for Order {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            self.transaction.initial_currency(),
            self.transaction.final_currency()
        )?;
        if let Some(rate) = self.specific_rate {
            write!(f, "(rate={rate}, timeout={}s)", self.timeout.as_secs())?;
        }
        if let Some(next) = self.next() {
            write!(f, " -> {next}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vostro_instrument::transaction::Fees;

    fn transaction(initial: Currency, final_currency: Currency, rate: f64) -> Arc<Transaction> {
        let transaction = Transaction::pair(initial, final_currency);
        transaction.set_rate(rate, Utc::now()).unwrap();
        Arc::new(transaction)
    }

    fn transaction_with_fee(
        initial: Currency,
        final_currency: Currency,
        rate: f64,
        percent: f64,
    ) -> Arc<Transaction> {
        let transaction = Transaction::pair(initial, final_currency).with_fees(Fees {
            percent,
            fixed: 0.0,
        });
        transaction.set_rate(rate, Utc::now()).unwrap();
        Arc::new(transaction)
    }

    #[test]
    fn test_market_order_tracks_transaction_rate() {
        let usd_eur = transaction(Currency::Usd, Currency::Eur, 0.5);
        let order = Order::new(Arc::clone(&usd_eur));
        assert!(!order.is_fixed_rate());
        assert_eq!(order.rate(), 0.5);

        usd_eur.set_rate(0.6, Utc::now()).unwrap();
        assert_eq!(order.rate(), 0.6);
    }

    #[test]
    fn test_limit_order_rate_is_fixed() {
        let usd_eur = transaction(Currency::Usd, Currency::Eur, 0.5);
        let order = Order::with_rate(Arc::clone(&usd_eur), 0.48);
        usd_eur.set_rate(0.6, Utc::now()).unwrap();
        assert_eq!(order.rate(), 0.48);
    }

    #[test]
    fn test_chain_final_amount_is_rate_product() {
        let mut order = Order::new(transaction(Currency::Usd, Currency::Eur, 0.5));
        order.push_next(Order::new(transaction(Currency::Eur, Currency::Btc, 0.0001)));

        assert_eq!(order.chain_len(), 2);
        assert_eq!(order.final_currency(), Currency::Btc);
        assert!((order.final_amount(100.0, false) - 100.0 * 0.5 * 0.0001).abs() < 1e-12);
    }

    #[test]
    fn test_final_amount_decreases_with_fee() {
        let mut with_fee = Order::new(transaction_with_fee(Currency::Usd, Currency::Eur, 0.5, 1.0));
        with_fee.push_next(Order::new(transaction_with_fee(
            Currency::Eur,
            Currency::Btc,
            0.0001,
            1.0,
        )));

        let mut no_fee = Order::new(transaction(Currency::Usd, Currency::Eur, 0.5));
        no_fee.push_next(Order::new(transaction(Currency::Eur, Currency::Btc, 0.0001)));

        assert!(with_fee.final_amount(100.0, true) < no_fee.final_amount(100.0, true));
    }

    #[test]
    fn test_initial_amount_inverts_final_amount() {
        let mut order = Order::new(transaction_with_fee(Currency::Usd, Currency::Eur, 0.5, 1.0));
        order.push_next(Order::new(transaction_with_fee(
            Currency::Eur,
            Currency::Btc,
            0.0001,
            0.5,
        )));

        let final_amount = order.final_amount(100.0, true);
        assert!((order.initial_amount(final_amount, true) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_is_valid_rejects_non_composing_chain() {
        let mut order = Order::new(transaction(Currency::Usd, Currency::Eur, 0.5));
        order.push_next(Order::new(transaction(Currency::Btc, Currency::Eur, 40000.0)));
        assert!(!order.is_valid(100.0));
    }

    #[test]
    fn test_is_valid_checks_each_leg_minimum() {
        let mut order = Order::new(transaction(Currency::Usd, Currency::Eur, 0.5));
        order.push_next(Order::new(transaction(Currency::Eur, Currency::Btc, 0.0001)));

        // 100 USD -> 50 EUR -> 0.005 BTC, all above the registered minimums.
        assert!(order.is_valid(100.0));
        // 3 USD -> 1.5 EUR -> 0.00015 BTC, below the 0.002 BTC minimum.
        assert!(!order.is_valid(3.0));
    }

    #[test]
    fn test_copy_first_drops_chain() {
        let mut order = Order::new(transaction(Currency::Usd, Currency::Eur, 0.5));
        order.push_next(Order::new(transaction(Currency::Eur, Currency::Btc, 0.0001)));

        let first = order.copy_first(true);
        assert!(first.next().is_none());
        assert!(first.is_fixed_rate());
        assert_eq!(first.rate(), 0.5);
    }
}
