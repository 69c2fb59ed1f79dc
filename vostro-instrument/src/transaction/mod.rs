use crate::{boundaries::Boundaries, currency::Currency, error::InstrumentError, format};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{
    fmt::{Display, Formatter},
    sync::{Arc, Weak},
};
use tracing::error;
use vostro_integration::collection::SortedRingBuffer;

pub mod map;

/// Number of previous rate samples retained per transaction.
pub const RATE_HISTORY_CAPACITY: usize = 1024;

const DEFAULT_DECIMAL_PLACE: u32 = 14;

/// Venue fees applied when a transaction executes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fees {
    /// Percentage of the converted amount, in percent (eg/ 0.26 for 0.26%).
    pub percent: f64,
    /// Fixed amount subtracted from the initial amount.
    pub fixed: f64,
}

#[derive(Debug, Clone, Copy)]
struct RateData {
    rate: f64,
    timestamp: DateTime<Utc>,
    initialised: bool,
}

#[derive(Debug)]
struct RateState {
    data: RwLock<RateData>,
    history: RwLock<SortedRingBuffer<f64>>,
}

impl RateState {
    fn new() -> Self {
        Self {
            data: RwLock::new(RateData {
                rate: 0.0,
                timestamp: DateTime::<Utc>::MIN_UTC,
                initialised: false,
            }),
            history: RwLock::new(SortedRingBuffer::new(RATE_HISTORY_CAPACITY)),
        }
    }
}

/// A transaction is the primitive an order is built on: a directed
/// currency pair (or a withdrawal) with a live rate, bounded rate history,
/// fees and validity boundaries.
///
/// Transactions are shared (`Arc`) between the pair map, orders, chains
/// and track orders. The rate is `1 initial = rate final`, fee excluded.
#[derive(Debug)]
pub struct Transaction {
    initial: Currency,
    final_currency: Currency,
    decimal_place: u32,
    order_decimal_place: u32,
    state: RateState,
    kind: TransactionKind,
}

/// The tagged variants behind [`Transaction`].
///
/// An inverted transaction keeps a strong reference on its base and its
/// own rate stream; fees and boundaries resolve through the base, with
/// boundaries seen inverted. The base keeps a weak back-link so either
/// direction resolves its counterpart on demand.
#[derive(Debug)]
pub enum TransactionKind {
    Pair {
        fees: Fees,
        boundaries: RwLock<Boundaries>,
        invert: RwLock<Weak<Transaction>>,
    },
    Invert {
        base: Arc<Transaction>,
    },
    Withdraw {
        fees: Fees,
    },
}

impl Transaction {
    /// A tradable pair. Boundaries start from the currencies' minimum
    /// trade amounts.
    pub fn pair(initial: Currency, final_currency: Currency) -> Self {
        let mut boundaries = Boundaries::default();
        boundaries.set_initial_amount(initial.min_amount(), 0.0);
        boundaries.set_final_amount(final_currency.min_amount(), 0.0);

        Self {
            initial,
            final_currency,
            decimal_place: DEFAULT_DECIMAL_PLACE,
            order_decimal_place: DEFAULT_DECIMAL_PLACE,
            state: RateState::new(),
            kind: TransactionKind::Pair {
                fees: Fees::default(),
                boundaries: RwLock::new(boundaries),
                invert: RwLock::new(Weak::new()),
            },
        }
    }

    /// A withdrawal of `currency`. The final currency is the `None`
    /// sentinel and the rate is pinned to 1; the percent fee is the share
    /// of the amount lost on withdrawal and defaults to the full amount
    /// until the venue advertises it.
    pub fn withdraw(currency: Currency) -> Self {
        let transaction = Self {
            initial: currency,
            final_currency: Currency::None,
            decimal_place: DEFAULT_DECIMAL_PLACE,
            order_decimal_place: DEFAULT_DECIMAL_PLACE,
            state: RateState::new(),
            kind: TransactionKind::Withdraw {
                fees: Fees {
                    percent: 100.0,
                    fixed: 0.0,
                },
            },
        };
        *transaction.state.data.write() = RateData {
            rate: 1.0,
            timestamp: Utc::now(),
            initialised: true,
        };
        transaction
    }

    pub(crate) fn new_invert(base: Arc<Transaction>) -> Result<Self, InstrumentError> {
        if !matches!(base.kind, TransactionKind::Pair { .. }) {
            return Err(InstrumentError::WrongTransactionKind { expected: "pair" });
        }
        Ok(Self {
            initial: base.final_currency,
            final_currency: base.initial,
            // The inverted direction quotes with its own precision.
            decimal_place: DEFAULT_DECIMAL_PLACE,
            order_decimal_place: DEFAULT_DECIMAL_PLACE,
            state: RateState::new(),
            kind: TransactionKind::Invert { base },
        })
    }

    pub fn with_fees(mut self, fees: Fees) -> Self {
        match &mut self.kind {
            TransactionKind::Pair { fees: slot, .. } | TransactionKind::Withdraw { fees: slot } => {
                *slot = fees;
            }
            TransactionKind::Invert { .. } => {}
        }
        self
    }

    pub fn with_decimal_place(mut self, decimal_place: u32) -> Self {
        self.decimal_place = decimal_place;
        self
    }

    pub fn with_order_decimal_place(mut self, decimal_place: u32) -> Self {
        self.order_decimal_place = decimal_place;
        self
    }

    pub fn with_boundaries(self, boundaries: &Boundaries) -> Self {
        self.merge_boundaries(boundaries);
        self
    }

    pub fn kind(&self) -> &TransactionKind {
        &self.kind
    }

    pub fn initial_currency(&self) -> Currency {
        self.initial
    }

    pub fn final_currency(&self) -> Currency {
        self.final_currency
    }

    pub fn decimal_place(&self) -> u32 {
        self.decimal_place
    }

    pub fn order_decimal_place(&self) -> u32 {
        self.order_decimal_place
    }

    pub fn is_inverted(&self) -> bool {
        matches!(self.kind, TransactionKind::Invert { .. })
    }

    pub fn is_withdraw(&self) -> bool {
        matches!(self.kind, TransactionKind::Withdraw { .. })
    }

    /// The base pair of an inverted transaction.
    pub fn base(&self) -> Option<&Arc<Transaction>> {
        match &self.kind {
            TransactionKind::Invert { base } => Some(base),
            _ => None,
        }
    }

    /// The inverted counterpart of a base pair, when registered.
    pub fn inverted(&self) -> Option<Arc<Transaction>> {
        match &self.kind {
            TransactionKind::Pair { invert, .. } => invert.read().upgrade(),
            _ => None,
        }
    }

    pub(crate) fn link_invert(&self, inverted: &Arc<Transaction>) {
        if let TransactionKind::Pair { invert, .. } = &self.kind {
            *invert.write() = Arc::downgrade(inverted);
        }
    }

    pub fn fees(&self) -> Fees {
        match &self.kind {
            TransactionKind::Pair { fees, .. } | TransactionKind::Withdraw { fees } => *fees,
            TransactionKind::Invert { base } => base.fees(),
        }
    }

    /// Update the live rate.
    ///
    /// Writes with a timestamp strictly older than the current sample are
    /// dropped and logged. An unchanged rate is not re-recorded, so the
    /// sample timestamp stays at the first occurrence of that rate.
    pub fn set_rate(&self, rate: f64, timestamp: DateTime<Utc>) -> Result<(), InstrumentError> {
        let formatted = format::round_to(rate, self.decimal_place);
        if formatted <= 0.0 {
            return Err(InstrumentError::InvalidRate {
                initial: self.initial,
                final_currency: self.final_currency,
                rate,
            });
        }

        let mut data = self.state.data.write();
        if timestamp < data.timestamp {
            error!(
                pair = %self,
                %timestamp,
                current = %data.timestamp,
                "rate update is anterior to the current sample, ignoring"
            );
            return Ok(());
        }

        if data.initialised && formatted == data.rate {
            return Ok(());
        }

        if data.initialised {
            self.state.history.write().push(data.timestamp, data.rate);
        }
        *data = RateData {
            rate: formatted,
            timestamp,
            initialised: true,
        };
        Ok(())
    }

    pub fn rate(&self) -> f64 {
        self.state.data.read().rate
    }

    pub fn rate_timestamp(&self) -> DateTime<Utc> {
        self.state.data.read().timestamp
    }

    /// Number of rate samples available, the live one included.
    pub fn rate_count(&self) -> usize {
        let data = self.state.data.read();
        if !data.initialised {
            return 0;
        }
        self.state.history.read().len() + 1
    }

    /// A past rate: position 0 is the live rate, -1 the previous, etc.
    pub fn rate_at(&self, position: i32) -> Result<f64, InstrumentError> {
        if position == 0 {
            return Ok(self.rate());
        }
        let back = (-position) as usize;
        let history = self.state.history.read();
        history
            .head(back - 1)
            .map(|(_, rate)| *rate)
            .ok_or(InstrumentError::HistoryExhausted {
                requested: back,
                available: history.len(),
            })
    }

    /// Visit every rate sample within `[old, new]`, oldest first, the live
    /// sample included. Returns true iff the interval is fully covered by
    /// the retained history.
    pub fn rates_between<F>(&self, new: DateTime<Utc>, old: DateTime<Utc>, mut callback: F) -> bool
    where
        F: FnMut(DateTime<Utc>, f64),
    {
        let data = *self.state.data.read();
        let history = self.state.history.read();

        let oldest = history
            .oldest()
            .map(|(key, _)| key)
            .or(data.initialised.then_some(data.timestamp));

        history.read_interval_by_key(new, old, |timestamp, rate| callback(timestamp, *rate));

        // The live sample prevails over the whole interval tail, so it is
        // delivered whenever the interval reaches up to it.
        if data.initialised && new >= data.timestamp {
            callback(data.timestamp, data.rate);
        }

        oldest.is_some_and(|oldest| old >= oldest)
    }

    fn final_amount_impl(&self, amount: f64, rate: f64) -> f64 {
        let fees = self.fees();
        match &self.kind {
            TransactionKind::Withdraw { .. } => (amount - fees.fixed) * (1.0 - fees.percent / 100.0),
            _ => (amount - fees.fixed) * rate * (1.0 - fees.percent / 100.0),
        }
    }

    fn initial_amount_impl(&self, amount: f64, rate: f64) -> f64 {
        let fees = self.fees();
        match &self.kind {
            TransactionKind::Withdraw { .. } => {
                error!(pair = %self, "initial amount is undefined for a withdrawal");
                0.0
            }
            _ => amount / ((1.0 - fees.percent / 100.0) * rate) + fees.fixed,
        }
    }

    /// Final amount obtained for `amount` at the live rate.
    pub fn final_amount(&self, amount: f64, include_fee: bool) -> f64 {
        self.final_amount_at(amount, self.rate(), include_fee)
    }

    pub fn final_amount_at(&self, amount: f64, rate: f64, include_fee: bool) -> f64 {
        if include_fee {
            self.final_amount_impl(amount, rate)
        } else {
            amount * rate
        }
    }

    /// Initial amount required to obtain `amount` at the live rate.
    pub fn initial_amount(&self, amount: f64, include_fee: bool) -> f64 {
        self.initial_amount_at(amount, self.rate(), include_fee)
    }

    pub fn initial_amount_at(&self, amount: f64, rate: f64, include_fee: bool) -> f64 {
        if include_fee {
            self.initial_amount_impl(amount, rate)
        } else {
            amount / rate
        }
    }

    /// Fee of the transaction expressed in the final currency.
    pub fn fee_final_currency(&self, amount: f64, rate: f64) -> f64 {
        (amount * rate) - self.final_amount_at(amount, rate, true)
    }

    /// Fee of the transaction expressed in the initial currency.
    pub fn fee_initial_currency(&self, amount: f64, rate: f64) -> f64 {
        self.fee_final_currency(amount, rate) / rate
    }

    /// Current boundaries; an inverted transaction sees the base's
    /// boundaries inverted.
    pub fn boundaries(&self) -> Boundaries {
        match &self.kind {
            TransactionKind::Pair { boundaries, .. } => *boundaries.read(),
            TransactionKind::Invert { base } => base.boundaries().invert(),
            TransactionKind::Withdraw { .. } => Boundaries::default(),
        }
    }

    /// Merge `boundaries` into a base pair's. Inverted and withdraw
    /// transactions have no writable boundaries; the merge is skipped and
    /// reported through the return value.
    pub fn merge_boundaries(&self, update: &Boundaries) -> bool {
        match &self.kind {
            TransactionKind::Pair { boundaries, .. } => {
                boundaries.write().merge(update);
                true
            }
            _ => false,
        }
    }

    pub fn is_valid(&self, amount: f64, rate: f64) -> bool {
        match &self.kind {
            TransactionKind::Withdraw { .. } => amount > 0.0 && rate > 0.0,
            _ => {
                let boundaries = self.boundaries();
                boundaries.check_initial_amount(amount)
                    && boundaries.check_rate(rate)
                    && boundaries.check_final_amount(self.final_amount_impl(amount, rate))
            }
        }
    }

    /// Definition equality: same currencies, precisions and fees. Rates
    /// are deliberately excluded so a fresh properties snapshot compares
    /// equal to the live map when nothing structural changed.
    pub fn same_definition(&self, other: &Transaction) -> bool {
        std::ptr::eq(self, other)
            || (self.initial == other.initial
                && self.final_currency == other.final_currency
                && self.decimal_place == other.decimal_place
                && self.order_decimal_place == other.order_decimal_place
                && self.fees() == other.fees())
    }

    /// Record a bid price on a base pair.
    pub fn set_bid_price(&self, price: f64, timestamp: DateTime<Utc>) -> Result<(), InstrumentError> {
        if self.is_inverted() {
            return Err(InstrumentError::WrongTransactionKind { expected: "base pair" });
        }
        self.set_rate(price, timestamp)
    }

    /// Record an ask price on a base pair; it lands on the inverted
    /// counterpart as `1 / price`.
    pub fn set_ask_price(&self, price: f64, timestamp: DateTime<Utc>) -> Result<(), InstrumentError> {
        if self.is_inverted() {
            return Err(InstrumentError::WrongTransactionKind { expected: "base pair" });
        }
        let Some(inverted) = self.inverted() else {
            return Err(InstrumentError::BasePairMissing {
                initial: self.final_currency,
                final_currency: self.initial,
            });
        };
        let formatted = format::round_to(price, self.decimal_place);
        inverted.set_rate(1.0 / formatted, timestamp)
    }

    /// Format `(amount, rate)` for submission to the venue.
    ///
    /// An inverted pair submits as a buy on its base: the amount converts
    /// to the base's final currency and the rate inverts, both rendered at
    /// the base's precision.
    pub fn amount_and_rate_for_order(
        &self,
        amount: f64,
        rate: f64,
    ) -> Result<(String, String), InstrumentError> {
        match &self.kind {
            TransactionKind::Pair { .. } => {
                if !self.boundaries().check_initial_amount(amount) {
                    return Err(InstrumentError::OutOfBounds { amount, rate });
                }
                Ok((
                    format::display_floor(amount, self.decimal_place),
                    format::display_round(rate, self.order_decimal_place),
                ))
            }
            TransactionKind::Invert { base } => {
                let processed_amount = self.final_amount_impl(amount, rate);
                let processed_rate = 1.0 / rate;
                if !self.boundaries().check_final_amount(processed_amount)
                    || !self.boundaries().check_rate(processed_rate)
                {
                    return Err(InstrumentError::OutOfBounds { amount, rate });
                }
                Ok((
                    format::display_floor(processed_amount, base.decimal_place),
                    format::display_round(processed_rate, base.order_decimal_place),
                ))
            }
            TransactionKind::Withdraw { .. } => {
                Err(InstrumentError::WrongTransactionKind { expected: "pair" })
            }
        }
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.initial, self.final_currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC + TimeDelta::milliseconds(ms)
    }

    fn usd_eur() -> Transaction {
        Transaction::pair(Currency::Usd, Currency::Eur).with_decimal_place(5)
    }

    #[test]
    fn test_set_rate_rejects_non_positive() {
        let transaction = usd_eur();
        assert!(transaction.set_rate(0.0, ts(1)).is_err());
        assert!(transaction.set_rate(-1.0, ts(1)).is_err());
        assert_eq!(transaction.rate_count(), 0);
    }

    #[test]
    fn test_set_rate_drops_stale_timestamps() {
        let transaction = usd_eur();
        transaction.set_rate(0.5, ts(100)).unwrap();
        transaction.set_rate(0.6, ts(50)).unwrap();

        assert_eq!(transaction.rate(), 0.5);
        assert_eq!(transaction.rate_timestamp(), ts(100));
    }

    #[test]
    fn test_unchanged_rate_is_not_re_recorded() {
        let transaction = usd_eur();
        transaction.set_rate(0.5, ts(100)).unwrap();
        transaction.set_rate(0.5, ts(200)).unwrap();

        assert_eq!(transaction.rate_count(), 1);
        assert_eq!(transaction.rate_timestamp(), ts(100));
    }

    #[test]
    fn test_rate_history() {
        let transaction = usd_eur();
        transaction.set_rate(0.5, ts(100)).unwrap();
        transaction.set_rate(0.6, ts(200)).unwrap();
        transaction.set_rate(0.7, ts(300)).unwrap();

        assert_eq!(transaction.rate_count(), 3);
        assert_eq!(transaction.rate_at(0).unwrap(), 0.7);
        assert_eq!(transaction.rate_at(-1).unwrap(), 0.6);
        assert_eq!(transaction.rate_at(-2).unwrap(), 0.5);
        assert!(transaction.rate_at(-3).is_err());
    }

    #[test]
    fn test_rates_between_includes_live_sample() {
        let transaction = usd_eur();
        transaction.set_rate(0.5, ts(100)).unwrap();
        transaction.set_rate(0.6, ts(200)).unwrap();

        let mut samples = Vec::new();
        let complete = transaction.rates_between(ts(300), ts(100), |timestamp, rate| {
            samples.push((timestamp, rate));
        });

        assert!(complete);
        assert_eq!(samples, vec![(ts(100), 0.5), (ts(200), 0.6)]);
    }

    #[test]
    fn test_rates_between_incomplete_when_interval_precedes_history() {
        let transaction = usd_eur();
        transaction.set_rate(0.5, ts(100)).unwrap();
        transaction.set_rate(0.6, ts(200)).unwrap();

        let complete = transaction.rates_between(ts(300), ts(10), |_, _| {});
        assert!(!complete);
    }

    #[test]
    fn test_fee_arithmetic() {
        let transaction = Transaction::pair(Currency::Usd, Currency::Eur).with_fees(Fees {
            percent: 2.0,
            fixed: 0.0,
        });
        transaction.set_rate(0.5, ts(1)).unwrap();

        assert_eq!(transaction.final_amount(100.0, false), 50.0);
        assert!((transaction.final_amount(100.0, true) - 49.0).abs() < 1e-9);
        assert!((transaction.initial_amount(49.0, true) - 100.0).abs() < 1e-9);
        assert!((transaction.fee_final_currency(100.0, 0.5) - 1.0).abs() < 1e-9);
        assert!((transaction.fee_initial_currency(100.0, 0.5) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_withdraw_transaction() {
        let transaction = Transaction::withdraw(Currency::Btc);
        assert_eq!(transaction.final_currency(), Currency::None);
        assert!(transaction.is_withdraw());
        assert_eq!(transaction.rate(), 1.0);
        assert!(transaction.is_valid(1.0, 1.0));
        assert!(!transaction.is_valid(0.0, 1.0));
    }

    #[test]
    fn test_is_valid_against_boundaries() {
        let transaction = Transaction::pair(Currency::Usd, Currency::Eur);
        transaction.set_rate(0.5, ts(1)).unwrap();

        // USD minimum trade amount is 1.
        assert!(transaction.is_valid(10.0, 0.5));
        assert!(!transaction.is_valid(0.5, 0.5));
        assert!(!transaction.is_valid(10.0, 0.0));
    }

    #[test]
    fn test_invert_shares_fees_and_inverts_boundaries() {
        let base = Arc::new(Transaction::pair(Currency::Usd, Currency::Eur).with_fees(Fees {
            percent: 1.0,
            fixed: 0.0,
        }));
        let inverted = Arc::new(Transaction::new_invert(Arc::clone(&base)).unwrap());
        base.link_invert(&inverted);

        assert_eq!(inverted.initial_currency(), Currency::Eur);
        assert_eq!(inverted.final_currency(), Currency::Usd);
        assert_eq!(inverted.fees(), base.fees());
        assert!(base.inverted().is_some());

        // Base initial minimum (1 USD) becomes the invert's final minimum.
        assert_eq!(inverted.boundaries().final_amount().min(), 1.0);
    }

    #[test]
    fn test_bid_ask_prices() {
        let base = Arc::new(Transaction::pair(Currency::Usd, Currency::Eur).with_decimal_place(4));
        let inverted = Arc::new(Transaction::new_invert(Arc::clone(&base)).unwrap());
        base.link_invert(&inverted);

        base.set_bid_price(0.5, ts(1)).unwrap();
        base.set_ask_price(0.5, ts(1)).unwrap();

        assert_eq!(base.rate(), 0.5);
        assert_eq!(inverted.rate(), 2.0);
        assert!(inverted.set_bid_price(2.0, ts(2)).is_err());
    }

    #[test]
    fn test_amount_and_rate_for_order() {
        let transaction = Transaction::pair(Currency::Usd, Currency::Eur)
            .with_decimal_place(2)
            .with_order_decimal_place(4);
        transaction.set_rate(0.51234, ts(1)).unwrap();

        let (amount, rate) = transaction.amount_and_rate_for_order(100.556, 0.51236).unwrap();
        assert_eq!(amount, "100.55");
        assert_eq!(rate, "0.5124");

        assert!(transaction.amount_and_rate_for_order(0.1, 0.5).is_err());
    }
}
