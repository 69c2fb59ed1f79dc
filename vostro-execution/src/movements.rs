use crate::balance::Balance;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use vostro_instrument::currency::Currency;
use vostro_integration::collection::SortedRingBuffer;

/// Number of balance movements retained in the journal.
pub const MOVEMENTS_CAPACITY: usize = 256;

#[derive(Debug)]
struct MovementsInner {
    last_seen: IndexMap<Currency, f64>,
    journal: SortedRingBuffer<(f64, Currency)>,
    last_update: DateTime<Utc>,
}

/// Journal of per-currency balance deltas, diffed on each snapshot.
///
/// The reconciliation core consumes entries when it attributes a delta to
/// a completed order, so two orders in the same snapshot cannot both
/// claim the same observed movement.
#[derive(Debug)]
pub struct BalanceMovements {
    inner: RwLock<MovementsInner>,
}

impl Default for BalanceMovements {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceMovements {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MovementsInner {
                last_seen: IndexMap::new(),
                journal: SortedRingBuffer::new(MOVEMENTS_CAPACITY),
                last_update: DateTime::<Utc>::MIN_UTC,
            }),
        }
    }

    /// Diff `balance` against the last snapshot and journal the non-zero
    /// deltas at `timestamp`.
    ///
    /// The very first snapshot is a settlement, not a movement, and is
    /// not journalled.
    pub fn update(&self, balance: &Balance, timestamp: DateTime<Utc>) {
        let mut inner = self.inner.write();
        inner.last_update = timestamp;
        let is_first = inner.last_seen.is_empty();

        let known: Vec<(Currency, f64)> =
            inner.last_seen.iter().map(|(c, a)| (*c, *a)).collect();
        for (currency, amount) in known {
            let new_amount = balance.get_with_reserve(currency);
            if new_amount != amount {
                inner.last_seen.insert(currency, new_amount);
                inner.journal.push(timestamp, (new_amount - amount, currency));
            }
        }

        for currency in balance.currencies() {
            if !inner.last_seen.contains_key(&currency) {
                let amount = balance.get_with_reserve(currency);
                inner.last_seen.insert(currency, amount);
                if !is_first {
                    inner.journal.push(timestamp, (amount, currency));
                }
            }
        }
    }

    pub fn last_update_timestamp(&self) -> DateTime<Utc> {
        self.inner.read().last_update
    }

    /// Consume up to `amount` (same sign as the journalled deltas it may
    /// claim) of `currency` movements from `from` onwards, oldest first.
    ///
    /// Returns the unconsumed remainder; zero means fully consumed.
    pub fn consume(&self, from: DateTime<Utc>, amount: f64, currency: Currency) -> f64 {
        let mut inner = self.inner.write();
        if inner.journal.is_empty() || amount == 0.0 {
            return amount;
        }

        let positive = amount > 0.0;
        let mut left = amount;
        inner.journal.for_each_mut_from(from, |_, entry| {
            let (delta, entry_currency) = entry;
            if *entry_currency == currency
                && ((positive && *delta > 0.0) || (!positive && *delta < 0.0))
            {
                let consumed = if positive {
                    left.min(*delta)
                } else {
                    left.max(*delta)
                };
                left -= consumed;
                *delta -= consumed;
            }
            left != 0.0
        });

        left
    }

    /// Visit the movements within `[old, new]`, oldest first. Returns
    /// true iff the interval is fully covered by the retained journal.
    pub fn get<F>(&self, new: DateTime<Utc>, old: DateTime<Utc>, mut callback: F) -> bool
    where
        F: FnMut(DateTime<Utc>, f64, Currency),
    {
        self.inner
            .read()
            .journal
            .read_interval_by_key(new, old, |timestamp, (delta, currency)| {
                callback(timestamp, *delta, *currency)
            })
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.last_seen.clear();
    }
}
