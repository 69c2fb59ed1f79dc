use crate::order::Order;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt::{Display, Formatter};
use vostro_instrument::currency::Currency;

/// Resolves the pre-computed order chain between two currencies, used to
/// express balances in a venue's estimate currency.
///
/// Implemented by the exchange runtime; the balance only ever borrows it,
/// never owns it.
pub trait ChainResolver {
    fn order_chain(&self, from: Currency, to: Currency) -> Option<Order>;
    fn estimate_currency(&self) -> Currency;
}

#[derive(Debug, Default)]
struct BalanceInner {
    /// Funds per currency, reserve included.
    funds: IndexMap<Currency, f64>,
    /// Portion of `funds` allocated to outstanding orders or chain
    /// continuations.
    reserved: IndexMap<Currency, f64>,
    initial_estimate: Option<f64>,
}

/// Per-currency funds with a separate reserve map, guarded by a
/// readers/writer lock.
///
/// `get` returns what is available for new orders:
/// `get(c) = get_with_reserve(c) - reserved(c)`.
#[derive(Debug, Default)]
pub struct Balance {
    inner: RwLock<BalanceInner>,
}

impl Clone for Balance {
    fn clone(&self) -> Self {
        let inner = self.inner.read();
        Self {
            inner: RwLock::new(BalanceInner {
                funds: inner.funds.clone(),
                reserved: inner.reserved.clone(),
                initial_estimate: inner.initial_estimate,
            }),
        }
    }
}

impl Balance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, currency: Currency, amount: f64) {
        self.inner.write().funds.insert(currency, amount);
    }

    /// Add funds on top of the existing (reserve-included) amount.
    pub fn add(&self, currency: Currency, amount: f64) {
        let mut inner = self.inner.write();
        let current = inner.funds.get(&currency).copied().unwrap_or(0.0);
        inner.funds.insert(currency, current + amount);
    }

    pub fn reserve(&self, currency: Currency, amount: f64) {
        let mut inner = self.inner.write();
        *inner.reserved.entry(currency).or_insert(0.0) += amount;
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.funds.clear();
        inner.reserved.clear();
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.funds.is_empty() && inner.reserved.is_empty()
    }

    /// Amount available for new orders.
    pub fn get(&self, currency: Currency) -> f64 {
        let inner = self.inner.read();
        inner.funds.get(&currency).copied().unwrap_or(0.0)
            - inner.reserved.get(&currency).copied().unwrap_or(0.0)
    }

    /// Amount including the reserve.
    pub fn get_with_reserve(&self, currency: Currency) -> f64 {
        self.inner.read().funds.get(&currency).copied().unwrap_or(0.0)
    }

    pub fn reserved(&self, currency: Currency) -> f64 {
        self.inner.read().reserved.get(&currency).copied().unwrap_or(0.0)
    }

    pub fn currencies(&self) -> Vec<Currency> {
        self.inner.read().funds.keys().copied().collect()
    }

    /// Diff against a newer snapshot: the callback receives each currency
    /// whose reserve-included amount changed, with the delta
    /// `other - self`, plus currencies only present in `other`.
    pub fn compare_funds<F>(&self, other: &Balance, mut callback: F)
    where
        F: FnMut(Currency, f64),
    {
        let this = self.inner.read();
        let other = other.inner.read();

        for (currency, amount) in this.funds.iter() {
            let diff = other.funds.get(currency).copied().unwrap_or(0.0) - amount;
            if diff != 0.0 {
                callback(*currency, diff);
            }
        }
        for (currency, amount) in other.funds.iter() {
            if !this.funds.contains_key(currency) {
                callback(*currency, *amount);
            }
        }
    }

    /// Replace the funds, leaving the reserve untouched.
    pub fn set_funds(&self, snapshot: &Balance) {
        let funds = snapshot.inner.read().funds.clone();
        self.inner.write().funds = funds;
    }

    /// Replace the funds from a venue snapshot and rebuild the reserve
    /// from the active orders (`(initial currency, amount)` pairs).
    ///
    /// When the venue's balance excludes the amounts tied to open orders,
    /// they are added back so `funds` is always reserve-included.
    pub fn set_funds_and_update_reserve(
        &self,
        snapshot: &Balance,
        active_orders: &[(Currency, f64)],
        balance_includes_reserve: bool,
    ) {
        let funds = snapshot.inner.read().funds.clone();
        let mut inner = self.inner.write();
        inner.funds = funds;
        inner.reserved.clear();

        for (currency, amount) in active_orders {
            if !balance_includes_reserve {
                let current = inner.funds.get(currency).copied().unwrap_or(0.0);
                inner.funds.insert(*currency, current + amount);
            }
            *inner.reserved.entry(*currency).or_insert(0.0) += amount;
        }
    }

    /// Rebuild the reserve from the active orders.
    pub fn update_reserve(&self, active_orders: &[(Currency, f64)]) {
        let mut inner = self.inner.write();
        inner.reserved.clear();
        for (currency, amount) in active_orders {
            *inner.reserved.entry(*currency).or_insert(0.0) += amount;
        }
    }

    /// Value of `amount` of `currency` in the resolver's estimate
    /// currency, fee excluded. `None` when no chain links the currencies.
    pub fn estimate_amount(
        &self,
        currency: Currency,
        amount: f64,
        resolver: &dyn ChainResolver,
    ) -> Option<f64> {
        if amount == 0.0 {
            return Some(0.0);
        }
        let chain = resolver.order_chain(currency, resolver.estimate_currency())?;
        Some(chain.final_amount(amount, false))
    }

    /// Value of the whole balance (reserve included) in the estimate
    /// currency. `None` if any held currency cannot be converted.
    pub fn estimate(&self, resolver: &dyn ChainResolver) -> Option<f64> {
        let funds: Vec<(Currency, f64)> = {
            let inner = self.inner.read();
            inner.funds.iter().map(|(c, a)| (*c, *a)).collect()
        };

        let mut value = 0.0;
        for (currency, amount) in funds {
            value += self.estimate_amount(currency, amount, resolver)?;
        }
        Some(value)
    }

    /// Memoise the current estimate as the starting point for
    /// profit-vs-initial reporting. Returns the stored value.
    pub fn finalize_initial_estimate(&self, resolver: &dyn ChainResolver) -> Option<f64> {
        let current = self.estimate(resolver);
        let mut inner = self.inner.write();
        match inner.initial_estimate {
            Some(initial) => Some(initial),
            None => {
                inner.initial_estimate = current;
                current
            }
        }
    }

    pub fn initial_estimate(&self) -> Option<f64> {
        self.inner.read().initial_estimate
    }

    /// Human-readable funds table with estimates and the delta against
    /// the initial estimate.
    pub fn summary(&self, resolver: &dyn ChainResolver) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let mut total = 0.0;
        let mut total_known = true;

        let rows: Vec<(Currency, f64, f64)> = {
            let inner = self.inner.read();
            inner
                .funds
                .iter()
                .map(|(currency, amount)| {
                    (
                        *currency,
                        *amount,
                        inner.reserved.get(currency).copied().unwrap_or(0.0),
                    )
                })
                .collect()
        };

        for (currency, amount, reserved) in rows {
            let estimate = self.estimate_amount(currency, amount, resolver);
            match estimate {
                Some(estimate) => {
                    total += estimate;
                    let _ = writeln!(
                        out,
                        "{:>5}: {:<16} ({:<16}) ~{:<16}",
                        currency.code(),
                        amount,
                        reserved,
                        estimate
                    );
                }
                None => {
                    total_known = false;
                    let _ = writeln!(
                        out,
                        "{:>5}: {:<16} ({:<16}) ~?",
                        currency.code(),
                        amount,
                        reserved
                    );
                }
            }
        }

        if total_known {
            let _ = write!(out, "Total: {} {}", total, resolver.estimate_currency());
            if let Some(initial) = self.initial_estimate()
                && initial != 0.0
            {
                let percent = (total / initial - 1.0) * 100.0;
                let _ = write!(out, " ({}{:.2}%)", if percent > 0.0 { "+" } else { "" }, percent);
            }
        }
        out
    }
}

impl Display for Balance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        let mut first = true;
        for (currency, amount) in inner.funds.iter() {
            let reserved = inner.reserved.get(currency).copied().unwrap_or(0.0);
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{currency}={amount}")?;
            if reserved != 0.0 {
                write!(f, "({reserved})")?;
            }
            first = false;
        }
        Ok(())
    }
}
