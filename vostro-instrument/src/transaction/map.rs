use crate::{
    currency::Currency,
    error::InstrumentError,
    transaction::{Transaction, TransactionKind},
};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Directed `initial -> final -> transaction` index of one venue's
/// tradable pairs.
///
/// A pair registers at most once. Registering the inverted direction
/// requires the base to exist, forbids double inversion, and back-links
/// the base so both directions resolve their counterpart.
#[derive(Debug, Default)]
pub struct PairTransactionMap {
    map: RwLock<IndexMap<Currency, IndexMap<Currency, Arc<Transaction>>>>,
}

impl PairTransactionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a base pair built by the venue adapter.
    pub fn register_pair(
        &self,
        transaction: Transaction,
    ) -> Result<Arc<Transaction>, InstrumentError> {
        if !matches!(transaction.kind(), TransactionKind::Pair { .. }) {
            return Err(InstrumentError::WrongTransactionKind { expected: "pair" });
        }

        let initial = transaction.initial_currency();
        let final_currency = transaction.final_currency();
        let mut map = self.map.write();

        if map
            .get(&initial)
            .is_some_and(|inner| inner.contains_key(&final_currency))
        {
            return Err(InstrumentError::PairAlreadyRegistered {
                initial,
                final_currency,
            });
        }

        let transaction = Arc::new(transaction);
        map.entry(initial)
            .or_default()
            .insert(final_currency, Arc::clone(&transaction));

        debug!(pair = %transaction, "registered pair");
        Ok(transaction)
    }

    /// Register the inverted direction of an existing base pair.
    pub fn register_invert_pair(
        &self,
        base_initial: Currency,
        base_final: Currency,
    ) -> Result<Arc<Transaction>, InstrumentError> {
        let mut map = self.map.write();

        let base = map
            .get(&base_initial)
            .and_then(|inner| inner.get(&base_final))
            .cloned()
            .ok_or(InstrumentError::BasePairMissing {
                initial: base_initial,
                final_currency: base_final,
            })?;

        if base.is_inverted() || base.inverted().is_some() {
            return Err(InstrumentError::AlreadyInverted {
                initial: base_initial,
                final_currency: base_final,
            });
        }
        if map
            .get(&base_final)
            .is_some_and(|inner| inner.contains_key(&base_initial))
        {
            return Err(InstrumentError::PairAlreadyRegistered {
                initial: base_final,
                final_currency: base_initial,
            });
        }

        let inverted = Arc::new(Transaction::new_invert(Arc::clone(&base))?);
        base.link_invert(&inverted);
        map.entry(base_final)
            .or_default()
            .insert(base_initial, Arc::clone(&inverted));

        debug!(pair = %inverted, "registered inverse pair");
        Ok(inverted)
    }

    pub fn transaction(&self, from: Currency, to: Currency) -> Option<Arc<Transaction>> {
        self.map
            .read()
            .get(&from)
            .and_then(|inner| inner.get(&to))
            .cloned()
    }

    /// Visit every registered pair.
    pub fn each_pair<F>(&self, mut callback: F)
    where
        F: FnMut(Currency, Currency, &Arc<Transaction>),
    {
        let map = self.map.read();
        for (from, inner) in map.iter() {
            for (to, transaction) in inner.iter() {
                callback(*from, *to, transaction);
            }
        }
    }

    /// Visit every pair starting from `from`.
    pub fn each_pair_from<F>(&self, from: Currency, mut callback: F)
    where
        F: FnMut(Currency, &Arc<Transaction>),
    {
        let map = self.map.read();
        if let Some(inner) = map.get(&from) {
            for (to, transaction) in inner.iter() {
                callback(*to, transaction);
            }
        }
    }

    /// Every currency appearing on either side of a pair.
    pub fn currencies(&self) -> Vec<Currency> {
        let mut currencies = Vec::new();
        self.each_pair(|from, to, _| {
            if !currencies.contains(&from) {
                currencies.push(from);
            }
            if !to.is_none() && !currencies.contains(&to) {
                currencies.push(to);
            }
        });
        currencies
    }

    pub fn pair_count(&self) -> usize {
        self.map.read().values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pair_count() == 0
    }

    /// Structural comparison: same keys and same transaction definitions.
    /// Live rates are ignored, so a freshly-fetched properties map
    /// compares equal when nothing changed on the venue.
    pub fn same_definition(&self, other: &PairTransactionMap) -> bool {
        let this = self.map.read();
        let other = other.map.read();

        if this.len() != other.len() {
            return false;
        }
        for (from, inner) in this.iter() {
            let Some(other_inner) = other.get(from) else {
                return false;
            };
            if inner.len() != other_inner.len() {
                return false;
            }
            for (to, transaction) in inner.iter() {
                let Some(other_transaction) = other_inner.get(to) else {
                    return false;
                };
                if !transaction.same_definition(other_transaction) {
                    return false;
                }
            }
        }
        true
    }

    /// Move `other`'s content into this map.
    pub fn replace(&self, other: PairTransactionMap) {
        let mut map = self.map.write();
        *map = other.map.into_inner();
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Fees;
    use chrono::Utc;

    fn map_with_usd_eur() -> PairTransactionMap {
        let map = PairTransactionMap::new();
        map.register_pair(Transaction::pair(Currency::Usd, Currency::Eur))
            .unwrap();
        map
    }

    #[test]
    fn test_register_pair_twice_fails() {
        let map = map_with_usd_eur();
        let result = map.register_pair(Transaction::pair(Currency::Usd, Currency::Eur));
        assert!(matches!(
            result,
            Err(InstrumentError::PairAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_register_invert_requires_base() {
        let map = PairTransactionMap::new();
        let result = map.register_invert_pair(Currency::Usd, Currency::Eur);
        assert!(matches!(result, Err(InstrumentError::BasePairMissing { .. })));
    }

    #[test]
    fn test_register_invert_twice_fails() {
        let map = map_with_usd_eur();
        map.register_invert_pair(Currency::Usd, Currency::Eur).unwrap();
        let result = map.register_invert_pair(Currency::Usd, Currency::Eur);
        assert!(matches!(result, Err(InstrumentError::AlreadyInverted { .. })));
    }

    #[test]
    fn test_both_directions_resolve_to_linked_transactions() {
        let map = map_with_usd_eur();
        map.register_invert_pair(Currency::Usd, Currency::Eur).unwrap();

        let base = map.transaction(Currency::Usd, Currency::Eur).unwrap();
        let inverted = map.transaction(Currency::Eur, Currency::Usd).unwrap();

        assert!(Arc::ptr_eq(base.inverted().unwrap().base().unwrap(), &base));
        assert!(Arc::ptr_eq(&base.inverted().unwrap(), &inverted));

        base.set_ask_price(0.5, Utc::now()).unwrap();
        assert_eq!(inverted.rate(), 2.0);
    }

    #[test]
    fn test_same_definition_ignores_rates() {
        let first = map_with_usd_eur();
        let second = map_with_usd_eur();

        first
            .transaction(Currency::Usd, Currency::Eur)
            .unwrap()
            .set_rate(0.5, Utc::now())
            .unwrap();

        assert!(first.same_definition(&second));
    }

    #[test]
    fn test_same_definition_detects_fee_changes() {
        let first = map_with_usd_eur();
        let second = PairTransactionMap::new();
        second
            .register_pair(
                Transaction::pair(Currency::Usd, Currency::Eur).with_fees(Fees {
                    percent: 0.26,
                    fixed: 0.0,
                }),
            )
            .unwrap();

        assert!(!first.same_definition(&second));
    }

    #[test]
    fn test_currencies_and_counts() {
        let map = map_with_usd_eur();
        map.register_pair(Transaction::pair(Currency::Btc, Currency::Usd))
            .unwrap();

        let currencies = map.currencies();
        assert_eq!(currencies.len(), 3);
        assert_eq!(map.pair_count(), 2);
    }
}
