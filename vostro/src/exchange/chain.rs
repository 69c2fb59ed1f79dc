use super::{Exchange, KNOWN_CURRENCIES};
use chrono::Utc;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vostro_execution::order::Order;
use vostro_instrument::{
    boundaries::Boundaries,
    currency::Currency,
    transaction::{Transaction, map::PairTransactionMap},
};

/// Pre-compute the shortest order chain for every ordered pair of
/// currencies, so estimation in any target currency is one lookup.
///
/// Same-currency chains get a no-operation transaction at rate 1.
pub(crate) fn build_order_chain_map(
    map: &PairTransactionMap,
    currencies: &[Currency],
) -> IndexMap<Currency, IndexMap<Currency, Order>> {
    // Snapshot the adjacency once; the search is pure from here.
    let mut adjacency: IndexMap<Currency, Vec<(Currency, Arc<Transaction>)>> = IndexMap::new();
    map.each_pair(|from, to, transaction| {
        adjacency
            .entry(from)
            .or_default()
            .push((to, Arc::clone(transaction)));
    });

    let mut chain_map: IndexMap<Currency, IndexMap<Currency, Order>> = IndexMap::new();
    let mut chain_count = 0usize;
    let mut missing: Vec<String> = Vec::new();

    for &from in currencies {
        let inner = chain_map.entry(from).or_default();
        for &to in currencies {
            if from == to {
                inner.insert(to, nop_order(from));
                chain_count += 1;
                continue;
            }

            let mut ignored = Vec::new();
            match identify_chain(&adjacency, from, to, &mut ignored, 1) {
                Some((order, _)) => {
                    inner.insert(to, order);
                    chain_count += 1;
                }
                None => missing.push(format!("{from}/{to}")),
            }
        }
    }

    info!(chains = chain_count, "pre-built order chains");
    if !missing.is_empty() {
        warn!(pairs = %missing.join(", "), "missing order chains");
    }

    chain_map
}

/// Depth-first search for the shortest chain from `from` to `to`,
/// refusing to revisit a source currency.
fn identify_chain(
    adjacency: &IndexMap<Currency, Vec<(Currency, Arc<Transaction>)>>,
    from: Currency,
    to: Currency,
    ignored: &mut Vec<Currency>,
    depth: usize,
) -> Option<(Order, usize)> {
    let neighbours = adjacency.get(&from)?;

    if let Some((_, transaction)) = neighbours.iter().find(|(next, _)| *next == to) {
        return Some((Order::new(Arc::clone(transaction)), depth));
    }

    ignored.push(from);
    let mut best: Option<(Order, usize)> = None;
    for (next, transaction) in neighbours {
        if ignored.contains(next) {
            continue;
        }
        if let Some((rest, rest_depth)) = identify_chain(adjacency, *next, to, ignored, depth + 1)
            && best
                .as_ref()
                .is_none_or(|(_, best_depth)| rest_depth < *best_depth)
        {
            let mut order = Order::new(Arc::clone(transaction));
            order.push_next(rest);
            best = Some((order, rest_depth));
        }
    }
    ignored.pop();
    best
}

fn nop_order(currency: Currency) -> Order {
    let transaction = Transaction::pair(currency, currency);
    if let Err(error) = transaction.set_rate(1.0, Utc::now()) {
        warn!(%error, "failed to seed no-operation transaction");
    }
    Order::new(Arc::new(transaction))
}

/// Pick the currency to denominate estimates in: the one reaching the
/// most other currencies through the chain map, preferring the known
/// fiat/reference currencies on a tie with the maximum.
pub(crate) fn identify_estimate_currency(
    chain_map: &IndexMap<Currency, IndexMap<Currency, Order>>,
    currencies: &[Currency],
) -> Currency {
    let mut reachability: IndexMap<Currency, usize> = IndexMap::new();
    let mut best = (Currency::Usd, 0usize);

    for &from in currencies {
        let count = currencies
            .iter()
            .filter(|&&to| {
                chain_map
                    .get(&from)
                    .is_some_and(|inner| inner.contains_key(&to))
            })
            .count();
        reachability.insert(from, count);
        if count > best.1 {
            best = (from, count);
        }
    }

    for (known, _) in KNOWN_CURRENCIES {
        if reachability.get(&known) == Some(&best.1) {
            return known;
        }
    }
    best.0
}

/// Propagate boundary minimums: derive each currency's minimum trade
/// amount through a chain from a known currency, then merge it into
/// every transaction's boundaries. Inverse-only pairs have no writable
/// boundaries and are skipped.
pub(crate) fn update_transactions_minimal_amount(exchange: &Exchange) {
    let currencies = exchange.currencies();
    let mut min_amounts: IndexMap<Currency, f64> = IndexMap::new();

    for &currency in &currencies {
        let mut min_amount = 0.0;
        for (known, known_min) in KNOWN_CURRENCIES {
            if let Some(chain) = exchange.order_chain(known, currency) {
                min_amount = chain.final_amount(known_min, false);
                break;
            }
        }

        if min_amount != 0.0 {
            debug!(exchange = %exchange.id(), %currency, min_amount, "minimal amount");
        } else {
            warn!(
                exchange = %exchange.id(),
                %currency,
                "no minimal amount identified for the currency"
            );
        }
        min_amounts.insert(currency, min_amount);
    }

    exchange
        .transaction_map()
        .each_pair(|from, to, transaction| {
            let mut update = Boundaries::default();
            update.set_initial_amount(min_amounts.get(&from).copied().unwrap_or(0.0), 0.0);
            update.set_final_amount(min_amounts.get(&to).copied().unwrap_or(0.0), 0.0);
            transaction.merge_boundaries(&update);
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(pairs: &[(Currency, Currency)]) -> PairTransactionMap {
        let map = PairTransactionMap::new();
        for (from, to) in pairs {
            map.register_pair(Transaction::pair(*from, *to)).unwrap();
        }
        map
    }

    #[test]
    fn test_direct_chain_preferred_over_longer() {
        let map = map_with(&[
            (Currency::Usd, Currency::Eur),
            (Currency::Usd, Currency::Btc),
            (Currency::Btc, Currency::Eur),
        ]);
        let currencies = map.currencies();
        let chains = build_order_chain_map(&map, &currencies);

        let direct = chains
            .get(&Currency::Usd)
            .and_then(|inner| inner.get(&Currency::Eur))
            .unwrap();
        assert_eq!(direct.chain_len(), 1);
    }

    #[test]
    fn test_two_leg_chain_found() {
        let map = map_with(&[
            (Currency::Usd, Currency::Eur),
            (Currency::Eur, Currency::Btc),
        ]);
        let currencies = map.currencies();
        let chains = build_order_chain_map(&map, &currencies);

        let chain = chains
            .get(&Currency::Usd)
            .and_then(|inner| inner.get(&Currency::Btc))
            .unwrap();
        assert_eq!(chain.chain_len(), 2);
        assert_eq!(chain.initial_currency(), Currency::Usd);
        assert_eq!(chain.final_currency(), Currency::Btc);

        // No path back from BTC: directed edges only.
        assert!(
            chains
                .get(&Currency::Btc)
                .and_then(|inner| inner.get(&Currency::Usd))
                .is_none()
        );
    }

    #[test]
    fn test_diagonal_is_nop() {
        let map = map_with(&[(Currency::Usd, Currency::Eur)]);
        let currencies = map.currencies();
        let chains = build_order_chain_map(&map, &currencies);

        let nop = chains
            .get(&Currency::Usd)
            .and_then(|inner| inner.get(&Currency::Usd))
            .unwrap();
        assert_eq!(nop.final_amount(42.0, false), 42.0);
    }

    #[test]
    fn test_search_does_not_revisit_sources() {
        // A cycle that never reaches XMR must terminate with no chain.
        let map = map_with(&[
            (Currency::Usd, Currency::Eur),
            (Currency::Eur, Currency::Usd),
        ]);
        let currencies = vec![Currency::Usd, Currency::Eur, Currency::Xmr];
        let chains = build_order_chain_map(&map, &currencies);

        assert!(
            chains
                .get(&Currency::Usd)
                .and_then(|inner| inner.get(&Currency::Xmr))
                .is_none()
        );
    }

    #[test]
    fn test_estimate_currency_prefers_usd_on_tie() {
        let map = map_with(&[
            (Currency::Usd, Currency::Btc),
            (Currency::Btc, Currency::Usd),
            (Currency::Eur, Currency::Btc),
            (Currency::Btc, Currency::Eur),
        ]);
        let currencies = map.currencies();
        let chains = build_order_chain_map(&map, &currencies);

        assert_eq!(identify_estimate_currency(&chains, &currencies), Currency::Usd);
    }

    #[test]
    fn test_estimate_currency_falls_back_to_max_reachability() {
        let map = map_with(&[
            (Currency::Xmr, Currency::Ltc),
            (Currency::Xmr, Currency::Doge),
        ]);
        let currencies = map.currencies();
        let chains = build_order_chain_map(&map, &currencies);

        assert_eq!(identify_estimate_currency(&chains, &currencies), Currency::Xmr);
    }
}
