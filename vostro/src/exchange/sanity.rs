use super::Exchange;
use crate::error::VostroError;
use std::sync::Arc;
use tracing::{info, warn};
use vostro_execution::order::Order;
use vostro_instrument::{currency::Currency, format};

const ACCEPTABLE_VARIATION: f64 = 0.5;
const ACCEPTABLE_SPREAD: f64 = 0.5;

/// Pairs whose rate is roughly known, venue-independent.
const KNOWN_RATES: [(Currency, Currency, f64); 1] = [(Currency::Usd, Currency::Eur, 0.85)];

/// Verify the venue's data makes sense before trading is enabled:
/// known rates within 50 % of their rough value, inverse spreads within
/// 50 %, and round trips yielding a loss. Failures are visibility
/// signals for a misconfigured venue, not fatal.
pub(crate) fn sanity_check(exchange: &Exchange) -> Result<(), VostroError> {
    for (initial, final_currency, approximate) in KNOWN_RATES {
        let Some(chain) = exchange.order_chain(initial, final_currency) else {
            continue;
        };
        let rate = chain.final_amount(1.0, true);
        if rate <= 0.0 {
            return Err(VostroError::SanityCheck(format!(
                "processed rate must be greater than zero in {chain}, rate={rate}"
            )));
        }
        let variation = ((approximate - rate) / rate).abs();
        if variation > ACCEPTABLE_VARIATION {
            return Err(VostroError::SanityCheck(format!(
                "variation is out of bound in {chain}, variation={variation}, rate={rate}, \
                 expected.rate={approximate}"
            )));
        }
    }

    // Snapshot the pairs so the checks never re-enter the map lock.
    let mut pairs = Vec::new();
    exchange
        .transaction_map()
        .each_pair(|initial, final_currency, transaction| {
            pairs.push((initial, final_currency, Arc::clone(transaction)));
        });

    let mut failure: Option<String> = None;
    for (initial, final_currency, transaction) in &pairs {
        if failure.is_some() {
            break;
        }

        let rate = transaction.rate();
        if rate <= 0.0 {
            failure = Some(format!("rate for {transaction} must be positive, rate={rate}"));
            break;
        }

        let Some((_, _, inverse)) = pairs
            .iter()
            .find(|(from, to, _)| (from, to) == (final_currency, initial))
        else {
            continue;
        };
        if inverse.rate() <= 0.0 {
            failure = Some(format!(
                "rate for {inverse} must be positive, rate={}",
                inverse.rate()
            ));
            break;
        }

        let rate_back = format::round_to(1.0 / inverse.rate(), transaction.decimal_place());
        let spread = rate_back - rate;
        if spread < 0.0 {
            warn!(
                pair = %transaction,
                spread,
                rate,
                rate_back,
                "negative spread, which can happen but is unlikely"
            );
        }
        if spread / rate > ACCEPTABLE_SPREAD {
            failure = Some(format!(
                "spread ratio is out of bound for {transaction}, spread={spread}, rate={rate}, \
                 rate.back={rate_back}"
            ));
            break;
        }

        // A round trip through both directions must lose money.
        let mut round_trip = Order::new(Arc::clone(transaction));
        round_trip.push_next(Order::new(Arc::clone(inverse)));
        let yielded = round_trip.final_amount(1.0, true);
        if yielded >= 1.0 {
            failure = Some(format!(
                "the order {round_trip} should give a negative gain, yielded={yielded}"
            ));
        }
    }

    match failure {
        Some(failure) => Err(VostroError::SanityCheck(failure)),
        None => {
            info!(exchange = %exchange.id(), "sanity check passed");
            Ok(())
        }
    }
}
