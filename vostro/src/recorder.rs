use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::Arc,
};
use tracing::{error, warn};
use vostro_execution::{
    event::OrderCompleteCallback,
    id::{ContextId, StrategyId},
    track::TrackOrder,
};
use vostro_instrument::{
    currency::Currency,
    format,
    transaction::map::PairTransactionMap,
};

static RECORD_LOCK: Mutex<()> = Mutex::new(());

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let _scope = RECORD_LOCK.lock();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

/// Append a completed transaction to `transactions.csv`.
///
/// Columns: now, creation time, order id, order type, initial currency,
/// final currency, amount, rate, final amount, fee.
pub fn record_transaction(
    output_directory: &Path,
    track: &TrackOrder,
    amount_processed: f64,
) -> io::Result<()> {
    let final_amount = track.order().first_final_amount(amount_processed, true);
    let fee = track.order().first_final_amount(amount_processed, false) - final_amount;

    append_line(
        &output_directory.join("transactions.csv"),
        &format!(
            "{},{},{},{},{},{},{},{},{},{}",
            Utc::now().timestamp_millis(),
            track.creation_time().timestamp_millis(),
            track.id(),
            track.kind(),
            track.order().initial_currency(),
            track.order().first_final_currency(),
            amount_processed,
            track.rate(),
            final_amount,
            fee,
        ),
    )
}

/// `recordTransaction` completion handler writing to the configured
/// output directory.
pub fn transaction_record_handler(output_directory: std::path::PathBuf) -> OrderCompleteCallback {
    Arc::new(move |_, track, amount| {
        if let Err(cause) = record_transaction(&output_directory, track, amount) {
            error!(%cause, id = %track.id(), "failed to record transaction");
        }
    })
}

/// Append a realised profit row to `profit.csv`.
pub fn record_profit(
    output_directory: &Path,
    strategy_id: &StrategyId,
    context_id: ContextId,
    currency: Currency,
    profit: f64,
    estimate_currency: Currency,
    profit_estimate: f64,
) -> io::Result<()> {
    append_line(
        &output_directory.join("profit.csv"),
        &format!(
            "{},{},{},{},{},{},{}",
            Utc::now().timestamp_millis(),
            strategy_id,
            context_id,
            currency,
            profit,
            estimate_currency,
            profit_estimate,
        ),
    )
}

/// Append the rate samples of `]since, until]` to the per-pair CSVs,
/// writing a row only when the rate changed. Returns the `until`
/// timestamp to use as the next `since`.
pub fn record_rates(
    output_directory: &Path,
    map: &PairTransactionMap,
    since: Option<DateTime<Utc>>,
    until: DateTime<Utc>,
) -> DateTime<Utc> {
    map.each_pair(|initial, final_currency, transaction| {
        let path = output_directory.join(format!("pair-{initial}-{final_currency}.csv"));
        let from = since.unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut rows = String::new();
        let mut previous_rate = -1.0;
        let mut samples = 0usize;
        let complete = transaction.rates_between(until, from, |timestamp, rate| {
            if timestamp <= from {
                return;
            }
            if rate != previous_rate {
                rows.push_str(&format!(
                    "{},{}\n",
                    timestamp.timestamp_millis(),
                    format::display_round(rate, transaction.decimal_place())
                ));
                previous_rate = rate;
                samples += 1;
            }
        });

        if since.is_some() && !complete {
            error!(
                pair = %transaction,
                samples,
                "rate history looped before all rates were recorded, expected data loss"
            );
        }

        if !rows.is_empty() {
            rows.pop();
            if let Err(cause) = append_line(&path, &rows) {
                warn!(%cause, pair = %transaction, "failed to record rates");
            }
        }
    });

    until
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc as StdArc;
    use vostro_execution::{id::OrderId, order::Order};
    use vostro_instrument::transaction::Transaction;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("vostro-recorder-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_record_transaction_appends_row() {
        let dir = temp_dir("transaction");
        let transaction = Transaction::pair(Currency::Usd, Currency::Eur);
        transaction.set_rate(0.5, Utc::now()).unwrap();
        let track = TrackOrder::new(
            OrderId::from("X"),
            Order::new(StdArc::new(transaction)),
            100.0,
            Utc::now(),
        );

        record_transaction(&dir, &track, 100.0).unwrap();
        record_transaction(&dir, &track, 50.0).unwrap();

        let content = fs::read_to_string(dir.join("transactions.csv")).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(",X,Market,USD,EUR,100,0.5,50,0"));
    }

    #[test]
    fn test_record_rates_only_on_change() {
        let dir = temp_dir("rates");
        let map = PairTransactionMap::new();
        let transaction = map
            .register_pair(Transaction::pair(Currency::Usd, Currency::Eur))
            .unwrap();

        let base = Utc::now();
        transaction.set_rate(0.5, base).unwrap();
        transaction
            .set_rate(0.6, base + chrono::TimeDelta::seconds(1))
            .unwrap();

        record_rates(&dir, &map, None, base + chrono::TimeDelta::seconds(2));

        let content = fs::read_to_string(dir.join("pair-USD-EUR.csv")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
