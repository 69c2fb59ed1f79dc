use crate::{
    error::VostroError,
    exchange::{Exchange, ExchangeId, ExchangeStatus},
    recorder,
};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use smol_str::SmolStr;
use std::{
    path::PathBuf,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};
use tracing::{error, info, warn};
use vostro_execution::{
    balance::Balance,
    event::Lifetime,
    id::{ContextId, StrategyId},
    operation::{ContextHandle, FailureCause, Operation},
    order::Order,
};
use vostro_instrument::{currency::Currency, transaction::Transaction};
use vostro_integration::{collection::SortedRingBuffer, shutdown::Shutdown, signal::SignalEvent};

/// Number of operation outcomes retained per strategy.
pub const OPERATION_RECORDS_CAPACITY: usize = 256;

/// When a strategy's `process` runs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Trigger {
    /// On every rates publication of any assigned exchange.
    OnRateChange,
    EverySecond,
    EveryMinute,
    EveryHour,
    EveryDay,
}

impl Trigger {
    fn period(&self) -> Option<Duration> {
        match self {
            Trigger::OnRateChange => None,
            Trigger::EverySecond => Some(Duration::from_secs(1)),
            Trigger::EveryMinute => Some(Duration::from_secs(60)),
            Trigger::EveryHour => Some(Duration::from_secs(60 * 60)),
            Trigger::EveryDay => Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

/// Outcome of one operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OperationStatus {
    Success,
    Timeout,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Timeout => "timeout",
            OperationStatus::Failed => "failed",
        }
    }
}

/// One recorded operation outcome.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub status: OperationStatus,
    pub context_id: ContextId,
    pub profit: f64,
    pub currency: Currency,
    pub description: String,
}

/// Per-exchange profit ledger of one strategy.
#[derive(Debug, Default)]
struct ExchangeStats {
    profit: Balance,
    nb_success: u64,
    nb_failed_timeout: u64,
    nb_failed_place_order: u64,
}

/// Snapshot of a strategy's outcome counters on one exchange.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct StrategyStatistics {
    pub nb_success: u64,
    pub nb_failed_timeout: u64,
    pub nb_failed_place_order: u64,
}

static STRATEGY_ID_COUNTERS: Mutex<Vec<(SmolStr, usize)>> = Mutex::new(Vec::new());

fn unique_strategy_id(name: &str) -> StrategyId {
    let mut counters = STRATEGY_ID_COUNTERS.lock();
    match counters.iter_mut().find(|(known, _)| known == name) {
        Some((_, counter)) => {
            *counter += 1;
            StrategyId::new(format!("{name}-{counter}"))
        }
        None => {
            counters.push((SmolStr::from(name), 0));
            StrategyId::new(name)
        }
    }
}

/// The engine-side face of one strategy: its assigned exchanges, profit
/// ledger, operation records, and the `sell`/`withdraw` entry points
/// into the core.
#[derive(Debug)]
pub struct StrategyHost {
    id: StrategyId,
    exchanges: Vec<Arc<Exchange>>,
    stats: Arc<Mutex<Vec<(ExchangeId, ExchangeStats)>>>,
    records: Arc<RwLock<SortedRingBuffer<OperationRecord>>>,
    output_directory: PathBuf,
}

impl StrategyHost {
    pub fn new(name: &str, exchanges: Vec<Arc<Exchange>>, output_directory: PathBuf) -> Self {
        let stats = exchanges
            .iter()
            .map(|exchange| (exchange.id().clone(), ExchangeStats::default()))
            .collect();
        Self {
            id: unique_strategy_id(name),
            exchanges,
            stats: Arc::new(Mutex::new(stats)),
            records: Arc::new(RwLock::new(SortedRingBuffer::new(
                OPERATION_RECORDS_CAPACITY,
            ))),
            output_directory,
        }
    }

    pub fn id(&self) -> &StrategyId {
        &self.id
    }

    pub fn exchanges(&self) -> &[Arc<Exchange>] {
        &self.exchanges
    }

    /// The single assigned exchange.
    pub fn exchange(&self) -> &Arc<Exchange> {
        debug_assert_eq!(self.exchanges.len(), 1);
        &self.exchanges[0]
    }

    /// Place a sell operation: a limit order when the order's rate is
    /// fixed, a market order otherwise. Returns the operation context;
    /// holding it delays `on_complete`, dropping it lets the operation
    /// resolve on its own.
    pub fn sell(
        &self,
        exchange: &Arc<Exchange>,
        order: Order,
        amount: f64,
        retries: usize,
    ) -> Result<ContextHandle, VostroError> {
        let mut operation = Operation::order_operation(order, amount, self.id.clone())?;
        operation.on_order_complete(
            "recordTransaction",
            recorder::transaction_record_handler(self.output_directory.clone()),
            Lifetime::Operation,
        );

        let stats = Arc::clone(&self.stats);
        let records = Arc::clone(&self.records);
        let weak_exchange = Arc::downgrade(exchange);
        let exchange_id = exchange.id().clone();
        let strategy_id = self.id.clone();
        let output_directory = self.output_directory.clone();

        operation.on_complete(
            "strategyProfit",
            Arc::new(move |context| {
                if !context.is_effective() {
                    if context.failure_cause() == FailureCause::None {
                        error!(
                            strategy = %strategy_id,
                            context = %context.id(),
                            "operation is ineffective but did not face any failure"
                        );
                    }
                    return;
                }
                let Some(exchange) = weak_exchange.upgrade() else {
                    return;
                };

                let profit_balance = Balance::new();
                context.profit(|currency, profit| {
                    profit_balance.add(currency, profit);
                    {
                        let mut stats = stats.lock();
                        if let Some((_, entry)) =
                            stats.iter_mut().find(|(id, _)| *id == exchange_id)
                        {
                            entry.profit.add(currency, profit);
                        }
                    }

                    let estimate_currency = exchange.estimate_currency_of();
                    let profit_estimate = exchange
                        .order_chain(currency, estimate_currency)
                        .map(|chain| chain.final_amount(profit, false))
                        .unwrap_or(0.0);
                    if let Err(cause) = recorder::record_profit(
                        &output_directory,
                        &strategy_id,
                        context.id(),
                        currency,
                        profit,
                        estimate_currency,
                        profit_estimate,
                    ) {
                        error!(strategy = %strategy_id, %cause, "failed to record profit");
                    }
                });

                let status = {
                    let mut stats = stats.lock();
                    let entry = stats
                        .iter_mut()
                        .find(|(id, _)| *id == exchange_id)
                        .map(|(_, entry)| entry);
                    match context.failure_cause() {
                        FailureCause::None => {
                            if let Some(entry) = entry {
                                entry.nb_success += 1;
                            }
                            OperationStatus::Success
                        }
                        FailureCause::Timeout => {
                            if let Some(entry) = entry {
                                entry.nb_failed_timeout += 1;
                            }
                            OperationStatus::Timeout
                        }
                        FailureCause::PlaceOrder => {
                            if let Some(entry) = entry {
                                entry.nb_failed_place_order += 1;
                            }
                            OperationStatus::Failed
                        }
                    }
                };

                let profit_estimate = profit_balance.estimate(&*exchange).unwrap_or(0.0);
                records.write().push(
                    Utc::now(),
                    OperationRecord {
                        status,
                        context_id: context.id(),
                        profit: profit_estimate,
                        currency: exchange.estimate_currency_of(),
                        description: context.description(),
                    },
                );

                let total_estimate = {
                    let stats = stats.lock();
                    stats
                        .iter()
                        .find(|(id, _)| *id == exchange_id)
                        .and_then(|(_, entry)| entry.profit.estimate(&*exchange))
                };
                info!(
                    strategy = %strategy_id,
                    exchange = %exchange_id,
                    status = status.as_str(),
                    profit_estimate,
                    total_profit_estimate = total_estimate.unwrap_or(0.0),
                    currency = %exchange.estimate_currency_of(),
                    "operation resolved"
                );
            }),
        );

        let context = Arc::clone(operation.context());
        let message = format!("Placed by strategy {}", self.id);
        exchange.process(operation, retries, &message)?;
        Ok(context)
    }

    /// Withdraw `amount` of `currency` from the venue.
    pub fn withdraw(
        &self,
        exchange: &Arc<Exchange>,
        currency: Currency,
        amount: f64,
        retries: usize,
    ) -> Result<ContextHandle, VostroError> {
        let order = Order::new(Arc::new(Transaction::withdraw(currency)));
        self.sell(exchange, order, amount, retries)
    }

    /// Read the latest `limit` operation records, oldest of them first.
    pub fn recorded_operations<F>(&self, limit: usize, callback: F)
    where
        F: FnMut(DateTime<Utc>, &OperationRecord),
    {
        self.records.read().read_latest(limit, callback);
    }

    pub fn statistics(&self, exchange_id: &ExchangeId) -> Option<StrategyStatistics> {
        let stats = self.stats.lock();
        stats
            .iter()
            .find(|(id, _)| id == exchange_id)
            .map(|(_, entry)| StrategyStatistics {
                nb_success: entry.nb_success,
                nb_failed_timeout: entry.nb_failed_timeout,
                nb_failed_place_order: entry.nb_failed_place_order,
            })
    }

    /// Accumulated profit on `exchange`, valued in its estimate currency.
    pub fn profit_estimate(&self, exchange: &Arc<Exchange>) -> Option<f64> {
        let stats = self.stats.lock();
        stats
            .iter()
            .find(|(id, _)| id == exchange.id())
            .and_then(|(_, entry)| entry.profit.estimate(&**exchange))
    }
}

/// A trading strategy. Only `sell` and `withdraw` on the host reach the
/// core.
pub trait Strategy: Send + 'static {
    fn name(&self) -> &str;

    fn trigger(&self) -> Trigger {
        Trigger::OnRateChange
    }

    /// Called once per (re)connection of the assigned exchanges.
    fn initialize(&mut self, host: &StrategyHost);

    /// Called on each trigger; `counter` counts calls since the last
    /// initialisation.
    fn process(&mut self, host: &StrategyHost, counter: u64);
}

/// Hosts a set of exchanges and the strategies trading on them, one
/// thread per strategy.
#[derive(Debug)]
pub struct Engine {
    exchanges: Vec<Arc<Exchange>>,
    pending: Vec<(Box<dyn StrategyObject>, Vec<ExchangeId>)>,
    output_directory: PathBuf,
    shutdown: Shutdown,
    threads: Vec<JoinHandle<()>>,
}

trait StrategyObject: Strategy {}
impl<T: Strategy> StrategyObject for T {}

impl std::fmt::Debug for Box<dyn StrategyObject> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Strategy({})", self.name())
    }
}

impl Engine {
    pub fn new(output_directory: PathBuf) -> Self {
        Self {
            exchanges: Vec::new(),
            pending: Vec::new(),
            output_directory,
            shutdown: Shutdown::new(),
            threads: Vec::new(),
        }
    }

    pub fn add_exchange(&mut self, exchange: Arc<Exchange>) {
        self.exchanges.push(exchange);
    }

    pub fn exchanges(&self) -> &[Arc<Exchange>] {
        &self.exchanges
    }

    /// Register a strategy trading on the given exchanges.
    pub fn add_strategy<S>(&mut self, strategy: S, exchange_ids: Vec<ExchangeId>)
    where
        S: Strategy,
    {
        self.pending.push((Box::new(strategy), exchange_ids));
    }

    /// Start every exchange, then one thread per strategy.
    pub fn start(&mut self) {
        for exchange in &self.exchanges {
            exchange.start();
        }

        for (strategy, exchange_ids) in self.pending.drain(..) {
            let assigned: Vec<Arc<Exchange>> = exchange_ids
                .iter()
                .filter_map(|id| {
                    let found = self.exchanges.iter().find(|e| e.id() == id).cloned();
                    if found.is_none() {
                        warn!(exchange = %id, "strategy references an unknown exchange");
                    }
                    found
                })
                .collect();

            let host = StrategyHost::new(strategy.name(), assigned, self.output_directory.clone());
            let shutdown = self.shutdown.clone();
            let name = format!("strategy::{}", host.id());
            match std::thread::Builder::new()
                .name(name)
                .spawn(move || run_strategy(strategy, host, shutdown))
            {
                Ok(handle) => self.threads.push(handle),
                Err(cause) => error!(%cause, "failed to spawn strategy thread"),
            }
        }
    }

    /// Stop the strategies, then the exchanges.
    pub fn stop(&mut self) {
        self.shutdown.shutdown();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("strategy thread panicked");
            }
        }
        for exchange in &self.exchanges {
            exchange.stop();
        }
        self.shutdown.rearm();
    }
}

fn run_strategy(mut strategy: Box<dyn StrategyObject>, host: StrategyHost, shutdown: Shutdown) {
    let mut needs_initialization = true;
    let mut counter: u64 = 0;
    let mut last_processed = DateTime::<Utc>::MIN_UTC;

    while shutdown.is_active() {
        match strategy.trigger() {
            Trigger::OnRateChange => {
                if !wait_any_rates(&host, Duration::from_secs(4), &shutdown) {
                    continue;
                }
            }
            trigger => {
                if !shutdown.sleep(Duration::from_secs(1)) {
                    break;
                }
                let period = trigger.period().unwrap_or(Duration::from_secs(1));
                let elapsed = Utc::now() - last_processed;
                if elapsed < TimeDelta::from_std(period).unwrap_or_default() {
                    continue;
                }
            }
        }

        let ready = host
            .exchanges()
            .iter()
            .all(|exchange| exchange.status() == ExchangeStatus::Connected);
        if !ready {
            needs_initialization = true;
            continue;
        }

        if needs_initialization {
            counter = 0;
            strategy.initialize(&host);
            info!(strategy = %host.id(), "initialized strategy");
            needs_initialization = false;
        }

        counter += 1;
        strategy.process(&host, counter);
        last_processed = Utc::now();
    }

    info!(strategy = %host.id(), "strategy thread stopped");
}

/// Wait until any assigned exchange publishes new rates.
fn wait_any_rates(host: &StrategyHost, timeout: Duration, shutdown: &Shutdown) -> bool {
    let events: Vec<SignalEvent> = host
        .exchanges()
        .iter()
        .map(|exchange| exchange.events().rates.clone())
        .collect();
    let watched: Vec<&SignalEvent> = events.iter().collect();
    SignalEvent::wait_for_any(timeout, &watched, Some(shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_periods() {
        assert_eq!(Trigger::OnRateChange.period(), None);
        assert_eq!(Trigger::EveryMinute.period(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_unique_strategy_ids_get_suffixed() {
        let first = unique_strategy_id("swing-test");
        let second = unique_strategy_id("swing-test");
        assert_eq!(first.to_string(), "swing-test");
        assert_eq!(second.to_string(), "swing-test-1");
    }
}
