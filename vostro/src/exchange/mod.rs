use crate::{config::ExchangeConfig, error::VostroError};
use chrono::{DateTime, TimeDelta, Utc};
use derive_more::Display;
use parking_lot::{Mutex, RwLock};
use smol_str::SmolStr;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};
use tracing::{debug, error, info, warn};
use vostro_execution::{
    adapter::ExchangeAdapter,
    balance::{Balance, ChainResolver},
    clock::{EngineClock, LiveClock},
    event::{EventManager, Lifetime},
    id::OrderId,
    operation::{FailureCause, Operation},
    order::Order,
    track::{
        OrderKind, TrackOrder,
        list::{EachFilter, RemoveCause, TrackOrderList},
    },
};
use vostro_instrument::{
    currency::Currency,
    format,
    transaction::{Transaction, map::PairTransactionMap},
};
use vostro_integration::{pool::JobPool, shutdown::Shutdown, signal::SignalEvent};

mod chain;
mod poller;
mod sanity;
mod watchdog;

/// Timeout of each connection phase.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Currencies with venue-independent approximate minimum trade sizes,
/// used to propagate boundary minimums and pick the estimate currency.
pub(crate) const KNOWN_CURRENCIES: [(Currency, f64); 3] = [
    (Currency::Usd, 1.0),
    (Currency::Eur, 1.0),
    (Currency::Btc, 0.0002),
];

/// Identifier of one exchange instance. Duplicate venue names get a
/// numeric suffix (`kraken`, `kraken-1`, ...).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display)]
pub struct ExchangeId(pub SmolStr);

static EXCHANGE_ID_COUNTERS: Mutex<Vec<(SmolStr, usize)>> = Mutex::new(Vec::new());

impl ExchangeId {
    pub fn unique(name: &str) -> Self {
        let mut counters = EXCHANGE_ID_COUNTERS.lock();
        match counters.iter_mut().find(|(known, _)| known == name) {
            Some((_, counter)) => {
                *counter += 1;
                Self(SmolStr::from(format!("{name}-{counter}")))
            }
            None => {
                counters.push((SmolStr::from(name), 0));
                Self(SmolStr::from(name))
            }
        }
    }
}

/// Exchange lifecycle states, owned by the watchdog.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
#[repr(u8)]
pub enum ExchangeStatus {
    Disconnected = 0,
    Disconnecting = 1,
    Connecting = 2,
    Connected = 3,
}

impl ExchangeStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ExchangeStatus::Disconnecting,
            2 => ExchangeStatus::Connecting,
            3 => ExchangeStatus::Connected,
            _ => ExchangeStatus::Disconnected,
        }
    }
}

/// The signalling events of one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeEvents {
    pub properties: SignalEvent,
    pub rates: SignalEvent,
    pub orders: SignalEvent,
    pub balance: SignalEvent,
    pub update_balance_orders: SignalEvent,
}

impl ExchangeEvents {
    fn new() -> Self {
        Self {
            properties: SignalEvent::new("PropertiesTrigger"),
            rates: SignalEvent::new("RatesTrigger"),
            orders: SignalEvent::new("OrdersTrigger"),
            balance: SignalEvent::new("BalanceTrigger"),
            update_balance_orders: SignalEvent::new("Balance&OrdersTrigger"),
        }
    }

    fn reset(&self) {
        self.properties.reset();
        self.rates.reset();
        self.orders.reset();
        self.balance.reset();
        self.update_balance_orders.reset();
    }
}

#[derive(Debug, Default)]
pub(crate) struct ExchangeProperties {
    pub(crate) currencies: Vec<Currency>,
    pub(crate) chain_map: indexmap::IndexMap<Currency, indexmap::IndexMap<Currency, Order>>,
}

/// Per-venue orchestration: lifecycle, pollers, watchdog, placement
/// pipeline and server-clock synchronisation.
///
/// All venue I/O goes through the injected [`ExchangeAdapter`]; placement
/// runs on the shared [`JobPool`] so callers never block on the venue.
pub struct Exchange {
    id: ExchangeId,
    adapter: Arc<dyn ExchangeAdapter>,
    config: ExchangeConfig,
    status: AtomicU8,
    connected_timestamp: Mutex<Option<DateTime<Utc>>>,
    estimate_currency: RwLock<Currency>,
    balance: Balance,
    initial_balance: Balance,
    transaction_map: PairTransactionMap,
    properties: RwLock<ExchangeProperties>,
    events: ExchangeEvents,
    event_manager: Arc<EventManager>,
    track_list: TrackOrderList,
    /// Scope making the event-copy + placeholder-insert + reserve update
    /// of a placement atomic with respect to event garbage collection.
    lock_orders: Mutex<()>,
    timestamp_delta: Mutex<TimeDelta>,
    threads: Mutex<Vec<(String, JoinHandle<()>)>>,
    shutdown: Shutdown,
    watchdog_shutdown: Shutdown,
    jobs: Arc<JobPool>,
    clock: Arc<dyn EngineClock>,
    connect_mutex: Mutex<()>,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Exchange {
    pub fn new(
        name: &str,
        adapter: Arc<dyn ExchangeAdapter>,
        config: ExchangeConfig,
        jobs: Arc<JobPool>,
    ) -> Arc<Self> {
        Self::with_clock(name, adapter, config, jobs, Arc::new(LiveClock))
    }

    pub fn with_clock(
        name: &str,
        adapter: Arc<dyn ExchangeAdapter>,
        config: ExchangeConfig,
        jobs: Arc<JobPool>,
        clock: Arc<dyn EngineClock>,
    ) -> Arc<Self> {
        let event_manager = Arc::new(EventManager::new());
        let track_list = TrackOrderList::new(
            Arc::clone(&event_manager),
            Arc::clone(&clock),
            config.order_register_timeout(),
        );

        Arc::new(Self {
            id: ExchangeId::unique(name),
            adapter,
            config,
            status: AtomicU8::new(ExchangeStatus::Disconnected as u8),
            connected_timestamp: Mutex::new(None),
            estimate_currency: RwLock::new(Currency::Usd),
            balance: Balance::new(),
            initial_balance: Balance::new(),
            transaction_map: PairTransactionMap::new(),
            properties: RwLock::new(ExchangeProperties::default()),
            events: ExchangeEvents::new(),
            event_manager,
            track_list,
            lock_orders: Mutex::new(()),
            timestamp_delta: Mutex::new(TimeDelta::zero()),
            threads: Mutex::new(Vec::new()),
            shutdown: Shutdown::new(),
            watchdog_shutdown: Shutdown::new(),
            jobs,
            clock,
            connect_mutex: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &ExchangeId {
        &self.id
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn status(&self) -> ExchangeStatus {
        ExchangeStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn set_status(&self, status: ExchangeStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    pub fn initial_balance(&self) -> &Balance {
        &self.initial_balance
    }

    pub fn transaction_map(&self) -> &PairTransactionMap {
        &self.transaction_map
    }

    pub fn event_manager(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    pub fn track_order_list(&self) -> &TrackOrderList {
        &self.track_list
    }

    pub fn events(&self) -> &ExchangeEvents {
        &self.events
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn ExchangeAdapter> {
        &self.adapter
    }

    pub(crate) fn watchdog_shutdown(&self) -> &Shutdown {
        &self.watchdog_shutdown
    }

    pub fn currencies(&self) -> Vec<Currency> {
        self.properties.read().currencies.clone()
    }

    pub fn currency_count(&self) -> usize {
        self.properties.read().currencies.len()
    }

    /// The pre-computed shortest order chain from `from` to `to`.
    pub fn order_chain(&self, from: Currency, to: Currency) -> Option<Order> {
        self.properties
            .read()
            .chain_map
            .get(&from)
            .and_then(|inner| inner.get(&to))
            .cloned()
    }

    /// Currency used to denominate total-value summaries.
    pub fn estimate_currency_of(&self) -> Currency {
        *self.estimate_currency.read()
    }

    /// Estimated value of the whole balance in the estimate currency.
    pub fn estimate(&self) -> Option<f64> {
        self.balance.estimate(self)
    }

    /// Estimated value of `amount` of `currency`.
    pub fn estimate_amount(&self, currency: Currency, amount: f64) -> Option<f64> {
        self.balance.estimate_amount(currency, amount, self)
    }

    /// Funds available for new orders.
    pub fn fund(&self, currency: Currency) -> f64 {
        self.balance.get(currency)
    }

    /// Estimated local view of the venue's clock.
    pub fn server_timestamp(&self) -> DateTime<Utc> {
        self.clock.time() + *self.timestamp_delta.lock()
    }

    pub fn set_server_timestamp(&self, timestamp: DateTime<Utc>) {
        *self.timestamp_delta.lock() = timestamp - self.clock.time();
    }

    pub fn connected_timestamp(&self) -> Option<DateTime<Utc>> {
        *self.connected_timestamp.lock()
    }

    /// Block until new rates are published.
    pub fn wait_for_new_rates(&self, timeout: Duration) -> bool {
        self.events.rates.wait_for_next(timeout)
    }

    /// Signal that a push adapter published fresh rates.
    pub fn notify_rates(&self) {
        self.events.rates.trigger();
    }

    /// Maximum amount worth investing on `transaction`, honouring fund
    /// diversification when enabled.
    pub fn amount_to_invest(&self, transaction: &Arc<Transaction>) -> f64 {
        let currency = transaction.initial_currency();
        let available = self.fund(currency);

        if !transaction.is_valid(available, transaction.rate()) {
            return 0.0;
        }
        if !self.config.order_diversification {
            return available;
        }

        // Fiat-to-fiat plays are not investments.
        let final_currency = transaction.final_currency();
        if currency.is_fiat() && final_currency.is_fiat() {
            return 0.0;
        }

        // Refuse when the transaction, or either of its currencies, is
        // already engaged by an active order.
        let mut transaction_active = false;
        let mut currency_used = false;
        self.track_list.each(EachFilter::All, |track| {
            let active = track.order().transaction();
            if Arc::ptr_eq(active, transaction) {
                transaction_active = true;
            }
            let active_pair = (active.initial_currency(), active.final_currency());
            if active_pair == (currency, final_currency)
                || active_pair == (final_currency, currency)
            {
                currency_used = true;
            }
        });
        if transaction_active || currency_used {
            return 0.0;
        }

        let diversity_factor = 6.0f64.min((self.currency_count() as f64 / 2.0).ceil());
        let (Some(total_estimate), Some(amount_estimate)) =
            (self.estimate(), self.estimate_amount(currency, available))
        else {
            return available;
        };
        let max_amount_estimate = total_estimate / diversity_factor;

        if amount_estimate > max_amount_estimate {
            available * (max_amount_estimate / amount_estimate)
        } else {
            available
        }
    }

    /// Start the exchange: the watchdog owns connection and reconnection
    /// from here on.
    pub fn start(self: &Arc<Self>) {
        debug_assert_eq!(self.status(), ExchangeStatus::Disconnected);
        let exchange = Arc::clone(self);
        self.spawn_thread("Watchdog", move || watchdog::watchdog_loop(exchange));
    }

    /// Disconnect and stop the watchdog.
    pub fn stop(self: &Arc<Self>) {
        self.disconnect();
        self.watchdog_shutdown.shutdown();
        self.join_threads(|name| name == "Watchdog");
        self.events.reset();
        self.watchdog_shutdown.rearm();
        debug_assert_eq!(self.status(), ExchangeStatus::Disconnected);
    }

    fn reset(&self) {
        self.events.reset();
        self.track_list.initialize(/* keep_orders */ true);
        self.transaction_map.clear();
        {
            let mut properties = self.properties.write();
            properties.currencies.clear();
            properties.chain_map.clear();
        }
        self.balance.clear();
    }

    /// Run the connect protocol. Each phase is bounded by
    /// [`CONNECTION_TIMEOUT`].
    pub(crate) fn connect(self: &Arc<Self>) -> Result<(), VostroError> {
        let _scope = self.connect_mutex.lock();
        if !self.watchdog_shutdown.is_active() {
            return Err(VostroError::ConnectTimeout {
                phase: "shutdown",
                timeout_s: 0,
            });
        }

        self.reset();
        self.set_status(ExchangeStatus::Connecting);
        info!(exchange = %self.id, config = ?self.config, "connecting");

        // Properties before anything else.
        {
            let exchange = Arc::clone(self);
            self.spawn_thread("Properties", move || exchange.properties_poller());
        }
        if !self.events.properties.wait_for_at_least(1, CONNECTION_TIMEOUT) {
            return Err(VostroError::ConnectTimeout {
                phase: "properties",
                timeout_s: CONNECTION_TIMEOUT.as_secs(),
            });
        }

        // Rates, then wait until every pair has at least one sample.
        {
            let exchange = Arc::clone(self);
            self.spawn_thread("Rates", move || exchange.rates_poller());
        }
        if !self.events.rates.wait_for_at_least(1, CONNECTION_TIMEOUT) {
            return Err(VostroError::ConnectTimeout {
                phase: "rates",
                timeout_s: CONNECTION_TIMEOUT.as_secs(),
            });
        }
        if !self.wait_all_rates(CONNECTION_TIMEOUT) {
            return Err(VostroError::ConnectTimeout {
                phase: "rates per pair",
                timeout_s: CONNECTION_TIMEOUT.as_secs(),
            });
        }

        if self.config.rates_recording {
            let exchange = Arc::clone(self);
            self.spawn_thread("RatesRecorder", move || exchange.rates_recorder());
        }

        // Identify the preferred currency for estimates.
        {
            let estimate = {
                let properties = self.properties.read();
                chain::identify_estimate_currency(&properties.chain_map, &properties.currencies)
            };
            info!(exchange = %self.id, currency = %estimate, "identified estimate currency");
            *self.estimate_currency.write() = estimate;
        }

        chain::update_transactions_minimal_amount(self);

        if !self.config.read_only {
            {
                let exchange = Arc::clone(self);
                self.spawn_thread("Balance&Orders", move || exchange.balance_orders_poller());
            }
            for event in [&self.events.orders, &self.events.balance] {
                if !event.wait_for_at_least(1, CONNECTION_TIMEOUT) {
                    return Err(VostroError::ConnectTimeout {
                        phase: "balance and orders",
                        timeout_s: CONNECTION_TIMEOUT.as_secs(),
                    });
                }
            }
        }

        if let Err(error) = sanity::sanity_check(self) {
            error!(exchange = %self.id, %error, "sanity check failed");
        }

        *self.connected_timestamp.lock() = Some(self.clock.time());
        self.set_status(ExchangeStatus::Connected);
        info!(exchange = %self.id, "connected");
        Ok(())
    }

    /// Terminate every per-connection thread; the watchdog survives.
    pub(crate) fn disconnect(self: &Arc<Self>) {
        let _scope = self.connect_mutex.lock();
        self.set_status(ExchangeStatus::Disconnecting);
        info!(exchange = %self.id, "disconnecting");

        self.jobs.wait_for_all_jobs();

        if !self.config.is_rates_polling()
            && let Err(error) =
                vostro_integration::retry::with_retry(3, || self.adapter.update_rates_stop())
        {
            error!(exchange = %self.id, %error, "failed to stop the rates feed");
        }

        self.shutdown.shutdown();
        self.join_threads(|name| name != "Watchdog");
        self.shutdown.rearm();

        self.set_status(ExchangeStatus::Disconnected);
        info!(exchange = %self.id, "disconnected");
    }

    fn wait_all_rates(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let mut pending = None;
            self.transaction_map.each_pair(|_, _, transaction| {
                if pending.is_none() && transaction.rate_count() == 0 {
                    pending = Some(transaction.to_string());
                }
            });
            let Some(pending) = pending else { return true };

            if std::time::Instant::now() >= deadline {
                error!(exchange = %self.id, pair = %pending, "rate was never updated");
                return false;
            }
            if !self.shutdown.sleep(Duration::from_millis(200)) {
                return false;
            }
        }
    }

    pub(crate) fn spawn_thread<F>(self: &Arc<Self>, name: &str, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut threads = self.threads.lock();
        if threads.iter().any(|(known, _)| known == name) {
            warn!(exchange = %self.id, thread = name, "thread is already registered");
            return;
        }

        let full_name = format!("{}::{}", self.id, name);
        match std::thread::Builder::new().name(full_name).spawn(body) {
            Ok(handle) => threads.push((name.to_owned(), handle)),
            Err(cause) => error!(exchange = %self.id, thread = name, %cause, "failed to spawn"),
        }
    }

    fn join_threads<F>(&self, select: F)
    where
        F: Fn(&str) -> bool,
    {
        let selected: Vec<(String, JoinHandle<()>)> = {
            let mut threads = self.threads.lock();
            let (selected, kept): (Vec<_>, Vec<_>) =
                threads.drain(..).partition(|(name, _)| select(name));
            *threads = kept;
            selected
        };

        for (name, handle) in selected {
            debug!(exchange = %self.id, thread = %name, "terminating");
            if handle.join().is_err() {
                error!(exchange = %self.id, thread = %name, "thread panicked");
            }
        }
    }

    pub(crate) fn any_connection_thread_finished(&self) -> bool {
        let threads = self.threads.lock();
        let mut any = false;
        for (name, handle) in threads.iter() {
            if name != "Watchdog" && handle.is_finished() {
                error!(exchange = %self.id, thread = %name, "thread is inactive");
                any = true;
            }
        }
        any
    }

    /// Submit an operation. Failures re-enter `process` through the
    /// order-error event with one retry fewer and the then-current
    /// available amount; once retries are exhausted the context records
    /// `FailureCause::PlaceOrder`.
    pub fn process(
        self: &Arc<Self>,
        operation: Operation,
        retries: usize,
        message: &str,
    ) -> Result<(), VostroError> {
        let mut operation = operation;

        if retries > 0 {
            let exchange = Arc::downgrade(self);
            let retry_operation = operation.clone();
            operation.on_order_error(
                "retryOnFailure",
                Arc::new(move |_, track| {
                    let Some(exchange) = exchange.upgrade() else {
                        return;
                    };
                    info!(
                        exchange = %exchange.id,
                        order = %track.trace_id(),
                        retries_left = retries - 1,
                        "order failed, retrying"
                    );

                    let mut updated = retry_operation.clone();
                    let available = exchange
                        .balance
                        .get_with_reserve(updated.order().initial_currency());
                    if available < updated.amount() {
                        info!(
                            exchange = %exchange.id,
                            order = %track.trace_id(),
                            available,
                            requested = updated.amount(),
                            "available amount is lower than requested, adjusting"
                        );
                        updated.set_amount(available);
                    }

                    let message = format!("Retrying (left: {})", retries - 1);
                    if let Err(error) = exchange.process(updated, retries - 1, &message) {
                        error!(exchange = %exchange.id, %error, "retry submission failed");
                    }
                }),
                Lifetime::Order,
            );
        } else {
            operation.on_order_error(
                "monitorFailure",
                Arc::new(|context, _| {
                    if let Some(context) = context {
                        context.set_failure_cause(FailureCause::PlaceOrder);
                    }
                }),
                Lifetime::Order,
            );
        }

        self.process_inner(operation, message)
    }

    fn process_inner(
        self: &Arc<Self>,
        operation: Operation,
        message: &str,
    ) -> Result<(), VostroError> {
        if self.config.read_only {
            return Err(VostroError::ReadOnly);
        }

        let order = operation.order().clone();
        // Floor so rounding can never submit more than is available.
        let amount = format::floor_to(operation.amount(), order.transaction().decimal_place());

        let mut track = TrackOrder::new(OrderId::unique(), order.clone(), amount, self.clock.time());
        track.set_context(Arc::clone(operation.context()));
        let id = track.id().clone();
        let trace = track.trace_id();
        let kind = track.kind();

        if !order.is_valid(amount) {
            // Keep the event trail of the refused order.
            let refused = format!("Invalid order {order} with amount {amount}, ignoring");
            self.track_list.add(track, message);
            self.track_list.activate(&id, true)?;
            self.track_list
                .remove(RemoveCause::Cancel, &id, &refused, true)?;
            error!(exchange = %self.id, %refused, "refusing order");
            return Ok(());
        }

        let mut updated_operation = operation.clone();

        // A chained order spawns its next leg on completion, inheriting
        // only operation-scope events. Error handlers are not carried
        // over: each leg renews its own.
        if let Some(next) = order.next() {
            let next_order = next.clone();
            let original_events = operation.events().clone();
            let exchange = Arc::downgrade(self);
            updated_operation.on_order_complete(
                "nextOrder",
                Arc::new(move |context, track, amount_processed| {
                    let Some(exchange) = exchange.upgrade() else {
                        return;
                    };
                    let order = track.order();
                    let final_amount = order.first_final_amount(amount_processed, true);
                    debug!(
                        exchange = %exchange.id,
                        order = %track.trace_id(),
                        amount_processed,
                        final_amount,
                        next = %next_order,
                        "leg completed, processing next order"
                    );

                    if !next_order.is_valid(final_amount) {
                        warn!(
                            exchange = %exchange.id,
                            order = %track.trace_id(),
                            final_amount,
                            currency = %next_order.initial_currency(),
                            "next order would be invalid, most likely too small, ignoring"
                        );
                        return;
                    }
                    let Some(context) = context else {
                        return;
                    };

                    match Operation::new(next_order.clone(), final_amount, Arc::clone(context)) {
                        Ok(mut next_operation) => {
                            next_operation
                                .events_mut()
                                .replace_from(&original_events, Lifetime::Operation);
                            let message = format!("Next order from {}", track.trace_id());
                            if let Err(error) = exchange.process(next_operation, 10, &message) {
                                error!(exchange = %exchange.id, %error, "failed to spawn next leg");
                            }
                        }
                        Err(error) => {
                            error!(exchange = %exchange.id, %error, "next leg is not viable")
                        }
                    }
                }),
                Lifetime::Order,
            );
        }

        updated_operation.on_order_timeout(
            "monitorTimeout",
            Arc::new(|context, _| {
                if let Some(context) = context {
                    context.set_failure_cause(FailureCause::Timeout);
                }
            }),
            Lifetime::Order,
        );

        // Events must register in the same scope as the placeholder so a
        // concurrent event sweep cannot observe one without the other.
        {
            let _scope = self.lock_orders.lock();
            self.event_manager
                .copy_order_events(&id, updated_operation.events(), Lifetime::Order);
            self.track_list.add(track, message);
            self.balance.update_reserve(&self.track_list.active_amounts());
        }

        // Submit from the job pool so the caller never blocks on the
        // venue.
        let exchange = Arc::clone(self);
        let first_order = order.copy_first(false);
        self.jobs.execute(move || {
            info!(exchange = %exchange.id, order = %trace, "placing order");

            let result = match kind {
                OrderKind::Market | OrderKind::Limit => {
                    exchange.adapter.set_order(&first_order, amount)
                }
                OrderKind::Withdraw => exchange
                    .adapter
                    .withdraw(first_order.initial_currency(), amount)
                    .map(|_| Vec::new()),
            };

            match result {
                Ok(created_ids) => {
                    if !created_ids.is_empty()
                        && exchange
                            .track_list
                            .match_ids(&id, &created_ids, false)
                            .unwrap_or(false)
                    {
                        info!(
                            exchange = %exchange.id,
                            order = %trace,
                            ids = ?created_ids,
                            "assigned venue ids"
                        );
                    }
                }
                Err(error) => {
                    error!(exchange = %exchange.id, order = %trace, %error, "error while placing");
                    if let Err(error) = exchange.track_list.remove(
                        RemoveCause::Failed,
                        &id,
                        &error.to_string(),
                        false,
                    ) {
                        error!(exchange = %exchange.id, %error, "failed to mark placement failure");
                    }
                }
            }

            if let Err(error) = exchange.track_list.activate(&id, false) {
                error!(exchange = %exchange.id, %error, "failed to activate placeholder");
            }
            exchange.events.update_balance_orders.trigger();
        });

        Ok(())
    }
}

impl ChainResolver for Exchange {
    fn order_chain(&self, from: Currency, to: Currency) -> Option<Order> {
        Exchange::order_chain(self, from, to)
    }

    fn estimate_currency(&self) -> Currency {
        self.estimate_currency_of()
    }
}
