use crate::{
    error::ExecutionError,
    event::{Lifetime, OrderCompleteCallback, OrderErrorCallback, OrderEvents, OrderTimeoutCallback},
    id::{ContextId, StrategyId},
    order::Order,
    track::TrackOrder,
};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    fmt::Write,
    sync::Arc,
};
use tracing::{debug, error, info};
use vostro_instrument::currency::Currency;

/// Shared handle on an operation context. When the last handle is
/// released the context's completion handlers fire: the operation is
/// over once no in-flight order, event or caller refers to it anymore.
pub type ContextHandle = Arc<OperationContext>;

/// Callback fired when the context's last handle is released.
pub type CompleteCallback = Arc<dyn Fn(&OperationContext) + Send + Sync>;

/// Why an operation did not fully succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FailureCause {
    None,
    Timeout,
    PlaceOrder,
}

/// Profit attributed to one currency.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Profit {
    /// Replaced on each evaluation of the operation outcome.
    pub fixed: f64,
    /// Accumulated across completions.
    pub accumulated: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct ConvertedInfo {
    amount: f64,
    ratio: f64,
}

/// Tracks how the initial investment spread across currencies as the
/// chain's legs complete, so end-to-end profit/loss can be evaluated
/// against the initial amount.
#[derive(Debug)]
struct ProfitMonitor {
    initial_currency: Currency,
    initial_amount: f64,
    back_converted: ConvertedInfo,
    converted: IndexMap<Currency, ConvertedInfo>,
}

impl ProfitMonitor {
    fn new(initial_currency: Currency, initial_amount: f64) -> Self {
        let mut converted = IndexMap::new();
        converted.insert(
            initial_currency,
            ConvertedInfo {
                amount: initial_amount,
                ratio: 1.0,
            },
        );
        Self {
            initial_currency,
            initial_amount,
            back_converted: ConvertedInfo::default(),
            converted,
        }
    }

    /// Re-evaluate the profit and description after a conversion.
    fn evaluate(&self) -> (String, f64) {
        let mut out = String::new();
        let mut profit = 0.0;
        let mut ratio_sum = 0.0;
        let mut empty = true;

        if self.back_converted.amount != 0.0 {
            let fully_processed = self.initial_amount * self.back_converted.ratio;
            let _ = write!(
                out,
                "{fully_processed} {} -> {} {}",
                self.initial_currency, self.back_converted.amount, self.initial_currency
            );
            profit = self.back_converted.amount - fully_processed;
            ratio_sum += self.back_converted.ratio;
            empty = false;
        }

        for (currency, info) in self.converted.iter() {
            if info.amount != 0.0 && *currency != self.initial_currency {
                let _ = write!(
                    out,
                    "{}{} {} -> {} {}",
                    if empty { "" } else { ", " },
                    self.initial_amount * info.ratio,
                    self.initial_currency,
                    info.amount,
                    currency
                );
                empty = false;
            }
            ratio_sum += info.ratio;
        }

        let not_processed = self
            .converted
            .get(&self.initial_currency)
            .map(|info| info.amount)
            .unwrap_or(0.0);
        if not_processed != 0.0 {
            let _ = write!(
                out,
                "{}not processed: {} {}",
                if empty { "" } else { ", " },
                not_processed,
                self.initial_currency
            );
            empty = false;
        }

        let processed = self.initial_amount - not_processed;
        let fee_amount = processed * (1.0 - ratio_sum);
        profit -= fee_amount;

        let (profit_percent, fee_percent) = if processed != 0.0 {
            (profit / processed * 100.0, fee_amount / processed * 100.0)
        } else {
            (0.0, 0.0)
        };
        let _ = write!(
            out,
            "{}profit/loss={} {} ({:.2}%), fee={:.2}% of {} {}",
            if empty { "" } else { ", " },
            profit,
            self.initial_currency,
            profit_percent,
            fee_percent,
            processed,
            self.initial_currency
        );

        (out, profit)
    }
}

/// Operation-level state shared across all orders of a chain and all
/// their retries.
///
/// Destruction of the last [`ContextHandle`] fires the `on_complete`
/// handlers; this is how a strategy learns that every leg and retry
/// resolved.
pub struct OperationContext {
    id: ContextId,
    strategy_id: StrategyId,
    failure_cause: Mutex<FailureCause>,
    profit_ratio: Mutex<f64>,
    profit: RwLock<IndexMap<Currency, Profit>>,
    on_complete: Mutex<Vec<(&'static str, CompleteCallback)>>,
    description: RwLock<String>,
    monitor: Mutex<ProfitMonitor>,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("id", &self.id)
            .field("strategy_id", &self.strategy_id)
            .field("failure_cause", &*self.failure_cause.lock())
            .finish()
    }
}

impl OperationContext {
    pub fn new(
        strategy_id: StrategyId,
        initial_currency: Currency,
        initial_amount: f64,
    ) -> ContextHandle {
        Arc::new(Self {
            id: ContextId::unique(),
            strategy_id,
            failure_cause: Mutex::new(FailureCause::None),
            profit_ratio: Mutex::new(0.0),
            profit: RwLock::new(IndexMap::new()),
            on_complete: Mutex::new(Vec::new()),
            description: RwLock::new(String::new()),
            monitor: Mutex::new(ProfitMonitor::new(initial_currency, initial_amount)),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn strategy_id(&self) -> &StrategyId {
        &self.strategy_id
    }

    /// Expected profit ratio credited when the chain's last leg
    /// completes, in percent.
    pub fn set_profit_on_complete(&self, profit_percent: f64) {
        *self.profit_ratio.lock() = profit_percent / 100.0;
    }

    pub fn set_profit(&self, currency: Currency, profit: f64) {
        self.profit.write().entry(currency).or_default().fixed = profit;
    }

    pub fn add_profit(&self, currency: Currency, profit: f64) {
        self.profit.write().entry(currency).or_default().accumulated += profit;
    }

    /// Visit the per-currency profit totals.
    pub fn profit<F>(&self, mut callback: F)
    where
        F: FnMut(Currency, f64),
    {
        for (currency, profit) in self.profit.read().iter() {
            callback(*currency, profit.fixed + profit.accumulated);
        }
    }

    /// An operation is effective once it processed anything.
    pub fn is_effective(&self) -> bool {
        !self.profit.read().is_empty()
    }

    pub fn set_failure_cause(&self, cause: FailureCause) {
        *self.failure_cause.lock() = cause;
    }

    pub fn failure_cause(&self) -> FailureCause {
        *self.failure_cause.lock()
    }

    pub fn description(&self) -> String {
        self.description.read().clone()
    }

    /// Attach a completion handler, fired whether the operation succeeds
    /// or fails.
    pub fn on_complete(&self, name: &'static str, callback: CompleteCallback) {
        self.on_complete.lock().push((name, callback));
    }

    /// Credit the configured profit ratio when the chain's last leg
    /// completes.
    pub fn apply_profit(&self, track: &TrackOrder, amount_processed: f64) {
        let ratio = *self.profit_ratio.lock();
        if ratio != 0.0 && track.order().next().is_none() {
            let final_currency = track.order().final_currency();
            let final_no_fee = track.order().final_amount(amount_processed, false);
            self.add_profit(final_currency, final_no_fee * ratio);
        }
    }

    /// Update the converted amounts and ratios after a leg processed
    /// `amount` of its initial currency.
    pub fn convert(&self, order: &Order, amount: f64) {
        let mut monitor = self.monitor.lock();

        let currency_initial = order.initial_currency();
        let currency_final = order.first_final_currency();

        let Some(registered) = monitor.converted.get(&currency_initial).copied() else {
            error!(
                context = %self.id,
                currency = %currency_initial,
                "currency is not registered within this profit monitor"
            );
            return;
        };

        let amount = if registered.amount < amount {
            if order.is_valid(amount - registered.amount) {
                error!(
                    context = %self.id,
                    registered = registered.amount,
                    processed = amount,
                    "registered amount is lower than the processed amount, clamping"
                );
            }
            registered.amount
        } else {
            amount
        };
        if amount <= 0.0 || registered.amount <= 0.0 {
            return;
        }

        let amount_converted = order.first_final_amount(amount, true);
        let amount_converted_no_fee = order.first_final_amount(amount, false);
        let fee_ratio = (amount_converted_no_fee - amount_converted) / amount_converted_no_fee;

        let proceed_ratio = (amount / registered.amount) * registered.ratio;

        if let Some(entry) = monitor.converted.get_mut(&currency_initial) {
            entry.ratio -= proceed_ratio;
            entry.amount -= amount;
        }

        if currency_final == monitor.initial_currency {
            monitor.back_converted.ratio += proceed_ratio * (1.0 - fee_ratio);
            monitor.back_converted.amount += amount_converted;
        } else {
            let entry = monitor.converted.entry(currency_final).or_default();
            entry.ratio += proceed_ratio * (1.0 - fee_ratio);
            entry.amount += amount_converted;
        }

        let (description, profit) = monitor.evaluate();
        let initial_currency = monitor.initial_currency;
        drop(monitor);

        *self.description.write() = description;
        self.set_profit(initial_currency, profit);
    }

    fn trigger_on_complete(&self) {
        let callbacks = std::mem::take(&mut *self.on_complete.lock());
        for (name, callback) in callbacks {
            debug!(context = %self.id, name, "firing context onComplete");
            callback(self);
        }
    }
}

impl Drop for OperationContext {
    fn drop(&mut self) {
        let description = self.description.read().clone();
        if !description.is_empty() {
            info!(context = %self.id, %description, "operation resolved");
        }
        self.trigger_on_complete();
    }
}

/// Standard `apply_profit` completion handler.
pub fn apply_profit_handler() -> OrderCompleteCallback {
    Arc::new(|context, track, amount| {
        if let Some(context) = context {
            context.apply_profit(track, amount);
        }
    })
}

/// Standard `monitor_profit` completion handler.
pub fn monitor_profit_handler() -> OrderCompleteCallback {
    Arc::new(|context, track, amount| {
        if let Some(context) = context {
            context.convert(track.order(), amount);
            debug!(context = %context.id(), "processed order with monitored context");
        }
    })
}

/// An operation bundles an order (possibly a chain), the amount to
/// invest, the shared context and the events to attach at placement.
#[derive(Debug, Clone)]
pub struct Operation {
    order: Order,
    amount: f64,
    context: ContextHandle,
    events: OrderEvents,
}

impl Operation {
    pub fn new(
        order: Order,
        amount: f64,
        context: ContextHandle,
    ) -> Result<Self, ExecutionError> {
        if !order.is_valid(amount) {
            return Err(ExecutionError::InvalidOrder { amount });
        }

        let mut operation = Self {
            order,
            amount,
            context,
            events: OrderEvents::default(),
        };
        operation.on_order_complete("applyProfit", apply_profit_handler(), Lifetime::Operation);
        Ok(operation)
    }

    /// An operation whose context monitors end-to-end profit against the
    /// initial investment.
    pub fn order_operation(
        order: Order,
        amount: f64,
        strategy_id: StrategyId,
    ) -> Result<Self, ExecutionError> {
        let context = OperationContext::new(strategy_id, order.initial_currency(), amount);
        let mut operation = Self::new(order, amount, context)?;
        operation.on_order_complete("monitorProfit", monitor_profit_handler(), Lifetime::Operation);
        Ok(operation)
    }

    pub fn on_order_complete(
        &mut self,
        name: &'static str,
        callback: OrderCompleteCallback,
        lifetime: Lifetime,
    ) {
        self.events
            .on_complete
            .add(name, Some(Arc::clone(&self.context)), callback, lifetime);
    }

    pub fn on_order_error(
        &mut self,
        name: &'static str,
        callback: OrderErrorCallback,
        lifetime: Lifetime,
    ) {
        self.events
            .on_error
            .add(name, Some(Arc::clone(&self.context)), callback, lifetime);
    }

    pub fn on_order_timeout(
        &mut self,
        name: &'static str,
        callback: OrderTimeoutCallback,
        lifetime: Lifetime,
    ) {
        self.events
            .on_timeout
            .add(name, Some(Arc::clone(&self.context)), callback, lifetime);
    }

    /// Attach a completion handler on the context.
    pub fn on_complete(&self, name: &'static str, callback: CompleteCallback) {
        self.context.on_complete(name, callback);
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn set_amount(&mut self, amount: f64) {
        self.amount = amount;
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    pub fn events(&self) -> &OrderEvents {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut OrderEvents {
        &mut self.events
    }
}
