use super::Exchange;
use crate::{config::RatesPolling, error::VostroError, exchange::chain, recorder};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::{Duration, Instant};
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use vostro_execution::{balance::Balance, error::AdapterError, track::TrackOrder};
use vostro_instrument::transaction::{RATE_HISTORY_CAPACITY, map::PairTransactionMap};
use vostro_integration::{retry::with_retry, signal::SignalEvent};

impl Exchange {
    /// One properties poll: fetch a fresh map and swap it in when the
    /// definitions changed, rebuilding the currency set and order-chain
    /// map.
    pub(crate) fn poll_properties_once(&self) {
        trace!(exchange = %self.id, "updating properties");

        let fresh = PairTransactionMap::new();
        let server_time = match with_retry(3, || self.adapter().update_properties(&fresh)) {
            Ok(server_time) => server_time,
            Err(error) => {
                error!(exchange = %self.id, %error, "error while updating properties, ignore");
                return;
            }
        };
        if let Some(server_time) = server_time {
            self.set_server_timestamp(server_time);
        }

        if self.transaction_map.same_definition(&fresh) {
            return;
        }
        info!(exchange = %self.id, "properties updated");

        let mut properties = self.properties.write();
        self.transaction_map.replace(fresh);
        properties.currencies = self.transaction_map.currencies();
        info!(
            exchange = %self.id,
            currencies = properties.currencies.len(),
            pairs = self.transaction_map.pair_count(),
            "identified currencies and transaction pairs"
        );
        properties.chain_map =
            chain::build_order_chain_map(&self.transaction_map, &properties.currencies);
        drop(properties);

        self.events.properties.trigger();
    }

    pub(crate) fn properties_poller(self: Arc<Self>) {
        loop {
            self.poll_properties_once();
            if !self.shutdown.sleep(self.config.properties_polling_period()) {
                return;
            }
        }
    }

    /// One rates poll in the configured mode. Specific-currency and
    /// specific-pair modes fan out in parallel, one task each.
    pub(crate) fn poll_rates_once(&self) -> Result<(), VostroError> {
        match self.config.rates_polling {
            RatesPolling::None => return Ok(()),
            RatesPolling::UpdateRates => {
                with_retry(3, || self.adapter().update_rates(&self.transaction_map))?;
            }
            RatesPolling::UpdateRatesSpecificCurrency => {
                let currencies = self.currencies();
                fan_out(currencies.len(), |index| {
                    with_retry(3, || {
                        self.adapter()
                            .update_rates_currency(&self.transaction_map, currencies[index])
                    })
                })?;
            }
            RatesPolling::UpdateRatesSpecificPair => {
                let mut pairs = Vec::new();
                self.transaction_map.each_pair(|initial, final_currency, transaction| {
                    if !transaction.is_inverted() {
                        pairs.push((initial, final_currency));
                    }
                });
                fan_out(pairs.len(), |index| {
                    let (initial, final_currency) = pairs[index];
                    with_retry(3, || {
                        self.adapter()
                            .update_rates_pair(&self.transaction_map, initial, final_currency)
                    })
                })?;
            }
        }

        self.events.rates.trigger();
        Ok(())
    }

    pub(crate) fn rates_poller(self: Arc<Self>) {
        if !self.config.is_rates_polling() {
            if let Err(error) = with_retry(3, || self.adapter().update_rates_start()) {
                error!(exchange = %self.id, %error, "failed to start the rates feed");
            }
            return;
        }

        loop {
            if let Err(error) = self.poll_rates_once() {
                error!(exchange = %self.id, %error, "error while updating rates, ignore");
            }
            if !self.shutdown.sleep(self.config.rates_polling_period()) {
                return;
            }
        }
    }

    /// One balance & orders cycle.
    ///
    /// The order snapshot is fetched before the balance so a vanished
    /// order's movements are guaranteed to sit between the previous
    /// balance snapshot and this one. Returns whether another cycle
    /// should run immediately.
    pub(crate) fn update_balance_and_orders(&self) -> Result<bool, VostroError> {
        let entry_counter = self.events.update_balance_orders.counter();
        let mut print_balance = self.balance.is_empty();

        // -1ms so the previous balance snapshot itself stays in range.
        let last_valid_balance_update = self
            .track_list
            .balance_movements()
            .last_update_timestamp()
            .checked_sub_signed(TimeDelta::milliseconds(1))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut orders: Vec<TrackOrder> = Vec::new();
        let snapshot = Balance::new();

        trace!(exchange = %self.id, "updating order list");
        let fetched: Result<(), AdapterError> = with_retry(3, || {
            orders.clear();
            self.adapter().update_orders(&mut orders)
        })
        .and_then(|_| {
            trace!(exchange = %self.id, "updating balance");
            with_retry(3, || {
                snapshot.clear();
                self.adapter().update_balance(&snapshot)
            })
        });
        if let Err(error) = fetched {
            error!(exchange = %self.id, %error, "error while fetching balance/orders, ignore");
            return Ok(false);
        }
        self.track_list.update_balance(&snapshot);

        // A placement landed mid-fetch: this snapshot may already be
        // stale, reload.
        if self.events.update_balance_orders.counter() > entry_counter {
            return Ok(true);
        }

        print_balance |= self.track_list.update(orders, last_valid_balance_update);
        {
            let _scope = self.lock_orders.lock();
            self.event_manager
                .garbage_collect(|id| self.track_list.contains(id));
        }
        self.events.orders.trigger();

        self.balance.set_funds_and_update_reserve(
            &snapshot,
            &self.track_list.active_amounts(),
            self.config.balance_include_reserve,
        );
        self.track_list.reserve_balance(&self.balance);
        if self.initial_balance.is_empty() {
            self.initial_balance.set_funds(&self.balance);
        }
        self.events.balance.trigger();

        if print_balance {
            self.balance.finalize_initial_estimate(self);
            info!(
                exchange = %self.id,
                balance = %self.balance.summary(self),
                orders = %self.track_list,
                server_timestamp = %self.server_timestamp(),
                "balance updated"
            );
        }

        let need_update = self
            .track_list
            .cancel_timeouts(self.server_timestamp(), |track| {
                match with_retry(3, || self.adapter().cancel_order(track)) {
                    Ok(()) => {
                        info!(exchange = %self.id, order = %track.trace_id(), "order canceled");
                        true
                    }
                    Err(error) => {
                        error!(
                            exchange = %self.id,
                            order = %track.trace_id(),
                            %error,
                            "error while canceling, will retry next cycle"
                        );
                        false
                    }
                }
            });

        Ok(need_update)
    }

    pub(crate) fn balance_orders_poller(self: Arc<Self>) {
        debug_assert!(!self.config.read_only);

        let event = self.events.update_balance_orders.clone();
        let mut counter = event.counter();
        let mut need_update = true;

        while self.shutdown.is_active() {
            if need_update || counter != event.counter() {
                counter = event.counter();
                match self.update_balance_and_orders() {
                    Ok(again) => need_update = again,
                    Err(error) => {
                        error!(exchange = %self.id, %error, "unhandled error, abort");
                        return;
                    }
                }
            } else {
                self.wait_event_sliced(&event, self.config.order_polling_period());
                need_update = true;
            }
        }
    }

    /// Wait for `event` up to `period`, in bounded slices so shutdown
    /// stays responsive.
    fn wait_event_sliced(&self, event: &SignalEvent, period: Duration) {
        const SLICE: Duration = Duration::from_secs(4);
        let deadline = Instant::now() + period;
        while self.shutdown.is_active() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            if event.wait_for_next((deadline - now).min(SLICE)) {
                return;
            }
        }
    }

    /// Periodically flush the rate history to the per-pair CSVs, before
    /// the ring buffer can wrap.
    pub(crate) fn rates_recorder(self: Arc<Self>) {
        let output = self.config.output_directory.clone();
        let mut since: Option<DateTime<Utc>> = None;

        while self.shutdown.is_active() {
            for _ in 0..(RATE_HISTORY_CAPACITY / 2) {
                if !self.shutdown.is_active() {
                    return;
                }
                self.events.rates.wait_for_next(Duration::from_secs(4));
            }

            debug!(exchange = %self.id, "recording rates");
            since = Some(recorder::record_rates(
                &output,
                &self.transaction_map,
                since,
                self.clock.time(),
            ));
        }
    }
}

/// Run `count` tasks in parallel scoped threads, collecting the first
/// error.
fn fan_out<F>(count: usize, task: F) -> Result<(), VostroError>
where
    F: Fn(usize) -> Result<(), AdapterError> + Sync,
{
    let task = &task;
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..count)
            .map(|index| scope.spawn(move || task(index)))
            .collect();

        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    first_error.get_or_insert(VostroError::from(error));
                }
                Err(_) => {
                    first_error.get_or_insert(VostroError::Adapter(AdapterError::Api(
                        "rates task panicked".to_owned(),
                    )));
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    })
}
