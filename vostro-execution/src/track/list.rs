use crate::{
    balance::Balance,
    clock::EngineClock,
    error::ExecutionError,
    event::{EventManager, Lifetime},
    id::{ContextId, OrderId, StrategyId},
    movements::BalanceMovements,
    track::{OrderKind, TrackOrder},
};
use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use itertools::Itertools;
use parking_lot::RwLock;
use std::{cmp::Ordering, fmt, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};
use vostro_instrument::{currency::Currency, format};
use vostro_integration::collection::SortedRingBuffer;

/// Number of order state transitions retained for inspection.
pub const ORDER_RECORDS_CAPACITY: usize = 256;

/// Weight below which a placeholder/venue-row pairing is not credible.
const MATCH_WEIGHT_FLOOR: f64 = 0.1;

/// Why an entry was marked for removal.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RemoveCause {
    Failed,
    Cancel,
    Timeout,
}

/// Progress of an entry from local intent to venue-confirmed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum EntryKind {
    /// Submitted locally, adapter call not returned yet. No timeout runs.
    Placeholder,
    /// Adapter call returned; the register deadline runs from activation.
    ActivatedPlaceholder,
    /// Activated placeholder that adopted a venue id.
    MatchedPlaceholder,
    /// Confirmed against a venue snapshot row.
    Matched,
}

/// Filter for [`TrackOrderList::each`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EachFilter {
    All,
    Placeholder,
    ActivatedPlaceholder,
    MatchedPlaceholder,
    Matched,
    Cancelled,
    Failed,
    TimedOut,
}

/// Kind of a recorded order state transition.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RecordKind {
    Place,
    Partial,
    Proceed,
    Cancel,
    Failed,
    Timeout,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Place => "place",
            RecordKind::Partial => "partial",
            RecordKind::Proceed => "proceed",
            RecordKind::Cancel => "cancel",
            RecordKind::Failed => "failed",
            RecordKind::Timeout => "timeout",
        }
    }
}

/// One recorded order state transition.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub kind: RecordKind,
    pub id: OrderId,
    pub order_kind: OrderKind,
    pub initial: Currency,
    pub final_currency: Currency,
    pub amount: f64,
    pub rate: f64,
    pub context_id: Option<ContextId>,
    pub strategy_id: StrategyId,
    pub message: String,
}

#[derive(Debug, Clone)]
struct TrackOrderEntry {
    track: TrackOrder,
    cancel: Option<(RemoveCause, DateTime<Utc>)>,
    activated: Option<DateTime<Utc>>,
    kind: EntryKind,
}

impl TrackOrderEntry {
    fn new(track: TrackOrder, is_placeholder: bool) -> Self {
        Self {
            track,
            cancel: None,
            activated: None,
            kind: if is_placeholder {
                EntryKind::Placeholder
            } else {
                EntryKind::Matched
            },
        }
    }

    fn is_placeholder(&self) -> bool {
        self.kind != EntryKind::Matched
    }

    fn is_activated_placeholder(&self) -> bool {
        matches!(
            self.kind,
            EntryKind::ActivatedPlaceholder | EntryKind::MatchedPlaceholder
        )
    }

    fn is_matched_placeholder(&self) -> bool {
        self.kind == EntryKind::MatchedPlaceholder
    }

    fn is_matched(&self) -> bool {
        self.kind == EntryKind::Matched
    }

    fn activate_placeholder(&mut self, timestamp: DateTime<Utc>) {
        self.kind = EntryKind::ActivatedPlaceholder;
        self.activated = Some(timestamp);
    }

    fn match_placeholder(&mut self, timestamp: DateTime<Utc>) {
        self.activated = Some(timestamp);
        self.kind = EntryKind::MatchedPlaceholder;
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some()
    }

    fn cancel_cause(&self) -> Option<RemoveCause> {
        self.cancel.map(|(cause, _)| cause)
    }

    fn set_cancel(&mut self, timestamp: DateTime<Utc>, cause: RemoveCause) {
        self.cancel = Some((cause, timestamp));
    }

    fn clear_cancel(&mut self) {
        self.cancel = None;
    }

    fn is_cancel_timeout(&self, timestamp: DateTime<Utc>, register_timeout: Duration) -> bool {
        let Some((_, cancelled_at)) = self.cancel else {
            return false;
        };
        match TimeDelta::from_std(register_timeout) {
            Ok(timeout) => timestamp > cancelled_at + timeout,
            Err(_) => false,
        }
    }

    /// Five times the remaining amount still under the minimum trade
    /// size: nothing meaningful can come out of this entry anymore.
    fn is_amount_neglectable(&self) -> bool {
        !self.track.order().first_valid(self.track.amount() * 5.0)
    }

    /// Adopt the venue row's id, amount, rate and creation time,
    /// preserving the local context and order chain.
    fn match_track(&mut self, update: &TrackOrder) {
        if self.track.id() != update.id() && self.is_cancelled() {
            self.clear_cancel();
        }
        self.kind = EntryKind::Matched;

        if update.order().next().is_some() || update.context().is_some() {
            error!(
                id = %update.id(),
                "venue snapshot rows must not carry a chain or a context"
            );
        }
        if !self
            .track
            .order()
            .transaction()
            .same_definition(update.order().transaction())
        {
            error!(
                original = %self.track.trace_id(),
                update = %update.trace_id(),
                "matched rows refer to different transactions"
            );
        }

        self.track.set_id(update.id().clone());
        self.track.set_amount(update.amount());
        self.track.set_creation_time(update.creation_time());
        self.track.order_mut().set_rate(update.rate());
        debug!(update = %update, merged = %self.track, "matched venue row into entry");
    }

    /// Minimal `order rate - observed rate` over the window; zero or
    /// negative means the market touched the order's rate and a fill was
    /// possible.
    fn min_distance(&self, new: DateTime<Utc>, old: DateTime<Utc>) -> f64 {
        let order_rate = self.track.rate();
        let mut distance = f64::MAX;
        self.track
            .order()
            .transaction()
            .rates_between(new, old, |_, rate| {
                distance = distance.min(order_rate - rate);
            });

        if distance < f64::MAX {
            distance = format::floor_to(
                distance,
                self.track.order().transaction().order_decimal_place(),
            );
        }
        distance
    }

    /// Accumulated negative movement of the initial currency and positive
    /// movement of the first-leg final currency over the window.
    fn movement_window(
        &self,
        new: DateTime<Utc>,
        old: DateTime<Utc>,
        movements: &BalanceMovements,
    ) -> (f64, f64) {
        let initial_currency = self.track.order().initial_currency();
        let final_currency = self.track.order().first_final_currency();
        let mut initial_diff = 0.0;
        let mut final_diff = 0.0;

        movements.get(new, old, |_, amount, currency| {
            if currency == initial_currency && amount < 0.0 {
                initial_diff += amount;
            } else if currency == final_currency && amount > 0.0 {
                final_diff += amount;
            }
        });

        (initial_diff, final_diff)
    }

    fn same_as(&self, other: &TrackOrderEntry) -> bool {
        self.track.same_as(&other.track)
            && self.kind == other.kind
            && self.cancel == other.cancel
            && self.activated == other.activated
    }

    fn matches_filter(&self, filter: EachFilter) -> bool {
        match filter {
            EachFilter::All => true,
            EachFilter::Placeholder => self.is_placeholder(),
            EachFilter::ActivatedPlaceholder => self.is_activated_placeholder(),
            EachFilter::MatchedPlaceholder => self.is_matched_placeholder(),
            EachFilter::Matched => self.is_matched(),
            EachFilter::Cancelled => self.cancel_cause() == Some(RemoveCause::Cancel),
            EachFilter::Failed => self.cancel_cause() == Some(RemoveCause::Failed),
            EachFilter::TimedOut => self.cancel_cause() == Some(RemoveCause::Timeout),
        }
    }
}

impl fmt::Display for TrackOrderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            EntryKind::Placeholder => "[PlaceHolder Pending] ",
            EntryKind::ActivatedPlaceholder => "[PlaceHolder] ",
            EntryKind::MatchedPlaceholder => "[PlaceHolder Matched] ",
            EntryKind::Matched => "[Matched] ",
        };
        f.write_str(tag)?;
        match self.cancel_cause() {
            Some(RemoveCause::Failed) => f.write_str("[Failed] ")?,
            Some(RemoveCause::Cancel) => f.write_str("[Canceled] ")?,
            Some(RemoveCause::Timeout) => f.write_str("[Timeout] ")?,
            None => {}
        }
        write!(f, "{}", self.track)
    }
}

#[derive(Debug)]
enum TrackOrderAction {
    Process { track: TrackOrder, amount_total: f64 },
    Failed { track: TrackOrder },
    Timeout { track: TrackOrder },
}

#[derive(Debug)]
struct ListInner {
    list: Vec<TrackOrderEntry>,
    updated: bool,
    /// Timestamps of the two previous balance-before-order snapshots; the
    /// older one bounds the movement window of the current
    /// reconciliation.
    unsync: [DateTime<Utc>; 2],
}

impl Default for ListInner {
    fn default() -> Self {
        Self {
            list: Vec::new(),
            updated: false,
            unsync: [DateTime::<Utc>::MIN_UTC; 2],
        }
    }
}

/// The authoritative list of orders the engine believes exist, and the
/// reconciliation of that belief against each venue snapshot.
///
/// Reconciliation proceeds in phases: match-by-id, resolution of
/// vanished confirmed orders through fill-probability evidence,
/// weighted placeholder matching, then retention of the remaining
/// placeholders. Lifecycle actions are dispatched only after the list
/// scope is released.
pub struct TrackOrderList {
    events: Arc<EventManager>,
    clock: Arc<dyn EngineClock>,
    register_timeout: Duration,
    inner: RwLock<ListInner>,
    records: RwLock<SortedRingBuffer<OrderRecord>>,
    movements: BalanceMovements,
}

impl fmt::Debug for TrackOrderList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackOrderList")
            .field("register_timeout", &self.register_timeout)
            .field("len", &self.inner.read().list.len())
            .finish()
    }
}

impl TrackOrderList {
    pub fn new(
        events: Arc<EventManager>,
        clock: Arc<dyn EngineClock>,
        register_timeout: Duration,
    ) -> Self {
        Self {
            events,
            clock,
            register_timeout,
            inner: RwLock::new(ListInner::default()),
            records: RwLock::new(SortedRingBuffer::new(ORDER_RECORDS_CAPACITY)),
            movements: BalanceMovements::new(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.time()
    }

    /// Reset the list. With `keep_orders` the current backlog survives as
    /// activated placeholders so the next snapshot can re-match it after
    /// a restart.
    pub fn initialize(&self, keep_orders: bool) {
        let mut inner = self.inner.write();
        if keep_orders {
            for entry in inner.list.iter_mut() {
                entry.kind = EntryKind::ActivatedPlaceholder;
            }
        } else {
            inner.list.clear();
        }
    }

    pub fn balance_movements(&self) -> &BalanceMovements {
        &self.movements
    }

    /// Track the balance snapshot so movements can attribute fills.
    pub fn update_balance(&self, balance: &Balance) {
        self.movements.update(balance, self.now());
    }

    /// Insert a freshly-submitted order as a placeholder.
    pub fn add(&self, track: TrackOrder, message: &str) {
        self.add_record(RecordKind::Place, &track, message);
        let mut inner = self.inner.write();
        inner.list.push(TrackOrderEntry::new(track, true));
        inner.updated = true;
    }

    /// Mark an order for removal. It is dropped only once the venue
    /// confirms the disappearance (or the register deadline passes), so a
    /// false notification cannot lose a live order.
    pub fn remove(
        &self,
        cause: RemoveCause,
        id: &OrderId,
        message: &str,
        must_exist: bool,
    ) -> Result<bool, ExecutionError> {
        let record;
        {
            let mut inner = self.inner.write();
            let Some(entry) = inner.list.iter_mut().find(|entry| entry.track.id() == id) else {
                if must_exist {
                    return Err(ExecutionError::UnknownOrder { id: id.clone() });
                }
                return Ok(false);
            };

            let (kind, prefix) = match cause {
                RemoveCause::Failed => (RecordKind::Failed, "(Failed) "),
                RemoveCause::Cancel => (RecordKind::Cancel, "(Cancel) "),
                RemoveCause::Timeout => (RecordKind::Timeout, "(Timeout) "),
            };
            record = (kind, entry.track.clone(), format!("{prefix}{message}"));
            entry.set_cancel(self.now(), cause);
            inner.updated = true;
        }

        let (kind, track, message) = record;
        self.add_record(kind, &track, &message);
        Ok(true)
    }

    /// Activate a placeholder: the adapter call returned, the register
    /// deadline starts now.
    pub fn activate(&self, id: &OrderId, must_exist: bool) -> Result<bool, ExecutionError> {
        let mut inner = self.inner.write();
        let Some(entry) = inner.list.iter_mut().find(|entry| entry.track.id() == id) else {
            if must_exist {
                return Err(ExecutionError::UnknownOrder { id: id.clone() });
            }
            return Ok(false);
        };

        if entry.kind != EntryKind::Placeholder {
            debug!(%id, "activation skipped, entry is no longer a pending placeholder");
            return Ok(false);
        }
        entry.activate_placeholder(self.clock.time());
        inner.updated = true;
        Ok(true)
    }

    /// Assign the ids reported by the venue to a placeholder. One
    /// placeholder may yield several ids (split fills); each gets a copy
    /// of the order-scope events.
    pub fn match_ids(
        &self,
        id: &OrderId,
        new_ids: &[OrderId],
        must_exist: bool,
    ) -> Result<bool, ExecutionError> {
        let mut inner = self.inner.write();
        let Some(position) = inner.list.iter().position(|entry| entry.track.id() == id) else {
            if must_exist {
                return Err(ExecutionError::UnknownOrder { id: id.clone() });
            }
            return Ok(false);
        };

        if !inner.list[position].is_placeholder() {
            return Err(ExecutionError::NotPlaceholder { id: id.clone() });
        }
        let entry = inner.list.remove(position);

        for new_id in new_ids {
            if new_id == id {
                error!(%id, "venue reported the placeholder's own id, skipping");
                continue;
            }
            let mut new_entry = entry.clone();
            new_entry.track.set_id(new_id.clone());
            new_entry.match_placeholder(self.clock.time());
            self.events.copy_order(id, new_id, Lifetime::Order);
            inner.list.push(new_entry);
            inner.updated = true;
            info!(%id, %new_id, "order id matched with venue id");
        }
        Ok(true)
    }

    /// Visit the tracked orders matching `filter`.
    pub fn each<F>(&self, filter: EachFilter, mut callback: F)
    where
        F: FnMut(&TrackOrder),
    {
        let inner = self.inner.read();
        for entry in inner.list.iter() {
            if entry.matches_filter(filter) {
                callback(&entry.track);
            }
        }
    }

    pub fn count(&self, filter: EachFilter) -> usize {
        let inner = self.inner.read();
        inner
            .list
            .iter()
            .filter(|entry| entry.matches_filter(filter))
            .count()
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        let inner = self.inner.read();
        inner.list.iter().any(|entry| entry.track.id() == id)
    }

    /// `(initial currency, remaining amount)` of every tracked order,
    /// used to rebuild the balance reserve.
    pub fn active_amounts(&self) -> Vec<(Currency, f64)> {
        let inner = self.inner.read();
        inner
            .list
            .iter()
            .map(|entry| {
                (
                    entry.track.order().initial_currency(),
                    entry.track.amount(),
                )
            })
            .collect()
    }

    fn is_identical(&self, list: &[TrackOrder]) -> bool {
        let inner = self.inner.read();
        inner.list.len() == list.len()
            && inner
                .list
                .iter()
                .zip(list)
                .all(|(entry, track)| entry.track.same_as(track))
    }

    /// Reconcile the list against a fresh venue snapshot.
    ///
    /// `timestamp_balance_before_order` is the timestamp of the balance
    /// snapshot that preceded this order snapshot; movements between the
    /// previous such timestamp and now are the evidence window for
    /// vanished orders.
    ///
    /// Returns true when the list changed.
    pub fn update(
        &self,
        updated: Vec<TrackOrder>,
        timestamp_balance_before_order: DateTime<Utc>,
    ) -> bool {
        if self.is_identical(&updated) {
            let mut inner = self.inner.write();
            inner.unsync[1] = inner.unsync[0];
            inner.unsync[0] = timestamp_balance_before_order;
            return false;
        }

        let mut actions = Vec::new();
        let is_updated;
        {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            let was_updated = inner.updated;
            inner.updated = false;
            let last_present = inner.unsync[1];

            let mut original_list = std::mem::take(&mut inner.list);
            let snapshot = original_list.clone();
            let mut updated_list = updated;

            self.match_with_same_id(
                &mut inner.list,
                &mut original_list,
                &mut updated_list,
                &mut actions,
                last_present,
            );

            // Confirmed orders that vanished from the snapshot resolve
            // through the fill-probability evidence.
            let mut remaining = Vec::with_capacity(original_list.len());
            for mut entry in original_list {
                if entry.is_placeholder() {
                    remaining.push(entry);
                } else {
                    self.handle_vanished(&mut entry, &mut actions, last_present);
                }
            }
            let mut original_list = remaining;

            self.match_placeholders(&mut inner.list, &mut original_list, &mut updated_list);

            // Matched placeholders first: they are the most likely to have
            // completed and should claim balance movements first.
            original_list.sort_by_key(|entry| !entry.is_matched_placeholder());

            let now = self.now();
            for mut entry in original_list {
                let within_register_window = entry
                    .activated
                    .is_some_and(|activated| now - activated < self.register_delta());
                let keep = !entry.is_activated_placeholder()
                    || within_register_window
                    || (entry.is_cancelled()
                        && !entry.is_cancel_timeout(now, self.register_timeout));

                if keep {
                    inner.list.push(entry);
                } else {
                    let last_present = entry.track.creation_time();
                    self.handle_vanished(&mut entry, &mut actions, last_present);
                }
            }

            // Orders the venue reports but the engine never placed.
            if !updated_list.is_empty() {
                let labels = updated_list
                    .iter()
                    .map(TrackOrder::trace_id)
                    .join(", ");
                warn!(orders = %labels, "venue orders did not match any known orders");
                for track in updated_list {
                    inner.list.push(TrackOrderEntry::new(track, false));
                }
            }

            is_updated = was_updated
                || inner.list.len() != snapshot.len()
                || !inner
                    .list
                    .iter()
                    .zip(&snapshot)
                    .all(|(a, b)| a.same_as(b));

            inner.unsync[1] = inner.unsync[0];
            inner.unsync[0] = timestamp_balance_before_order;
        }

        self.apply_actions(actions);
        is_updated
    }

    fn register_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.register_timeout).unwrap_or_else(|_| TimeDelta::zero())
    }

    fn match_with_same_id(
        &self,
        merged: &mut Vec<TrackOrderEntry>,
        original: &mut Vec<TrackOrderEntry>,
        updated: &mut Vec<TrackOrder>,
        actions: &mut Vec<TrackOrderAction>,
        last_present: DateTime<Utc>,
    ) {
        let now = self.now();

        let mut original_index = 0;
        while original_index < original.len() {
            let mut matched = false;
            let mut updated_index = 0;
            while updated_index < updated.len() {
                if updated[updated_index].id() != original[original_index].track.id() {
                    updated_index += 1;
                    continue;
                }

                let candidate = updated.remove(updated_index);
                let entry = &mut original[original_index];

                // The cancel deadline passed yet the venue still reports
                // the order: the cancel evidently failed.
                if entry.is_cancelled() && entry.is_cancel_timeout(now, self.register_timeout) {
                    error!(
                        id = %entry.track.id(),
                        "order is marked as cancel but is still present, unset cancel flag"
                    );
                    entry.clear_cancel();
                }

                let initial_amount = entry.track.amount();
                let matching = self.match_entry(entry, &candidate);
                merged.push(matching);

                // The amount decrease since the last snapshot is credited
                // to the completion path.
                let completed = original[original_index].clone();
                self.handle_completed(&completed, initial_amount, actions, last_present);
                matched = true;
            }

            if matched {
                original.remove(original_index);
            } else {
                original_index += 1;
            }
        }
    }

    /// Build the matched entry and debit the original's remaining amount.
    fn match_entry(
        &self,
        entry: &mut TrackOrderEntry,
        candidate: &TrackOrder,
    ) -> TrackOrderEntry {
        let mut matching = entry.clone();

        if matching.track.id() != candidate.id() {
            info!(
                original = %matching.track.trace_id(),
                update = %candidate.trace_id(),
                "both ids refer to the same order"
            );
            self.events
                .copy_order(matching.track.id(), candidate.id(), Lifetime::Order);
        }
        matching.match_track(candidate);

        let remaining = entry.track.amount() - candidate.amount();
        if remaining < 0.0 {
            // Tolerate over-matches below the minimum trade size.
            if entry.track.order().is_valid(-remaining) {
                error!(
                    id = %entry.track.trace_id(),
                    overmatched = -remaining,
                    currency = %entry.track.order().initial_currency(),
                    "matched a higher amount than the order had, ignoring the excess"
                );
            }
            entry.track.set_amount(0.0);
        } else {
            entry.track.set_amount(remaining);
        }

        matching
    }

    fn match_placeholders(
        &self,
        merged: &mut Vec<TrackOrderEntry>,
        original: &mut Vec<TrackOrderEntry>,
        updated: &mut Vec<TrackOrder>,
    ) {
        if original.is_empty() || updated.is_empty() {
            return;
        }

        // Weight in [0, 1]: 1 for an exact match, 0 beyond the allowed
        // distance.
        let calculate_weight = |original: f64, updated: f64, distance_max: f64| -> f64 {
            let distance = (original - updated).abs();
            if !(distance < distance_max) {
                return 0.0;
            }
            1.0 - distance / distance_max
        };
        let millis = |timestamp: DateTime<Utc>| timestamp.timestamp_millis() as f64;

        let columns = updated.len();
        let mut matrix = vec![0.0f64; original.len() * columns];

        for (row, entry) in original.iter().enumerate() {
            let track = &entry.track;
            for (column, candidate) in updated.iter().enumerate() {
                let mut weight = 0.0;
                if track
                    .order()
                    .transaction()
                    .same_definition(candidate.order().transaction())
                {
                    weight +=
                        calculate_weight(track.rate(), candidate.rate(), track.rate() * 0.1);
                    if weight > 0.0 {
                        weight += calculate_weight(
                            millis(track.creation_time()),
                            millis(candidate.creation_time()),
                            (5 * 60 * 1000) as f64,
                        );
                        // Amounts only corroborate when the venue's is not
                        // meaningfully larger than ours.
                        if candidate.amount() <= track.amount() * 1.1 {
                            weight += calculate_weight(
                                track.amount(),
                                candidate.amount(),
                                track.amount(),
                            );
                        }
                    }
                }
                matrix[row * columns + column] = weight;
            }
        }

        loop {
            let Some(index) = matrix
                .iter()
                .position_max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            else {
                break;
            };
            let weight = matrix[index];
            if weight < MATCH_WEIGHT_FLOOR {
                break;
            }

            let row = index / columns;
            let column = index % columns;
            let candidate = &updated[column];
            let entry = &mut original[row];

            if entry.is_cancelled() {
                warn!(
                    original = %entry.track.trace_id(),
                    update = %candidate.trace_id(),
                    weight,
                    "expected to be canceled but matches a venue order"
                );
            } else {
                info!(
                    original = %entry.track.trace_id(),
                    update = %candidate.trace_id(),
                    weight,
                    "placeholder matches venue order"
                );
            }

            let matching = self.match_entry(entry, candidate);
            merged.push(matching);

            // Consume the column so no other placeholder claims this row;
            // near-winners are worth a warning.
            for other_row in 0..original.len() {
                let other_weight = matrix[other_row * columns + column];
                if other_row != row && other_weight > weight * 0.5 {
                    warn!(
                        other = %original[other_row].track.trace_id(),
                        update = %updated[column].trace_id(),
                        other_weight,
                        weight,
                        "another placeholder could also have matched, weight slightly lower"
                    );
                }
                matrix[other_row * columns + column] = -1.0;
            }
        }

        original.retain(|entry| !entry.is_amount_neglectable());

        let consumed: Vec<bool> = (0..columns).map(|column| matrix[column] < 0.0).collect();
        let mut column = 0;
        updated.retain(|_| {
            let drop = consumed[column];
            column += 1;
            !drop
        });
    }

    /// Decide the fate of an order that vanished from the snapshot
    /// without being matched: processed, failed or cancelled, from rate
    /// and balance-movement evidence.
    fn handle_vanished(
        &self,
        entry: &mut TrackOrderEntry,
        actions: &mut Vec<TrackOrderAction>,
        last_present: DateTime<Utc>,
    ) {
        let now = self.now();
        let distance = entry.min_distance(now, last_present);
        let (initial_diff, final_diff) = entry.movement_window(now, last_present, &self.movements);

        // Weight in [0, 1] of how close `value` got to `target` starting
        // from `floor`.
        let calculate_weight = |value: f64, target: f64, floor: f64| -> f64 {
            let weight = (value - floor) / (target - floor);
            if weight.is_nan() { 0.0 } else { weight.clamp(0.0, 1.0) }
        };

        let amount = entry.track.amount();
        let probability = match entry.track.kind() {
            OrderKind::Market | OrderKind::Limit => {
                let rate_window = entry.track.rate() * 0.02;
                let expected_final = entry.track.order().first_final_amount(amount, true);
                (calculate_weight(-distance, 0.0, -rate_window)
                    + calculate_weight(-initial_diff, amount, 0.0)
                    + calculate_weight(final_diff, expected_final, 0.0))
                    / 3.0
            }
            OrderKind::Withdraw => calculate_weight(-initial_diff, amount, 0.0),
        };

        info!(
            id = %entry.track.trace_id(),
            probability_percent = probability * 100.0,
            cancelled = entry.is_cancelled(),
            %last_present,
            distance,
            initial_movement = initial_diff,
            final_movement = final_diff,
            "order vanished from snapshot"
        );

        if entry.is_cancelled() && probability > 0.8 {
            warn!(
                id = %entry.track.trace_id(),
                probability_percent = probability * 100.0,
                "expected to be canceled but shows high probability to be processed, set as proceed"
            );
            entry.clear_cancel();
        } else if !entry.is_cancelled() && probability < 0.2 {
            if entry.is_placeholder() {
                let message = format!(
                    "high probability ({:.0}%) to have been canceled, set as failed",
                    (1.0 - probability) * 100.0
                );
                self.add_record(RecordKind::Failed, &entry.track, &message);
                entry.set_cancel(now, RemoveCause::Failed);
                warn!(id = %entry.track.trace_id(), %message, "vanished placeholder");
            } else {
                let message = format!(
                    "high probability ({:.0}%) to have been canceled, set as cancel",
                    (1.0 - probability) * 100.0
                );
                self.add_record(RecordKind::Cancel, &entry.track, &message);
                entry.set_cancel(now, RemoveCause::Cancel);
                warn!(id = %entry.track.trace_id(), %message, "vanished order");
            }
        }

        match entry.cancel_cause() {
            Some(RemoveCause::Failed) => actions.push(TrackOrderAction::Failed {
                track: entry.track.clone(),
            }),
            Some(RemoveCause::Timeout) => actions.push(TrackOrderAction::Timeout {
                track: entry.track.clone(),
            }),
            Some(RemoveCause::Cancel) => {}
            None => {
                let amount = entry.track.amount();
                self.handle_completed(entry, amount, actions, last_present);
            }
        }
    }

    /// Credit a completed (or partially completed) amount: estimate the
    /// effective fee, consume the matching balance movements so no other
    /// order claims them, and emit the PROCESS action.
    fn handle_completed(
        &self,
        entry: &TrackOrderEntry,
        amount_total: f64,
        actions: &mut Vec<TrackOrderAction>,
        last_present: DateTime<Utc>,
    ) {
        let track = &entry.track;
        let amount = track.amount();

        if amount < 0.0 {
            error!(
                id = %track.trace_id(),
                amount,
                "negative amount, the order list is inconsistent"
            );
            return;
        }
        if entry.is_amount_neglectable() {
            return;
        }

        let now = self.now();
        let final_amount = track.order().first_final_amount(amount, true);

        // When the window's movements are explained by this order alone,
        // derive the effective fee the venue charged.
        {
            let (initial_diff, final_diff) =
                entry.movement_window(now, last_present, &self.movements);
            if (amount - (-initial_diff)).abs() < amount * 0.05
                && (final_amount - final_diff).abs() < final_amount * 0.05
            {
                let actual_no_fee = -initial_diff * track.rate();
                let fee_percent =
                    format::round_to((actual_no_fee - final_diff) / actual_no_fee * 100.0, 2);
                if (0.0..0.5).contains(&fee_percent) {
                    info!(
                        id = %track.trace_id(),
                        fee_percent,
                        "estimated effective fee"
                    );
                }
            }
        }

        let not_consumed_initial = self.movements.consume(
            last_present,
            -amount,
            track.order().initial_currency(),
        );
        let not_consumed_final = match track.kind() {
            OrderKind::Market | OrderKind::Limit => self.movements.consume(
                last_present,
                final_amount,
                track.order().first_final_currency(),
            ),
            OrderKind::Withdraw => 0.0,
        };

        if not_consumed_initial < -amount * 0.01 || not_consumed_final > final_amount * 0.01 {
            warn!(
                id = %track.trace_id(),
                missing_initial = -not_consumed_initial,
                missing_final = not_consumed_final,
                "processed but the full amount movement is not detected"
            );
        }

        actions.push(TrackOrderAction::Process {
            track: track.clone(),
            amount_total,
        });
    }

    /// Apply the collected actions outside the list scope, in order.
    fn apply_actions(&self, actions: Vec<TrackOrderAction>) {
        for action in actions {
            match action {
                TrackOrderAction::Process {
                    track,
                    amount_total,
                } => {
                    let amount = track.amount();
                    let order = track.order();

                    let (message, trigger) = if order.first_valid(amount / 2.0) {
                        let mut message =
                            format!("Processed {amount} {}", order.initial_currency());
                        if !order.first_final_currency().is_none() {
                            message += &format!(
                                " -> {} {}",
                                order.first_final_amount(amount, true),
                                order.first_final_currency()
                            );
                        }
                        info!(
                            id = %track.trace_id(),
                            amount,
                            partially = amount < amount_total,
                            "order completed"
                        );
                        (message, true)
                    } else {
                        let message = format!(
                            "Ignoring amount ({amount} {}) processed, too small",
                            order.initial_currency()
                        );
                        warn!(id = %track.trace_id(), %message, "completion below minimum");
                        (message, false)
                    };

                    self.add_record(
                        if amount < amount_total {
                            RecordKind::Partial
                        } else {
                            RecordKind::Proceed
                        },
                        &track,
                        &message,
                    );

                    if trigger {
                        self.events.trigger_on_order_complete(&track, amount);
                    }
                }
                TrackOrderAction::Failed { track } => {
                    self.events.trigger_on_order_error(&track);
                }
                TrackOrderAction::Timeout { track } => {
                    self.events.trigger_on_order_timeout(&track);
                }
            }
        }
    }

    /// Compute the reserve needed by active chained orders and pin down
    /// just-credited intermediate amounts so a concurrent strategy cannot
    /// re-spend them.
    pub fn reserve_balance(&self, balance: &Balance) {
        let mut reserve_max: IndexMap<Currency, f64> = IndexMap::new();
        {
            let inner = self.inner.read();
            for entry in inner.list.iter() {
                let order = entry.track.order();
                if order.next().is_none() {
                    continue;
                }
                let final_amount = order.first_final_amount(entry.track.amount(), true);
                *reserve_max
                    .entry(order.first_final_currency())
                    .or_insert(0.0) += final_amount;
            }
        }

        let now = self.now();
        let window_start = now - self.register_delta() * 2;
        self.movements.get(now, window_start, |_, amount, currency| {
            let Some(max_amount) = reserve_max.get_mut(&currency) else {
                return;
            };
            let available = balance.get(currency);
            if amount > 0.0 && *max_amount > 0.0 && available > 0.0 {
                let reserve = amount.min(available.min(*max_amount));
                *max_amount -= reserve;
                balance.reserve(currency, reserve);
            }
        });
    }

    /// Cancel every confirmed order whose own timeout expired at
    /// `timestamp` (server time). The venue call happens outside the list
    /// scope; a failed cancel is retried on the next cycle.
    pub fn cancel_timeouts<F>(&self, timestamp: DateTime<Utc>, cancel_order: F) -> bool
    where
        F: Fn(&TrackOrder) -> bool,
    {
        let candidates: Vec<TrackOrder> = {
            let inner = self.inner.read();
            inner
                .list
                .iter()
                .filter(|entry| {
                    !entry.is_cancelled()
                        && !entry.is_placeholder()
                        && entry.track.is_timeout(timestamp)
                })
                .map(|entry| entry.track.clone())
                .collect()
        };

        let mut any = false;
        for track in candidates {
            info!(order = %track, %timestamp, "timeout for order");
            let message = format!("Timeout expired ({}s)", track.order().timeout().as_secs());
            if self
                .remove(RemoveCause::Timeout, track.id(), &message, false)
                .unwrap_or(false)
            {
                cancel_order(&track);
                any = true;
            }
        }
        any
    }

    fn add_record(&self, kind: RecordKind, track: &TrackOrder, message: &str) {
        let (context_id, strategy_id) = match track.context() {
            Some(context) => (Some(context.id()), context.strategy_id().clone()),
            None => (None, StrategyId::unknown()),
        };
        self.records.write().push(
            self.now(),
            OrderRecord {
                kind,
                id: track.id().clone(),
                order_kind: track.kind(),
                initial: track.order().initial_currency(),
                final_currency: track.order().first_final_currency(),
                amount: track.amount(),
                rate: track.rate(),
                context_id,
                strategy_id,
                message: message.to_owned(),
            },
        );
    }

    /// Read the latest `limit` order records, oldest of them first.
    pub fn records<F>(&self, limit: usize, callback: F)
    where
        F: FnMut(DateTime<Utc>, &OrderRecord),
    {
        self.records.read().read_latest(limit, callback);
    }
}

impl fmt::Display for TrackOrderList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        writeln!(f, "Active order(s): {}", inner.list.len())?;
        for entry in inner.list.iter() {
            writeln!(f, "  {entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Order;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use vostro_instrument::transaction::Transaction;

    const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);

    #[derive(Debug)]
    struct TestClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl TestClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(DateTime::UNIX_EPOCH + TimeDelta::days(1)),
            })
        }

        fn advance(&self, duration: Duration) {
            let mut now = self.now.lock();
            *now += TimeDelta::from_std(duration).unwrap();
        }
    }

    impl EngineClock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }

    struct Fixture {
        events: Arc<EventManager>,
        clock: Arc<TestClock>,
        list: TrackOrderList,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(EventManager::new());
        let clock = TestClock::new();
        let list = TrackOrderList::new(
            Arc::clone(&events),
            Arc::clone(&clock) as Arc<dyn EngineClock>,
            REGISTER_TIMEOUT,
        );
        Fixture { events, clock, list }
    }

    fn usd_eur(fixture: &Fixture, rate: f64) -> Arc<Transaction> {
        let transaction = Transaction::pair(Currency::Usd, Currency::Eur);
        transaction.set_rate(rate, fixture.clock.time()).unwrap();
        Arc::new(transaction)
    }

    fn eur_btc(fixture: &Fixture, rate: f64) -> Arc<Transaction> {
        let transaction = Transaction::pair(Currency::Eur, Currency::Btc);
        transaction.set_rate(rate, fixture.clock.time()).unwrap();
        Arc::new(transaction)
    }

    fn placeholder(
        fixture: &Fixture,
        transaction: &Arc<Transaction>,
        rate: f64,
        amount: f64,
    ) -> TrackOrder {
        TrackOrder::new(
            OrderId::unique(),
            Order::with_rate(Arc::clone(transaction), rate),
            amount,
            fixture.clock.time(),
        )
    }

    fn venue_row(
        fixture: &Fixture,
        id: &str,
        transaction: &Arc<Transaction>,
        rate: f64,
        amount: f64,
    ) -> TrackOrder {
        TrackOrder::from_transaction(
            OrderId::from(id),
            Arc::clone(transaction),
            rate,
            amount,
            fixture.clock.time(),
        )
    }

    fn balance(entries: &[(Currency, f64)]) -> Balance {
        let balance = Balance::new();
        for (currency, amount) in entries {
            balance.set(*currency, *amount);
        }
        balance
    }

    fn monitor_complete(fixture: &Fixture, id: &OrderId) -> Arc<Mutex<Vec<f64>>> {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let clone = Arc::clone(&sink);
        fixture.events.on_order_complete(
            "monitorComplete",
            None,
            id,
            Arc::new(move |_, _, amount| clone.lock().push(amount)),
            Lifetime::Order,
        );
        sink
    }

    fn monitor_error(fixture: &Fixture, id: &OrderId) -> Arc<Mutex<usize>> {
        let sink = Arc::new(Mutex::new(0));
        let clone = Arc::clone(&sink);
        fixture.events.on_order_error(
            "monitorError",
            None,
            id,
            Arc::new(move |_, _| *clone.lock() += 1),
            Lifetime::Order,
        );
        sink
    }

    fn monitor_timeout(fixture: &Fixture, id: &OrderId) -> Arc<Mutex<usize>> {
        let sink = Arc::new(Mutex::new(0));
        let clone = Arc::clone(&sink);
        fixture.events.on_order_timeout(
            "monitorTimeout",
            None,
            id,
            Arc::new(move |_, _| *clone.lock() += 1),
            Lifetime::Order,
        );
        sink
    }

    #[test]
    fn test_add_inserts_placeholder() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);

        fixture
            .list
            .add(placeholder(&fixture, &transaction, 0.5, 10.0), "");

        assert_eq!(fixture.list.count(EachFilter::All), 1);
        assert_eq!(fixture.list.count(EachFilter::Placeholder), 1);
        assert_eq!(fixture.list.count(EachFilter::Matched), 0);
    }

    #[test]
    fn test_remove_marks_entry_without_dropping_it() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let track = placeholder(&fixture, &transaction, 0.5, 10.0);
        let id = track.id().clone();

        fixture.list.add(track, "");
        fixture
            .list
            .remove(RemoveCause::Failed, &id, "test failed", true)
            .unwrap();

        assert_eq!(fixture.list.count(EachFilter::All), 1);
        assert_eq!(fixture.list.count(EachFilter::Failed), 1);
        assert_eq!(fixture.list.count(EachFilter::Cancelled), 0);
    }

    #[test]
    fn test_remove_unknown_order() {
        let fixture = fixture();
        let id = OrderId::from("missing");

        assert!(
            fixture
                .list
                .remove(RemoveCause::Cancel, &id, "", true)
                .is_err()
        );
        assert_eq!(
            fixture.list.remove(RemoveCause::Cancel, &id, "", false),
            Ok(false)
        );
    }

    #[test]
    fn test_placeholder_matches_venue_row_without_events() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let track = placeholder(&fixture, &transaction, 0.5, 100.0);
        let completes = monitor_complete(&fixture, track.id());

        fixture.list.add(track, "");
        fixture.list.update(
            vec![venue_row(&fixture, "X", &transaction, 0.5, 100.0)],
            fixture.clock.time(),
        );

        assert_eq!(fixture.list.count(EachFilter::All), 1);
        assert_eq!(fixture.list.count(EachFilter::Matched), 1);
        assert!(fixture.list.contains(&OrderId::from("X")));
        assert!(completes.lock().is_empty());
    }

    #[test]
    fn test_partial_then_full_completion() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let venue_id = OrderId::from("X");
        let completes = monitor_complete(&fixture, &venue_id);

        fixture
            .list
            .update_balance(&balance(&[(Currency::Usd, 100.0), (Currency::Eur, 0.0)]));

        // The venue confirms the full order.
        fixture.list.update(
            vec![venue_row(&fixture, "X", &transaction, 0.5, 100.0)],
            fixture.clock.time(),
        );
        assert_eq!(fixture.list.count(EachFilter::Matched), 1);
        assert!(completes.lock().is_empty());

        // 70 filled: the venue now reports 30 remaining.
        fixture.clock.advance(Duration::from_secs(1));
        fixture.list.update(
            vec![venue_row(&fixture, "X", &transaction, 0.5, 30.0)],
            fixture.clock.time(),
        );
        assert_eq!(fixture.list.count(EachFilter::Matched), 1);
        assert_eq!(*completes.lock(), vec![70.0]);

        // The remainder fills and the order vanishes; balance movements
        // corroborate.
        fixture.clock.advance(Duration::from_secs(1));
        fixture
            .list
            .update_balance(&balance(&[(Currency::Usd, 0.0), (Currency::Eur, 50.0)]));
        fixture.list.update(vec![], fixture.clock.time());

        assert_eq!(fixture.list.count(EachFilter::All), 0);
        assert_eq!(*completes.lock(), vec![70.0, 30.0]);
    }

    #[test]
    fn test_vanished_order_without_evidence_is_cancelled_silently() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let venue_id = OrderId::from("X");
        let completes = monitor_complete(&fixture, &venue_id);

        // Limit order above the market: no fill evidence will exist.
        fixture.list.update(
            vec![venue_row(&fixture, "X", &transaction, 0.6, 100.0)],
            fixture.clock.time(),
        );
        fixture.clock.advance(Duration::from_secs(5));
        fixture.list.update(vec![], fixture.clock.time());

        assert_eq!(fixture.list.count(EachFilter::All), 0);
        assert!(completes.lock().is_empty());
    }

    #[test]
    fn test_failed_placeholder_lifecycle() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let track = placeholder(&fixture, &transaction, 0.5, 10.0);
        let id = track.id().clone();
        let errors = monitor_error(&fixture, &id);

        fixture.list.add(track, "");
        fixture
            .list
            .remove(RemoveCause::Failed, &id, "placement failed", true)
            .unwrap();
        fixture.list.update(vec![], fixture.clock.time());

        // Not yet activated: the entry survives indefinitely.
        assert_eq!(*errors.lock(), 0);
        assert_eq!(fixture.list.count(EachFilter::Failed), 1);

        fixture.clock.advance(REGISTER_TIMEOUT * 2);
        fixture.list.update(vec![], fixture.clock.time());
        assert_eq!(*errors.lock(), 0);
        assert_eq!(fixture.list.count(EachFilter::Failed), 1);

        // Activation arms the register deadline.
        fixture.list.activate(&id, true).unwrap();
        fixture.list.update(vec![], fixture.clock.time());
        assert_eq!(*errors.lock(), 0);
        assert_eq!(fixture.list.count(EachFilter::ActivatedPlaceholder), 1);

        fixture.clock.advance(REGISTER_TIMEOUT / 2);
        fixture.list.update(vec![], fixture.clock.time());
        assert_eq!(*errors.lock(), 0);
        assert_eq!(fixture.list.count(EachFilter::All), 1);

        // Past the deadline with no fill evidence: the failure fires.
        fixture.clock.advance(REGISTER_TIMEOUT * 2);
        fixture.list.update(vec![], fixture.clock.time());
        assert_eq!(*errors.lock(), 1);
        assert_eq!(fixture.list.count(EachFilter::All), 0);
    }

    #[test]
    fn test_failed_placeholder_rescued_by_match() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let track = placeholder(&fixture, &transaction, 0.5, 10.0);
        let id = track.id().clone();
        let errors = monitor_error(&fixture, &id);

        fixture.list.add(track, "");
        fixture
            .list
            .remove(RemoveCause::Failed, &id, "placement failed", true)
            .unwrap();
        fixture.list.update(vec![], fixture.clock.time());
        assert_eq!(fixture.list.count(EachFilter::Failed), 1);

        // The venue reports the order after all: the failure mark clears.
        fixture.list.update(
            vec![venue_row(&fixture, "X", &transaction, 0.5, 10.0)],
            fixture.clock.time(),
        );
        assert_eq!(fixture.list.count(EachFilter::Matched), 1);
        assert_eq!(fixture.list.count(EachFilter::Failed), 0);

        fixture.clock.advance(REGISTER_TIMEOUT * 2);
        fixture.list.update(
            vec![venue_row(&fixture, "X", &transaction, 0.5, 10.0)],
            fixture.clock.time(),
        );
        assert_eq!(*errors.lock(), 0);
    }

    #[test]
    fn test_vanished_activated_placeholder_with_movements_is_processed() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let track = placeholder(&fixture, &transaction, 0.5, 100.0);
        let id = track.id().clone();
        let completes = monitor_complete(&fixture, &id);

        fixture
            .list
            .update_balance(&balance(&[(Currency::Usd, 100.0), (Currency::Eur, 0.0)]));
        fixture.list.add(track, "");
        fixture.list.activate(&id, true).unwrap();

        // The order never registered under a known id, but the balance
        // moved exactly as a fill would move it.
        fixture.clock.advance(Duration::from_secs(5));
        fixture
            .list
            .update_balance(&balance(&[(Currency::Usd, 0.0), (Currency::Eur, 50.0)]));

        fixture.clock.advance(REGISTER_TIMEOUT * 2);
        fixture.list.update(vec![], fixture.clock.time());

        assert_eq!(*completes.lock(), vec![100.0]);
        assert_eq!(fixture.list.count(EachFilter::All), 0);
    }

    #[test]
    fn test_double_apply_same_snapshot_is_idempotent() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let venue_id = OrderId::from("X");
        let completes = monitor_complete(&fixture, &venue_id);

        let changed = fixture.list.update(
            vec![venue_row(&fixture, "X", &transaction, 0.5, 100.0)],
            fixture.clock.time(),
        );
        assert!(changed);

        let row = {
            let mut rows = Vec::new();
            fixture.list.each(EachFilter::All, |track| rows.push(track.clone()));
            rows
        };
        let changed = fixture.list.update(row, fixture.clock.time());

        assert!(!changed);
        assert_eq!(fixture.list.count(EachFilter::Matched), 1);
        assert!(completes.lock().is_empty());
    }

    #[test]
    fn test_match_ids_fans_out_and_copies_events() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let track = placeholder(&fixture, &transaction, 0.5, 100.0);
        let id = track.id().clone();
        let completes = monitor_complete(&fixture, &id);

        fixture.list.add(track, "");
        fixture
            .list
            .match_ids(&id, &[OrderId::from("A"), OrderId::from("B")], true)
            .unwrap();

        // The original id is gone; the venue ids carry the entry on.
        assert!(!fixture.list.contains(&id));
        assert_eq!(fixture.list.count(EachFilter::MatchedPlaceholder), 2);
        assert_eq!(fixture.list.activate(&id, false), Ok(false));

        // Each venue id reports less than the duplicated local amount;
        // the decreases are credited as fills through the monitor that
        // was registered on the placeholder id.
        fixture.clock.advance(Duration::from_secs(1));
        fixture.list.update(
            vec![
                venue_row(&fixture, "A", &transaction, 0.5, 60.0),
                venue_row(&fixture, "B", &transaction, 0.5, 40.0),
            ],
            fixture.clock.time(),
        );

        assert_eq!(fixture.list.count(EachFilter::Matched), 2);
        let fired = completes.lock();
        assert_eq!(fired.len(), 2);
        assert!(fired.contains(&40.0));
        assert!(fired.contains(&60.0));
    }

    #[test]
    fn test_unknown_venue_order_is_adopted() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);

        fixture.list.update(
            vec![venue_row(&fixture, "ghost", &transaction, 0.5, 10.0)],
            fixture.clock.time(),
        );

        assert_eq!(fixture.list.count(EachFilter::Matched), 1);
        assert!(fixture.list.contains(&OrderId::from("ghost")));
    }

    #[test]
    fn test_cancel_timeouts_cancels_expired_confirmed_orders() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        let venue_id = OrderId::from("X");
        let timeouts = monitor_timeout(&fixture, &venue_id);

        let mut row = venue_row(&fixture, "X", &transaction, 0.5, 100.0);
        row.order_mut().set_timeout(Duration::from_secs(60));
        fixture.list.update(vec![row], fixture.clock.time());

        // Not yet expired.
        let cancelled = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&cancelled);
        assert!(!fixture.list.cancel_timeouts(fixture.clock.time(), |_| {
            *counter.lock() += 1;
            true
        }));

        fixture.clock.advance(Duration::from_secs(70));
        let counter = Arc::clone(&cancelled);
        assert!(fixture.list.cancel_timeouts(fixture.clock.time(), |_| {
            *counter.lock() += 1;
            true
        }));
        assert_eq!(*cancelled.lock(), 1);
        assert_eq!(fixture.list.count(EachFilter::TimedOut), 1);

        // The next snapshot confirms the disappearance and the timeout
        // event fires.
        fixture.list.update(vec![], fixture.clock.time());
        assert_eq!(*timeouts.lock(), 1);
        assert_eq!(fixture.list.count(EachFilter::All), 0);
    }

    #[test]
    fn test_reserve_balance_pins_fresh_chain_intermediates() {
        let fixture = fixture();
        let usd_eur = usd_eur(&fixture, 0.5);
        let eur_btc = eur_btc(&fixture, 0.0001);

        let mut order = Order::with_rate(Arc::clone(&usd_eur), 0.5);
        order.push_next(Order::new(Arc::clone(&eur_btc)));
        fixture.list.add(
            TrackOrder::new(OrderId::unique(), order, 100.0, fixture.clock.time()),
            "",
        );

        // 50 EUR just arrived: the chain continuation must keep it.
        fixture.list.update_balance(&balance(&[(Currency::Eur, 0.0)]));
        fixture.clock.advance(Duration::from_secs(1));
        fixture.list.update_balance(&balance(&[(Currency::Eur, 50.0)]));

        let live = balance(&[(Currency::Eur, 50.0)]);
        fixture.list.reserve_balance(&live);

        assert_eq!(live.get(Currency::Eur), 0.0);
        assert_eq!(live.get_with_reserve(Currency::Eur), 50.0);
    }

    #[test]
    fn test_records_ring() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        fixture
            .list
            .add(placeholder(&fixture, &transaction, 0.5, 10.0), "placed by test");

        let mut records = Vec::new();
        fixture.list.records(20, |_, record| records.push(record.clone()));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, RecordKind::Place);
        assert_eq!(records[0].initial, Currency::Usd);
        assert_eq!(records[0].message, "placed by test");
    }

    #[test]
    fn test_initialize_keep_orders_demotes_to_activated_placeholders() {
        let fixture = fixture();
        let transaction = usd_eur(&fixture, 0.5);
        fixture.list.update(
            vec![venue_row(&fixture, "X", &transaction, 0.5, 100.0)],
            fixture.clock.time(),
        );
        assert_eq!(fixture.list.count(EachFilter::Matched), 1);

        fixture.list.initialize(true);
        assert_eq!(fixture.list.count(EachFilter::Matched), 0);
        assert_eq!(fixture.list.count(EachFilter::ActivatedPlaceholder), 1);

        fixture.list.initialize(false);
        assert_eq!(fixture.list.count(EachFilter::All), 0);
    }
}
