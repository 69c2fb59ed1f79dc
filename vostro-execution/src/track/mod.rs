use crate::{
    id::OrderId,
    operation::ContextHandle,
    order::{Order, approx_eq},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use std::fmt::{self, Formatter};
use std::sync::Arc;
use tracing::error;

pub mod list;

/// Kind of a tracked order, derived from its transaction and rate.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display)]
pub enum OrderKind {
    Limit,
    Market,
    Withdraw,
}

/// An order the engine believes exists (or is about to exist) on the
/// venue.
///
/// On construction the rate is frozen to the maximum of the specified
/// rate and the transaction's live rate; reconciliation distances are
/// computed against this frozen rate.
#[derive(Debug, Clone)]
pub struct TrackOrder {
    id: OrderId,
    order: Order,
    kind: OrderKind,
    amount: f64,
    creation_time: DateTime<Utc>,
    context: Option<ContextHandle>,
}

impl TrackOrder {
    pub fn new(id: OrderId, order: Order, amount: f64, creation_time: DateTime<Utc>) -> Self {
        let kind = Self::identify_kind(&order);
        let mut order = order;
        // Freeze to the most profitable of the two rates.
        order.set_rate(order.rate().max(order.transaction().rate()));
        Self {
            id,
            order,
            kind,
            amount,
            creation_time,
            context: None,
        }
    }

    pub fn from_transaction(
        id: OrderId,
        transaction: Arc<vostro_instrument::transaction::Transaction>,
        rate: f64,
        amount: f64,
        creation_time: DateTime<Utc>,
    ) -> Self {
        Self::new(id, Order::with_rate(transaction, rate), amount, creation_time)
    }

    pub fn identify_kind(order: &Order) -> OrderKind {
        if order.transaction().is_withdraw() {
            OrderKind::Withdraw
        } else if order.is_fixed_rate() {
            OrderKind::Limit
        } else {
            OrderKind::Market
        }
    }

    pub fn id(&self) -> &OrderId {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: OrderId) {
        self.id = id;
    }

    /// Short tag for traces, eg/ `Limit#auto-7`.
    pub fn trace_id(&self) -> String {
        format!("{}#{}", self.kind, self.id)
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn order_mut(&mut self) -> &mut Order {
        &mut self.order
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn set_amount(&mut self, amount: f64) {
        self.amount = amount;
    }

    pub fn rate(&self) -> f64 {
        self.order.rate()
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn set_creation_time(&mut self, creation_time: DateTime<Utc>) {
        self.creation_time = creation_time;
    }

    pub fn context(&self) -> Option<&ContextHandle> {
        self.context.as_ref()
    }

    /// Attach the operation context. At most one context per order.
    pub fn set_context(&mut self, context: ContextHandle) {
        if self.context.is_some() {
            error!(id = %self.id, "a context is already attached to this order, replacing");
        }
        self.context = Some(context);
    }

    /// Whether the order's own timeout has expired at `current`.
    pub fn is_timeout(&self, current: DateTime<Utc>) -> bool {
        match chrono::TimeDelta::from_std(self.order.timeout()) {
            Ok(timeout) => current > self.creation_time + timeout,
            Err(_) => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.order.first_valid(self.amount)
    }

    /// Field-wise equality used to detect unchanged snapshots.
    pub fn same_as(&self, other: &TrackOrder) -> bool {
        self.id == other.id
            && approx_eq(self.amount, other.amount)
            && self.creation_time == other.creation_time
            && self.kind == other.kind
            && self.order.same_definition(&other.order)
    }
}

impl fmt::Display for TrackOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (type={}, amount={}, rate={}, timeout={}s",
            self.id,
            self.order.transaction(),
            self.kind,
            self.amount,
            self.order.rate(),
            self.order.timeout().as_secs(),
        )?;
        match &self.context {
            Some(context) => write!(f, ", context={}", context.id())?,
            None => write!(f, ", context=<none>")?,
        }
        write!(f, ", creationTime={})", self.creation_time)?;
        if let Some(next) = self.order.next() {
            write!(f, " -> {next}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use vostro_instrument::{currency::Currency, transaction::Transaction};

    fn transaction(rate: f64) -> Arc<Transaction> {
        let transaction = Transaction::pair(Currency::Usd, Currency::Eur);
        transaction.set_rate(rate, Utc::now()).unwrap();
        Arc::new(transaction)
    }

    #[test]
    fn test_kind_identification() {
        let market = Order::new(transaction(0.5));
        assert_eq!(TrackOrder::identify_kind(&market), OrderKind::Market);

        let limit = Order::with_rate(transaction(0.5), 0.6);
        assert_eq!(TrackOrder::identify_kind(&limit), OrderKind::Limit);

        let withdraw = Order::new(Arc::new(Transaction::withdraw(Currency::Btc)));
        assert_eq!(TrackOrder::identify_kind(&withdraw), OrderKind::Withdraw);
    }

    #[test]
    fn test_rate_frozen_to_max_of_specified_and_live() {
        let track = TrackOrder::new(
            OrderId::unique(),
            Order::with_rate(transaction(0.6), 0.5),
            10.0,
            Utc::now(),
        );
        assert_eq!(track.rate(), 0.6);

        let track = TrackOrder::new(
            OrderId::unique(),
            Order::with_rate(transaction(0.4), 0.5),
            10.0,
            Utc::now(),
        );
        assert_eq!(track.rate(), 0.5);
    }

    #[test]
    fn test_market_kind_survives_rate_freeze() {
        // The freeze fixes the rate, but the kind was identified first.
        let track = TrackOrder::new(OrderId::unique(), Order::new(transaction(0.5)), 10.0, Utc::now());
        assert_eq!(track.kind(), OrderKind::Market);
        assert_eq!(track.rate(), 0.5);
    }

    #[test]
    fn test_is_timeout() {
        let now = Utc::now();
        let order = Order::new(transaction(0.5)).with_timeout(Duration::from_secs(60));
        let track = TrackOrder::new(OrderId::unique(), order, 10.0, now);

        assert!(!track.is_timeout(now + chrono::TimeDelta::seconds(59)));
        assert!(track.is_timeout(now + chrono::TimeDelta::seconds(61)));
    }
}
