//! End-to-end scenarios against the scripted mock venue: placement,
//! reconciliation, chaining, failure and timeout paths.

use chrono::Utc;
use std::{
    sync::{Arc, mpsc},
    time::{Duration, Instant},
};
use vostro::{
    config::ExchangeConfig,
    exchange::{Exchange, ExchangeStatus},
    mock::{MockExchange, MockOpenOrder},
};
use vostro_execution::{
    adapter::ExchangeAdapter,
    event::Lifetime,
    id::{OrderId, StrategyId},
    operation::{FailureCause, Operation},
    order::Order,
    track::list::EachFilter,
};
use vostro_instrument::currency::Currency;
use vostro_integration::pool::JobPool;

fn config(tag: &str) -> ExchangeConfig {
    ExchangeConfig {
        output_directory: std::env::temp_dir().join(format!(
            "vostro-engine-{tag}-{}",
            std::process::id()
        )),
        rates_recording: false,
        rates_polling_period_ms: 20,
        order_polling_period_ms: 25,
        properties_polling_period_ms: 100,
        order_register_timeout_ms: 400,
        ..ExchangeConfig::default()
    }
}

fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn usd_eur_mock() -> Arc<MockExchange> {
    let mock = MockExchange::new();
    mock.add_pair(Currency::Usd, Currency::Eur, 0.8);
    mock.add_pair(Currency::Eur, Currency::Usd, 1.2);
    mock.set_balance(&[(Currency::Usd, 100.0)]);
    mock
}

fn connected_exchange(mock: &Arc<MockExchange>, tag: &str) -> Arc<Exchange> {
    let adapter: Arc<dyn ExchangeAdapter> = Arc::clone(mock) as Arc<dyn ExchangeAdapter>;
    let jobs = Arc::new(JobPool::new("test-jobs", 4));
    let exchange = Exchange::new("mock", adapter, config(tag), jobs);
    exchange.start();
    assert!(
        wait_until(Duration::from_secs(15), || exchange.status()
            == ExchangeStatus::Connected),
        "exchange failed to connect"
    );
    exchange
}

#[test]
fn test_connect_lifecycle() {
    let mock = usd_eur_mock();
    let exchange = connected_exchange(&mock, "lifecycle");

    assert_eq!(exchange.estimate_currency_of(), Currency::Usd);
    assert!(exchange.order_chain(Currency::Usd, Currency::Eur).is_some());
    assert!(exchange.order_chain(Currency::Eur, Currency::Usd).is_some());
    assert!(
        wait_until(Duration::from_secs(5), || {
            exchange.fund(Currency::Usd) == 100.0
        }),
        "balance was never fetched"
    );
    assert_eq!(exchange.estimate(), Some(100.0));

    exchange.stop();
    assert_eq!(exchange.status(), ExchangeStatus::Disconnected);
}

#[test]
fn test_place_and_complete() {
    let mock = usd_eur_mock();
    let exchange = connected_exchange(&mock, "complete");

    let transaction = exchange
        .transaction_map()
        .transaction(Currency::Usd, Currency::Eur)
        .unwrap();

    let (complete_tx, complete_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    let mut operation = Operation::order_operation(
        Order::with_rate(transaction, 0.8),
        100.0,
        StrategyId::new("test"),
    )
    .unwrap();
    operation.on_order_complete(
        "testComplete",
        Arc::new(move |_, _, amount| {
            let _ = complete_tx.send(amount);
        }),
        Lifetime::Operation,
    );
    operation.on_complete(
        "testDone",
        Arc::new(move |context| {
            let _ = done_tx.send(context.failure_cause());
        }),
    );

    mock.push_set_order_result(Ok(vec![OrderId::from("X")]));
    exchange.process(operation, 0, "test").unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        mock.set_order_calls().len() == 1
    }));

    // The venue confirms the order, unfilled.
    mock.set_open_orders(vec![MockOpenOrder {
        id: OrderId::from("X"),
        initial: Currency::Usd,
        final_currency: Currency::Eur,
        rate: 0.8,
        amount: 100.0,
        creation_time: Utc::now(),
    }]);
    assert!(wait_until(Duration::from_secs(5), || {
        exchange.track_order_list().count(EachFilter::Matched) == 1
    }));

    // Full fill: balance moves, order vanishes.
    mock.set_balance(&[(Currency::Usd, 0.0), (Currency::Eur, 80.0)]);
    mock.set_open_orders(vec![]);

    let amount = complete_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(amount, 100.0);

    let cause = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(cause, FailureCause::None);

    assert!(wait_until(Duration::from_secs(5), || {
        exchange.track_order_list().count(EachFilter::All) == 0
    }));

    exchange.stop();
}

#[test]
fn test_failed_placement_reports_place_order_failure() {
    let mock = usd_eur_mock();
    let exchange = connected_exchange(&mock, "failed");

    let transaction = exchange
        .transaction_map()
        .transaction(Currency::Usd, Currency::Eur)
        .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let mut operation = Operation::order_operation(
        Order::with_rate(transaction, 0.8),
        100.0,
        StrategyId::new("test"),
    )
    .unwrap();
    operation.on_complete(
        "testDone",
        Arc::new(move |context| {
            let _ = done_tx.send(context.failure_cause());
        }),
    );

    mock.push_set_order_result(Err(
        vostro_execution::error::AdapterError::Api("rejected".to_owned()),
    ));
    exchange.process(operation, 0, "test").unwrap();

    // The placeholder fails, the register deadline passes, the error
    // path resolves the context.
    let cause = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(cause, FailureCause::PlaceOrder);

    exchange.stop();
}

#[test]
fn test_chained_order_spawns_next_leg() {
    let mock = usd_eur_mock();
    mock.add_pair(Currency::Eur, Currency::Btc, 0.0001);
    let exchange = connected_exchange(&mock, "chained");

    let usd_eur = exchange
        .transaction_map()
        .transaction(Currency::Usd, Currency::Eur)
        .unwrap();
    let eur_btc = exchange
        .transaction_map()
        .transaction(Currency::Eur, Currency::Btc)
        .unwrap();

    let mut order = Order::with_rate(usd_eur, 0.8);
    order.push_next(Order::with_rate(eur_btc, 0.0001));

    let (done_tx, done_rx) = mpsc::channel();
    let operation =
        Operation::order_operation(order, 100.0, StrategyId::new("test")).unwrap();
    let context = Arc::clone(operation.context());
    operation.on_complete(
        "testDone",
        Arc::new(move |context| {
            let mut profits = Vec::new();
            context.profit(|currency, profit| profits.push((currency, profit)));
            let _ = done_tx.send((context.failure_cause(), profits));
        }),
    );

    mock.push_set_order_result(Ok(vec![OrderId::from("X")]));
    mock.push_set_order_result(Ok(vec![OrderId::from("Y")]));
    exchange.process(operation, 0, "test").unwrap();
    drop(context);

    assert!(wait_until(Duration::from_secs(5), || {
        mock.set_order_calls().len() == 1
    }));

    // Leg one fills: USD out, EUR in, order gone.
    mock.set_balance(&[(Currency::Usd, 0.0), (Currency::Eur, 80.0)]);

    // The completion spawns the second leg.
    assert!(
        wait_until(Duration::from_secs(10), || {
            mock.set_order_calls().len() == 2
        }),
        "second leg was never submitted"
    );
    let calls = mock.set_order_calls();
    assert_eq!(calls[1].0, Currency::Eur);
    assert_eq!(calls[1].1, Currency::Btc);
    assert!((calls[1].2 - 80.0).abs() < 1e-9);

    // The venue confirms leg two, then it fills.
    mock.set_open_orders(vec![MockOpenOrder {
        id: OrderId::from("Y"),
        initial: Currency::Eur,
        final_currency: Currency::Btc,
        rate: 0.0001,
        amount: 80.0,
        creation_time: Utc::now(),
    }]);
    assert!(wait_until(Duration::from_secs(5), || {
        exchange.track_order_list().count(EachFilter::Matched) == 1
    }));
    mock.set_balance(&[(Currency::Eur, 0.0), (Currency::Btc, 0.008)]);
    mock.set_open_orders(vec![]);

    let (cause, profits) = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(cause, FailureCause::None);
    assert!(!profits.is_empty());

    exchange.stop();
}

#[test]
fn test_order_timeout_cancels_and_reports() {
    let mock = usd_eur_mock();
    mock.set_remove_on_cancel(true);
    let exchange = connected_exchange(&mock, "timeout");

    let transaction = exchange
        .transaction_map()
        .transaction(Currency::Usd, Currency::Eur)
        .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let order = Order::with_rate(transaction, 0.8).with_timeout(Duration::from_millis(500));
    let operation =
        Operation::order_operation(order, 100.0, StrategyId::new("test")).unwrap();
    operation.on_complete(
        "testDone",
        Arc::new(move |context| {
            let _ = done_tx.send(context.failure_cause());
        }),
    );

    mock.push_set_order_result(Ok(vec![OrderId::from("X")]));
    exchange.process(operation, 0, "test").unwrap();

    // The venue holds the unfilled order past its timeout.
    mock.set_open_orders(vec![MockOpenOrder {
        id: OrderId::from("X"),
        initial: Currency::Usd,
        final_currency: Currency::Eur,
        rate: 0.8,
        amount: 100.0,
        creation_time: Utc::now(),
    }]);

    assert!(
        wait_until(Duration::from_secs(10), || !mock.cancelled().is_empty()),
        "the engine never cancelled the expired order"
    );
    assert_eq!(mock.cancelled()[0], OrderId::from("X"));

    let cause = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(cause, FailureCause::Timeout);

    exchange.stop();
}

#[test]
fn test_read_only_exchange_refuses_orders() {
    let mock = usd_eur_mock();
    let adapter: Arc<dyn ExchangeAdapter> = Arc::clone(&mock) as Arc<dyn ExchangeAdapter>;
    let jobs = Arc::new(JobPool::new("test-jobs", 2));
    let exchange = Exchange::new(
        "mock-read-only",
        adapter,
        ExchangeConfig {
            read_only: true,
            ..config("read-only")
        },
        jobs,
    );

    let transaction = mock_transaction(&mock);
    let operation = Operation::order_operation(
        Order::with_rate(transaction, 0.8),
        100.0,
        StrategyId::new("test"),
    )
    .unwrap();

    let result = exchange.process(operation, 0, "test");
    assert!(matches!(result, Err(vostro::error::VostroError::ReadOnly)));
}

fn mock_transaction(
    mock: &Arc<MockExchange>,
) -> Arc<vostro_instrument::transaction::Transaction> {
    // Build a transaction equivalent to the mock's USD/EUR pair.
    let map = vostro_instrument::transaction::map::PairTransactionMap::new();
    mock.update_properties(&map).unwrap();
    let transaction = map.transaction(Currency::Usd, Currency::Eur).unwrap();
    transaction.set_rate(0.8, Utc::now()).unwrap();
    transaction
}
