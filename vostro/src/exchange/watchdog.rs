use super::{Exchange, ExchangeStatus};
use std::{sync::Arc, time::Duration};
use tracing::error;
use vostro_integration::signal::SignalEvent;

const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_CONNECT: Duration = Duration::from_secs(60);

/// The watchdog owns connection and reconnection: it connects when
/// disconnected, then monitors event activity and thread health,
/// forcing a disconnect when the fault counter stays non-zero for more
/// than six iterations.
pub(crate) fn watchdog_loop(exchange: Arc<Exchange>) {
    let mut restart_counter: usize = 0;

    while exchange.watchdog_shutdown().is_active() {
        let initial_counter = restart_counter;

        if exchange.status() == ExchangeStatus::Disconnected
            && let Err(cause) = exchange.connect()
        {
            error!(
                exchange = %exchange.id(),
                %cause,
                retry_s = RETRY_CONNECT.as_secs(),
                "error while connecting, will retry"
            );
            exchange.disconnect();
            exchange.watchdog_shutdown().sleep(RETRY_CONNECT);
        }

        if exchange.status() != ExchangeStatus::Connected {
            continue;
        }

        let events = exchange.events();
        let watched: Vec<&SignalEvent> = if exchange.config().read_only {
            vec![&events.rates]
        } else {
            vec![&events.balance, &events.orders, &events.rates]
        };

        let silent = SignalEvent::wait_for_all(
            WATCHDOG_TIMEOUT,
            &watched,
            Some(exchange.watchdog_shutdown()),
        );
        if let Some(silent) = silent
            && exchange.status() == ExchangeStatus::Connected
        {
            error!(
                exchange = %exchange.id(),
                event = silent.name(),
                timeout_s = WATCHDOG_TIMEOUT.as_secs(),
                "watchdog detected inactivity"
            );
            restart_counter += 1;
        }

        if exchange.any_connection_thread_finished()
            && exchange.status() == ExchangeStatus::Connected
        {
            restart_counter += 1;
        }

        // A counter that did not move this iteration was a glitch, not a
        // persistent fault.
        if initial_counter == restart_counter {
            restart_counter = 0;
        } else if restart_counter > 6 {
            exchange.disconnect();
        }
    }
}
