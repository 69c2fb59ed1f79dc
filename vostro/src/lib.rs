#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Vostro
//! Multi-venue cryptocurrency trading engine core.
//!
//! Each [`Exchange`](exchange::Exchange) owns a small set of long-running
//! threads: properties, rates and balance&orders pollers, a watchdog and
//! an optional rates recorder, plus a shared worker pool for order
//! placement. Strategies drive the engine through
//! [`StrategyHost::sell`](strategy::StrategyHost::sell): an operation (a
//! single order or a chain) is tracked as a placeholder, submitted via
//! the venue adapter, reconciled against each snapshot, and completion
//! events cascade through the chain until the shared context resolves.

/// Exchange runtime: lifecycle, pollers, watchdog, order placement.
pub mod exchange;

/// Per-exchange configuration.
pub mod config;

/// Engine errors.
pub mod error;

/// Strategy trait, host and engine loop.
pub mod strategy;

/// CSV recorders for transactions, profit and rates.
pub mod recorder;

/// Logging bootstrap.
pub mod logging;

/// Scripted in-memory venue used by the tests.
pub mod mock;
