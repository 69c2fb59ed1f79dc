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
#![allow(clippy::type_complexity)]

//! # Vostro-Integration
//! Venue-agnostic plumbing shared by the Vostro trading engine crates.
//!
//! Contains the bounded time-sorted ring buffer used for rate history and
//! balance-movement journals, the condvar-backed signalling primitive the
//! pollers and watchdog synchronise on, the cooperative shutdown handle,
//! the adapter retry wrapper, and the fixed-size job pool used for order
//! placement.

/// Bounded, timestamp-sorted ring buffer collection.
pub mod collection;

/// Counter + condvar signalling primitive.
///
/// eg/ rates-updated, orders-updated, balance-updated triggers.
pub mod signal;

/// Cooperative shutdown flag with cancellable sleeps.
pub mod shutdown;

/// Retry wrapper for fallible venue calls.
pub mod retry;

/// Fixed-size worker pool for order placement jobs.
pub mod pool;
