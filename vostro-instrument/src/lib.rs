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

//! # Vostro-Instrument
//! Core currency, transaction and pair-map data structures for the Vostro
//! trading engine.
//!
//! A [`Currency`](currency::Currency) is a process-wide identity; a
//! [`Transaction`](transaction::Transaction) is a directed currency pair
//! (or a withdrawal) carrying the live rate, its bounded history, fees and
//! boundaries; the [`PairTransactionMap`](transaction::map::PairTransactionMap)
//! indexes the tradable pairs of one venue.

/// Process-wide currency identities and ticker parsing.
pub mod currency;

/// Decimal-place formatting helpers for rate and amount submission.
pub mod format;

/// Per-transaction amount/rate boundaries.
pub mod boundaries;

/// Pair, inverted-pair and withdraw transactions plus the pair map.
pub mod transaction;

/// Instrument errors.
pub mod error;
