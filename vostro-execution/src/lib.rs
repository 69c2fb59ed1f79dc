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

//! # Vostro-Execution
//! Order tracking, reconciliation and operation lifecycle for the Vostro
//! trading engine.
//!
//! The centre of gravity is the [`TrackOrderList`](track::list::TrackOrderList):
//! the authoritative list of orders the engine believes exist, reconciled
//! against each venue snapshot with a weighted matching algorithm and
//! balance-movement evidence. Around it sit the [`Balance`](balance::Balance)
//! with its reserve accounting, the per-order-id
//! [`EventManager`](event::EventManager), and the chained-order
//! [`Operation`](operation::Operation) protocol.

/// Order, strategy and context identifiers.
pub mod id;

/// Engine clock abstraction, pluggable for tests.
pub mod clock;

/// Execution and adapter errors.
pub mod error;

/// Per-currency funds with reserve accounting.
pub mod balance;

/// Balance movement journal.
pub mod movements;

/// Chained orders.
pub mod order;

/// Per-order-id event containers and dispatch.
pub mod event;

/// Operations, operation contexts and profit monitoring.
pub mod operation;

/// Track orders and the reconciliation core.
pub mod track;

/// The venue adapter interface.
pub mod adapter;
