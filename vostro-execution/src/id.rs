use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ORDER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Venue-assigned or locally-generated order identifier.
///
/// Placeholders carry a locally-generated `auto-N` id until the venue
/// reports its own.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub struct OrderId(pub SmolStr);

impl OrderId {
    pub fn new<S>(id: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self(id.into())
    }

    /// A fresh process-unique local id.
    pub fn unique() -> Self {
        Self(SmolStr::from(format!(
            "auto-{}",
            NEXT_ORDER_ID.fetch_add(1, Ordering::Relaxed)
        )))
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(SmolStr::from(value))
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(SmolStr::from(value))
    }
}

/// Identifier of the strategy an operation originates from.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub struct StrategyId(pub SmolStr);

impl StrategyId {
    pub fn new<S>(id: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self(id.into())
    }

    pub fn unknown() -> Self {
        Self(SmolStr::new_static("unknown"))
    }
}

/// Process-unique operation context identifier.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub struct ContextId(pub u64);

impl ContextId {
    pub fn unique() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}
