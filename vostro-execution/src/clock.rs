use chrono::{DateTime, Utc};

/// Defines how the reconciliation core determines the current time.
///
/// Live trading uses [`LiveClock`]; tests substitute a stepped clock so
/// placeholder and cancel deadlines can be crossed deterministically.
pub trait EngineClock: Send + Sync {
    fn time(&self) -> DateTime<Utc>;
}

/// Live `Clock` using `Utc::now()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LiveClock;

impl EngineClock for LiveClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
