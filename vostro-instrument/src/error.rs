use crate::currency::Currency;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstrumentError {
    #[error("rate must be strictly positive for {initial}/{final_currency}, rate={rate}")]
    InvalidRate {
        initial: Currency,
        final_currency: Currency,
        rate: f64,
    },

    #[error("pair {initial}/{final_currency} is already registered")]
    PairAlreadyRegistered {
        initial: Currency,
        final_currency: Currency,
    },

    #[error("no base pair {initial}/{final_currency} to invert")]
    BasePairMissing {
        initial: Currency,
        final_currency: Currency,
    },

    #[error("pair {initial}/{final_currency} is already inverted")]
    AlreadyInverted {
        initial: Currency,
        final_currency: Currency,
    },

    #[error("operation requires a {expected} transaction")]
    WrongTransactionKind { expected: &'static str },

    #[error("amount {amount} or rate {rate} out of bounds for order submission")]
    OutOfBounds { amount: f64, rate: f64 },

    #[error("rate history does not reach back {requested} entries (have {available})")]
    HistoryExhausted { requested: usize, available: usize },
}
