use crate::id::OrderId;
use thiserror::Error;
use vostro_instrument::error::InstrumentError;
use vostro_integration::retry::Retryable;

/// Error reported by a venue adapter call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// Transient failure worth re-attempting: network blip, nonce desync.
    #[error("retryable venue error: {0}")]
    Retry(String),

    /// Terminal failure for this call.
    #[error("venue error: {0}")]
    Api(String),

    #[error("operation not supported by this venue")]
    Unsupported,
}

impl Retryable for AdapterError {
    fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Retry(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("adapter: {0}")]
    Adapter(#[from] AdapterError),

    #[error("instrument: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("order {id} is not tracked")]
    UnknownOrder { id: OrderId },

    #[error("order {id} is not a placeholder")]
    NotPlaceholder { id: OrderId },

    #[error("invalid order for amount {amount}")]
    InvalidOrder { amount: f64 },

    #[error("a context is already attached to order {id}")]
    ContextAlreadyAttached { id: OrderId },
}
