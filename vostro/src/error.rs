use thiserror::Error;
use vostro_execution::error::{AdapterError, ExecutionError};
use vostro_instrument::error::InstrumentError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VostroError {
    #[error("connection phase '{phase}' exceeded {timeout_s}s")]
    ConnectTimeout { phase: &'static str, timeout_s: u64 },

    #[error("operations are not permitted on a read-only exchange")]
    ReadOnly,

    #[error("sanity check: {0}")]
    SanityCheck(String),

    #[error("adapter: {0}")]
    Adapter(#[from] AdapterError),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("instrument: {0}")]
    Instrument(#[from] InstrumentError),
}
