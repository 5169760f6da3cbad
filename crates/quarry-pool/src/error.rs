use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Error)]
pub enum PoolError {
    /// No entry freed a context slot within the bounded wait
    #[error("no pool capacity became available within {waited:?}")]
    AcquireTimeout { waited: Duration },

    /// The pool is shutting down; new acquisitions are rejected
    #[error("pool is shutting down")]
    ShuttingDown,

    /// The underlying automation client failed
    #[error("client error: {0}")]
    Client(String),
}
