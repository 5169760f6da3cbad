use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("chromium error: {0}")]
    Chromium(String),

    #[error("browser is disconnected")]
    Disconnected,
}

impl From<BrowserError> for quarry_pool::PoolError {
    fn from(err: BrowserError) -> Self {
        quarry_pool::PoolError::Client(err.to_string())
    }
}
