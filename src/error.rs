use thiserror::Error;

/// Bridge-wide error type.
///
/// The propagation rules differ per variant: [`BridgeError::Parse`] is
/// swallowed and logged at the row/widget level inside the extractors,
/// [`BridgeError::ConfigInvalid`] is fatal at startup, and the transport
/// family aborts only the one page pass it occurred in.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gateway returned HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Request deadline exceeded")]
    Timeout,

    #[error("Parse failure: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Internal channel closed")]
    ChannelClosed,

    #[error("Config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SetLoggerError(#[from] log::SetLoggerError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Map a reqwest error on an in-flight call to the taxonomy: a
    /// deadline expiry is a cancellation, everything else is transport.
    #[must_use]
    pub fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}
