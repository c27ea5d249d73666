use thiserror::Error;

/// Failures of the browser automation layer.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("CDP error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    /// Every selector strategy for an element was tried without a match.
    #[error("no strategy matched for {0}")]
    Exhausted(String),

    #[error("media upload failed: {0}")]
    Upload(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("browser setup failed: {0}")]
    Setup(String),
}

/// Failures talking to the generation API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("connection error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The requesting handle has no linked account on the platform.
    #[error("X account not found or not linked")]
    AccountNotLinked,

    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported content type: {0}")]
    Unsupported(String),

    #[error("network error downloading media: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
