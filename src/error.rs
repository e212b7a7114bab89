use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThrottleError {
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP request failed for {url}: {message}")]
    HttpError { url: String, message: String },
}

impl ThrottleError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    pub fn http_error(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::HttpError {
            url: url.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ThrottleError>;
