use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error: {message}")]
    Api { message: String },

    #[error("API quota exhausted")]
    QuotaExhausted,
}

impl ScraperError {
    /// Whether a retry at the same granularity could plausibly succeed.
    /// Quota exhaustion is deliberately not transient; it is a run-wide
    /// soft stop handled above the retry loops.
    pub fn is_transient(&self) -> bool {
        match self {
            ScraperError::Http(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                match e.status() {
                    Some(status) => {
                        status.as_u16() == 429 || status.is_server_error()
                    }
                    None => e.is_request(),
                }
            }
            ScraperError::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;

