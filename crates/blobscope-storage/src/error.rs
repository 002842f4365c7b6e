use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage key is not valid base64")]
    InvalidKey,

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("storage returned HTTP {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("malformed listing response: {0}")]
    Listing(String),

    #[error("{0}")]
    Unavailable(String),
}

impl StorageError {
    /// True for authentication/authorization rejections
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::InvalidKey | Self::Status { status: 401 | 403, .. })
    }
}
