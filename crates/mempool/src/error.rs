use thiserror::Error;

#[derive(Error, Debug)]
pub enum MempoolError {
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Invalid delivery proof response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, MempoolError>;
