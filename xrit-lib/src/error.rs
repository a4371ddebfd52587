#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Frame buffer was not exactly one transfer frame long.
    #[error("invalid frame size; expected {expected} bytes, got {actual}")]
    InvalidFrameSize { actual: usize, expected: usize },

    #[error("failed to parse product header: {0}")]
    HeaderParse(String),

    /// Decompression failed, or no codec is available for the product.
    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
