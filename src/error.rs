//! Error handling for the PPE camserver

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera unreachable, request timed out, or non-success status
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Corrupt or empty image
    #[error("Decode error: {0}")]
    Decode(String),

    /// Detection backend unavailable
    #[error("Inference error: {0}")]
    Inference(String),

    /// Event storage or broadcast failure
    #[error("Sink error: {0}")]
    Sink(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure should grow the worker's backoff delay.
    ///
    /// Decode failures are transient corrupt frames and sink failures only
    /// drop the current event; everything else blocks the cycle.
    pub fn is_connectivity(&self) -> bool {
        !matches!(
            self,
            Error::Decode(_) | Error::Image(_) | Error::Sink(_) | Error::Sqlx(_)
        )
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connectivity(_) | Error::Http(_) => "connectivity",
            Error::Decode(_) | Error::Image(_) => "decode",
            Error::Inference(_) => "inference",
            Error::Sink(_) | Error::Sqlx(_) => "sink",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_does_not_grow_backoff() {
        assert!(!Error::Decode("truncated".into()).is_connectivity());
        assert!(!Error::Sink("disk full".into()).is_connectivity());
    }

    #[test]
    fn test_connectivity_and_inference_grow_backoff() {
        assert!(Error::Connectivity("refused".into()).is_connectivity());
        assert!(Error::Inference("model missing".into()).is_connectivity());
        assert!(Error::Internal("panic".into()).is_connectivity());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::Connectivity("x".into()).kind(), "connectivity");
        assert_eq!(Error::Decode("x".into()).kind(), "decode");
        assert_eq!(Error::Sink("x".into()).kind(), "sink");
    }
}
