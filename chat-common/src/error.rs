use std::error::Error;

/// Crate-wide error type for everything that can go wrong below the wire
/// protocol boundary. Never serialized directly: every dispatch path in
/// `chat-core` translates this (or a validation failure) into an `error` or
/// `auth_result` frame before a peer ever sees it. Startup-time variants
/// (database, TLS) surface as a process-exit diagnostic instead.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("frame exceeds maximum size of {max} bytes (got {actual})")]
    FrameTooLarge { max: usize, actual: usize },
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ChatError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}
