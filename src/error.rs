use thiserror::Error;

/// Errors surfaced while parsing venue frames or operating the session.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("write error: {0}")]
    Write(#[from] WriteError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors returned by a [`crate::writer::Writer`] implementation.
///
/// `Transient` failures are retryable (the caller may re-append the same
/// batch later); `Fatal` failures mean the writer itself is broken and the
/// process should not keep trying to push data through it.
#[derive(Debug, Error, Clone)]
pub enum WriteError {
    #[error("transient write failure: {0}")]
    Transient(String),

    #[error("fatal write failure: {0}")]
    Fatal(String),
}
