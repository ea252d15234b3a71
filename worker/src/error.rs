use darkpool_intent::SignatureError;
use std::path::PathBuf;
use thiserror::Error;

/// Problems reading the protected data. Recovered locally, never fatal.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("no input location configured")]
    NotConfigured,

    #[error("protected data not found at {0}")]
    Missing(PathBuf),

    #[error("failed reading {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed protected data: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no trade intent to match")]
    NoIntent,

    #[error("invalid order book: {0}")]
    Book(String),

    #[error("phase {got} started out of order, expected {expected}")]
    PhaseOrder {
        expected: &'static str,
        got: &'static str,
    },

    #[error("quote amount overflows: {price} x {quantity}")]
    Overflow { price: u64, quantity: u64 },

    #[error("signing failed: {0}")]
    Signing(#[from] SignatureError),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorkerError::Io {
            path: path.into(),
            source,
        }
    }
}
