//! Error types for mtls-gate

use std::io;

use thiserror::Error;

use crate::mtls::pem::PemError;
use crate::mtls::trust_store::LoadError;

/// Result type alias for mtls-gate
pub type Result<T> = std::result::Result<T, Error>;

/// mtls-gate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// CA bundle could not be loaded
    #[error("Trust store error: {0}")]
    TrustStore(#[from] LoadError),

    /// A certificate (or CRL) could not be decoded
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// PEM armor error
    #[error("PEM error: {0}")]
    Pem(#[from] PemError),

    /// Revocation data could not be obtained
    #[error("Revocation error: {0}")]
    Revocation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` for failures that happened while talking to a remote
    /// revocation endpoint rather than because of local data.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Io(_))
    }
}
