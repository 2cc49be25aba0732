//! mtls-gate Library
//!
//! Fail-closed mutual TLS client certificate validation for HTTP services.
//!
//! # Features
//!
//! - **Trust bundle**: strict PEM CA bundle loading, atomic reload
//! - **Chain validation**: path building to a self-signed anchor, CRL
//!   revocation checks across the whole chain with bounded timeouts
//! - **Ordered policy**: issuer name, issuer pin, validity window, serial,
//!   EKU, signature algorithm and thumbprint allow-lists
//! - **Stable reason codes**: every rejection maps to one documented code
//! - **axum middleware**: identity attributes as request extensions and
//!   `x-client-cert-*` headers, redirects on rejection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod mtls;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
