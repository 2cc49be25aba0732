//! Mutual TLS client certificate validation.
//!
//! # Architecture
//!
//! ```text
//! TLS handshake (acceptor)
//!   → TlsSession { peer_certificate } inserted into request extensions
//!   → mtls_middleware
//!       → PresentedCertificate::from_der
//!       → ValidationPipeline
//!           1. issuer name      → PolicyConfig
//!           2. chain + CRLs     → ChainValidator → TrustStore, RevocationChecker
//!           3-8. pin, validity, allow-lists
//!   → Accepted: IdentityAttributes in extensions + x-client-cert-* headers
//!   → Rejected: 302 to {error_redirect_url}?reason=<code>
//! ```
//!
//! # Modules
//!
//! - [`pem`]: strict PEM armor decoding
//! - [`certificate`]: presented certificate parsing and identity attributes
//! - [`trust_store`]: CA bundle loading and atomic snapshots
//! - [`config`]: YAML configuration types
//! - [`policy`]: compiled, normalized policy
//! - [`revocation`]: CRL checking (static files, distribution points)
//! - [`chain`]: chain building and verification
//! - [`pipeline`]: ordered evaluation and reason codes
//! - [`middleware`]: axum integration

pub mod certificate;
pub mod chain;
pub mod config;
pub mod middleware;
pub mod pem;
pub mod pipeline;
pub mod policy;
pub mod revocation;
pub mod trust_store;

#[cfg(test)]
#[path = "../../tests/common/pki.rs"]
pub(crate) mod testing;

pub use certificate::{
    ExtendedKeyUsages, IdentityAttributes, PresentedCertificate, SignatureAlgorithm,
};
pub use chain::{ChainError, ChainResult, ChainValidator};
pub use config::{MtlsConfig, RevocationConfig, RevocationMode};
pub use middleware::{ClientAddr, MtlsGuard, TlsSession, mtls_middleware};
pub use pipeline::{RejectReason, ValidationPipeline, ValidationVerdict};
pub use policy::PolicyConfig;
pub use revocation::{CrlSource, HttpCrlSource, RevocationChecker, RevocationStatus};
pub use trust_store::{LoadError, SharedTrustStore, TrustStore, TrustedIssuer};

use std::sync::Arc;

use tracing::info;

use crate::Result;

/// Build a ready-to-use pipeline from configuration: load the CA bundle,
/// compile the policy and set up revocation checking.
///
/// # Errors
///
/// Fails when the bundle cannot be loaded, the policy is invalid, or a
/// static CRL cannot be read.  Callers must not serve requests in that case.
pub fn build_pipeline(
    mtls: &MtlsConfig,
    revocation: &RevocationConfig,
) -> Result<ValidationPipeline> {
    let policy = PolicyConfig::from_config(mtls)?;
    let store = TrustStore::load_file(&mtls.ca_bundle_path)?;
    let checker = RevocationChecker::from_config(revocation)?;

    info!(
        issuer_name = policy.issuer_name(),
        trusted = store.len(),
        revocation = ?checker.mode(),
        "Client certificate validation ready"
    );

    Ok(ValidationPipeline::new(
        policy,
        Arc::new(SharedTrustStore::new(store)),
        ChainValidator::new(checker),
    ))
}
