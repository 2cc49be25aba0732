//! Helpers shared by the integration tests.

#![allow(dead_code)]

pub mod pki;

pub use pki::*;

use mtls_gate::config::{MtlsConfig, RevocationConfig, RevocationMode};
use mtls_gate::mtls::TrustStore;

/// Minimal policy: issuer name only, everything else unconstrained.
pub fn mtls_config(issuer_name: &str) -> MtlsConfig {
    MtlsConfig {
        issuer_name: issuer_name.to_string(),
        ..MtlsConfig::default()
    }
}

/// Revocation settings that only consult the given static CRLs.
pub fn offline_revocation() -> RevocationConfig {
    RevocationConfig {
        mode: RevocationMode::Offline,
        ..RevocationConfig::default()
    }
}

/// Trust store holding the given CA certificates.
pub fn trust_store(cas: &[&TestCa]) -> TrustStore {
    let bundle: String = cas.iter().map(|ca| ca.pem()).collect();
    TrustStore::load(bundle.as_bytes()).expect("load test bundle")
}
