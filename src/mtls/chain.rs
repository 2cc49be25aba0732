//! Chain-of-trust construction and verification.
//!
//! Starting at the presented leaf, the validator looks up issuers in the
//! [`TrustStore`]: certificates whose subject DN equals the current issuer
//! DN (byte-for-byte), whose key verifies the current signature, which are
//! CAs and which are valid at `now`.  When several candidates qualify (for
//! example a cross-certificate next to a root with the same name and key)
//! each is tried in turn until one leads to a self-signed issuer (the
//! anchor).
//!
//! Once the path is known, revocation is checked for every element except
//! the anchor, under one overall timeout.  Any failure collapses to
//! [`ChainError::Invalid`]; the reason text is for logs only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;
use x509_parser::certificate::X509Certificate;

use crate::config::RevocationMode;
use crate::mtls::certificate::{PresentedCertificate, parse_x509};
use crate::mtls::revocation::{RevocationChecker, RevocationStatus, RevocationTarget};
use crate::mtls::trust_store::{TrustStore, TrustedIssuer};

/// Maximum number of certificates in a chain, leaf and anchor included.
pub const MAX_CHAIN_LEN: usize = 8;

/// Chain building or verification failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The chain is not trustworthy.
    #[error("certificate chain is invalid: {reason}")]
    Invalid {
        /// Diagnostic detail.
        reason: String,
    },
}

fn invalid(reason: impl Into<String>) -> ChainError {
    ChainError::Invalid {
        reason: reason.into(),
    }
}

/// A verified chain.
#[derive(Debug, Clone)]
pub struct ChainResult {
    /// Certificate that issued the leaf (chain element 1).
    pub issuer: Arc<TrustedIssuer>,
    /// Issuer certificates in chain order, ending at the anchor.
    pub chain: Vec<Arc<TrustedIssuer>>,
    /// Aggregate revocation status; always `Good` for a returned result.
    pub revocation: RevocationStatus,
}

impl ChainResult {
    /// Number of certificates in the chain including the leaf.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.chain.len() + 1
    }
}

/// Builds and verifies chains against a trust store.
#[derive(Debug, Clone)]
pub struct ChainValidator {
    revocation: RevocationChecker,
}

impl ChainValidator {
    /// Validator using `revocation` for status checks.
    #[must_use]
    pub fn new(revocation: RevocationChecker) -> Self {
        Self { revocation }
    }

    /// Revocation checker in use.
    #[must_use]
    pub fn revocation(&self) -> &RevocationChecker {
        &self.revocation
    }

    /// Build and verify the chain for `leaf` at instant `now`.
    ///
    /// The leaf's own validity window is not checked here.
    pub async fn validate(
        &self,
        leaf: &PresentedCertificate,
        store: &TrustStore,
        now: DateTime<Utc>,
    ) -> Result<ChainResult, ChainError> {
        let (chain, targets) = build_path(leaf, store, now)?;
        debug!(
            subject = %leaf.subject,
            depth = chain.len() + 1,
            anchor = %chain.last().map_or("", |a| a.subject.as_str()),
            "Chain built"
        );

        let revocation = if self.revocation.mode() == RevocationMode::NoCheck {
            RevocationStatus::Good
        } else {
            tokio::time::timeout(self.revocation.timeout(), self.check_revocation(&targets, now))
                .await
                .map_err(|_| {
                    invalid(format!(
                        "revocation check timed out after {:?}",
                        self.revocation.timeout()
                    ))
                })??
        };

        let issuer = chain
            .first()
            .cloned()
            .ok_or_else(|| invalid("chain has no issuer"))?;

        Ok(ChainResult {
            issuer,
            chain,
            revocation,
        })
    }

    async fn check_revocation(
        &self,
        targets: &[(RevocationTarget, Arc<TrustedIssuer>)],
        now: DateTime<Utc>,
    ) -> Result<RevocationStatus, ChainError> {
        for (target, issuer) in targets {
            match self.revocation.check(target, issuer, now).await {
                RevocationStatus::Good => {}
                RevocationStatus::Revoked { reason } => {
                    return Err(invalid(format!("{} is revoked ({reason})", target.subject)));
                }
                RevocationStatus::Unknown => {
                    return Err(invalid(format!(
                        "revocation status of {} is unknown",
                        target.subject
                    )));
                }
            }
        }
        Ok(RevocationStatus::Good)
    }
}

type ChainPath = (Vec<Arc<TrustedIssuer>>, Vec<(RevocationTarget, Arc<TrustedIssuer>)>);

/// Depth-first search from the leaf to a self-signed anchor.
///
/// Every usable issuer candidate is tried in bundle order; a candidate that
/// leads to a dead end (missing anchor, loop, depth limit) is abandoned for
/// the next one.  Returns the issuer certificates in order plus one
/// revocation target per non-anchor element.
fn build_path(
    leaf: &PresentedCertificate,
    store: &TrustStore,
    now: DateTime<Utc>,
) -> Result<ChainPath, ChainError> {
    let cert = parse_x509(leaf.der()).map_err(|e| invalid(e.to_string()))?;
    let mut path = (Vec::new(), Vec::new());
    extend_path(leaf.der(), &cert, store, now, &mut path)?;
    Ok(path)
}

fn extend_path(
    leaf_der: &[u8],
    cert: &X509Certificate<'_>,
    store: &TrustStore,
    now: DateTime<Utc>,
    path: &mut ChainPath,
) -> Result<(), ChainError> {
    if path.0.len() + 1 >= MAX_CHAIN_LEN {
        return Err(invalid(format!("chain exceeds {MAX_CHAIN_LEN} certificates")));
    }

    let target = RevocationTarget::from_cert(cert);
    let mut last_error = None;

    for issuer in usable_issuers(store, cert, now)? {
        if issuer.der() == leaf_der {
            last_error = Some(invalid("leaf certificate is self-signed"));
            continue;
        }
        if path.0.iter().any(|c| Arc::ptr_eq(c, &issuer)) {
            last_error = Some(invalid(format!("loop detected at {}", issuer.subject)));
            continue;
        }

        path.0.push(Arc::clone(&issuer));
        path.1.push((target.clone(), Arc::clone(&issuer)));
        if issuer.self_signed {
            return Ok(());
        }

        let result = issuer
            .parsed()
            .map_err(|e| invalid(e.to_string()))
            .and_then(|parent| extend_path(leaf_der, &parent, store, now, path));
        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(candidate = %issuer.subject, error = %e, "Backtracking from issuer candidate");
                path.0.pop();
                path.1.pop();
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| invalid(format!("no usable issuer for {}", cert.issuer()))))
}

/// Trusted certificates that may have issued `cert`: matching subject DN, a
/// CA, valid at `now` and with a key that verifies the signature.
fn usable_issuers(
    store: &TrustStore,
    cert: &X509Certificate<'_>,
    now: DateTime<Utc>,
) -> Result<Vec<Arc<TrustedIssuer>>, ChainError> {
    let mut named = 0usize;
    let mut usable = Vec::new();
    for candidate in store.issuers_of(cert) {
        named += 1;
        if !candidate.is_ca {
            debug!(candidate = %candidate.subject, "Skipping issuer candidate: not a CA");
            continue;
        }
        if !candidate.is_valid_at(now) {
            debug!(candidate = %candidate.subject, "Skipping issuer candidate: outside validity window");
            continue;
        }
        if !candidate.signed(cert) {
            debug!(candidate = %candidate.subject, "Skipping issuer candidate: signature mismatch");
            continue;
        }
        usable.push(Arc::clone(candidate));
    }

    if usable.is_empty() {
        return Err(if named == 0 {
            invalid(format!("no trusted certificate for issuer {}", cert.issuer()))
        } else {
            invalid(format!(
                "none of {named} candidate(s) for issuer {} is usable",
                cert.issuer()
            ))
        });
    }
    Ok(usable)
}
