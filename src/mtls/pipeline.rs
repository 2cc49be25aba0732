//! Ordered, fail-closed certificate evaluation.
//!
//! Checks run in a fixed order and the first failure decides the verdict:
//!
//! | # | Check | Reason on failure |
//! |---|-------|-------------------|
//! | 1 | issuer CN equals the configured issuer name | `issuer-name-mismatch` |
//! | 2 | chain builds to a trusted anchor, nothing revoked | `crl-check-failed` |
//! | 3 | immediate issuer thumbprint pin (if set) | `issuer-not-trusted` |
//! | 4 | `now` within the validity window | `expired-cert` / `cert-notyetvalid` |
//! | 5 | serial allow-list | `serial-mismatch` |
//! | 6 | EKU allow-list | `eku-missing` / `eku-not-allowed` |
//! | 7 | signature algorithm allow-list | `sigalg-not-allowed` |
//! | 8 | client thumbprint allow-list | `client-thumbprint-not-allowed` |
//!
//! A panic anywhere inside evaluation becomes `validation-error`.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::mtls::certificate::{IdentityAttributes, PresentedCertificate, normalize_hex};
use crate::mtls::chain::ChainValidator;
use crate::mtls::policy::PolicyConfig;
use crate::mtls::trust_store::SharedTrustStore;

// ─────────────────────────────────────────────────────────────────────────────
// Verdict types
// ─────────────────────────────────────────────────────────────────────────────

/// Why a request was rejected.  The string forms are a stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The connection is not TLS.
    InsecureConnection,
    /// No client certificate was presented.
    MissingCert,
    /// Issuer CN differs from the configured issuer name.
    IssuerNameMismatch,
    /// Chain building or revocation checking failed.
    CrlCheckFailed,
    /// Immediate issuer does not match the pinned thumbprint.
    IssuerNotTrusted,
    /// Certificate is past `notAfter`.
    ExpiredCert,
    /// Certificate is before `notBefore`.
    CertNotYetValid,
    /// Serial number not in the allow-list.
    SerialMismatch,
    /// Certificate has no EKU extension (or an empty one).
    EkuMissing,
    /// No EKU of the certificate is allowed.
    EkuNotAllowed,
    /// Signature algorithm not in the allow-list.
    SigalgNotAllowed,
    /// Client thumbprint not in the allow-list.
    ClientThumbprintNotAllowed,
    /// Unexpected failure during evaluation.
    ValidationError,
}

impl RejectReason {
    /// Every reason, in check order.
    pub const ALL: [Self; 13] = [
        Self::InsecureConnection,
        Self::MissingCert,
        Self::IssuerNameMismatch,
        Self::CrlCheckFailed,
        Self::IssuerNotTrusted,
        Self::ExpiredCert,
        Self::CertNotYetValid,
        Self::SerialMismatch,
        Self::EkuMissing,
        Self::EkuNotAllowed,
        Self::SigalgNotAllowed,
        Self::ClientThumbprintNotAllowed,
        Self::ValidationError,
    ];

    /// Stable reason code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InsecureConnection => "insecure-connection",
            Self::MissingCert => "missing-cert",
            Self::IssuerNameMismatch => "issuer-name-mismatch",
            Self::CrlCheckFailed => "crl-check-failed",
            Self::IssuerNotTrusted => "issuer-not-trusted",
            Self::ExpiredCert => "expired-cert",
            Self::CertNotYetValid => "cert-notyetvalid",
            Self::SerialMismatch => "serial-mismatch",
            Self::EkuMissing => "eku-missing",
            Self::EkuNotAllowed => "eku-not-allowed",
            Self::SigalgNotAllowed => "sigalg-not-allowed",
            Self::ClientThumbprintNotAllowed => "client-thumbprint-not-allowed",
            Self::ValidationError => "validation-error",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RejectReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Outcome of evaluating one certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    /// All checks passed.
    Accepted {
        /// Identity of the client.
        identity: IdentityAttributes,
    },
    /// A check failed.
    Rejected {
        /// First failing check.
        reason: RejectReason,
    },
}

impl ValidationVerdict {
    /// Rejection with `reason`.
    #[must_use]
    pub fn rejected(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }

    /// `true` for [`ValidationVerdict::Accepted`].
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Rejection reason, if rejected.
    #[must_use]
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected { reason } => Some(*reason),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the ordered checks for each presented certificate.
///
/// Cheap to share: wrap in an `Arc` and call from any number of tasks.
#[derive(Debug)]
pub struct ValidationPipeline {
    policy: PolicyConfig,
    trust_store: Arc<SharedTrustStore>,
    chain: ChainValidator,
}

impl ValidationPipeline {
    /// Pipeline enforcing `policy` against the trust store snapshot current
    /// at each call.
    #[must_use]
    pub fn new(
        policy: PolicyConfig,
        trust_store: Arc<SharedTrustStore>,
        chain: ChainValidator,
    ) -> Self {
        Self {
            policy,
            trust_store,
            chain,
        }
    }

    /// Policy in force.
    #[must_use]
    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Trust store handle.
    #[must_use]
    pub fn trust_store(&self) -> &Arc<SharedTrustStore> {
        &self.trust_store
    }

    /// Evaluate at the current time.
    pub async fn evaluate(&self, cert: &PresentedCertificate) -> ValidationVerdict {
        self.evaluate_at(cert, Utc::now()).await
    }

    /// Evaluate at instant `now`.
    pub async fn evaluate_at(
        &self,
        cert: &PresentedCertificate,
        now: DateTime<Utc>,
    ) -> ValidationVerdict {
        self.evaluate_cancellable(cert, now, &CancellationToken::new())
            .await
    }

    /// Evaluate at instant `now`, giving up on the chain step when `cancel`
    /// fires.  Cancellation yields `crl-check-failed`.
    pub async fn evaluate_cancellable(
        &self,
        cert: &PresentedCertificate,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ValidationVerdict {
        let outcome = AssertUnwindSafe(self.run_checks(cert, now, cancel))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                debug!(subject = %cert.subject, thumbprint = %cert.thumbprint, "Client certificate accepted");
                ValidationVerdict::Accepted {
                    identity: cert.identity_attributes(),
                }
            }
            Ok(Err(reason)) => {
                warn!(
                    subject = %cert.subject,
                    thumbprint = %cert.thumbprint,
                    reason = reason.as_str(),
                    "Client certificate rejected"
                );
                ValidationVerdict::rejected(reason)
            }
            Err(_) => {
                error!(subject = %cert.subject, "Certificate evaluation panicked");
                ValidationVerdict::rejected(RejectReason::ValidationError)
            }
        }
    }

    async fn run_checks(
        &self,
        cert: &PresentedCertificate,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), RejectReason> {
        // 1
        if !self
            .policy
            .issuer_name_matches(cert.issuer_common_name.as_deref())
        {
            return Err(RejectReason::IssuerNameMismatch);
        }

        // 2
        let store = self.trust_store.snapshot();
        let chain = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!(subject = %cert.subject, "Chain validation cancelled");
                return Err(RejectReason::CrlCheckFailed);
            }
            result = self.chain.validate(cert, &store, now) => result,
        };
        let chain = chain.map_err(|e| {
            warn!(subject = %cert.subject, error = %e, "Chain validation failed");
            RejectReason::CrlCheckFailed
        })?;

        // 3
        if let Some(pin) = self.policy.issuer_thumbprint() {
            if normalize_hex(&chain.issuer.thumbprint) != pin {
                return Err(RejectReason::IssuerNotTrusted);
            }
        }

        // 4..8
        check_validity(cert, now)?;
        check_allow_lists(&self.policy, cert)
    }
}

fn check_validity(cert: &PresentedCertificate, now: DateTime<Utc>) -> Result<(), RejectReason> {
    if now > cert.not_after {
        return Err(RejectReason::ExpiredCert);
    }
    if now < cert.not_before {
        return Err(RejectReason::CertNotYetValid);
    }
    Ok(())
}

/// Checks 5 to 8; each only applies when its allow-list is non-empty.
fn check_allow_lists(policy: &PolicyConfig, cert: &PresentedCertificate) -> Result<(), RejectReason> {
    if let Some(serials) = policy.serial_numbers() {
        if !serials.contains(&normalize_hex(&cert.serial)) {
            return Err(RejectReason::SerialMismatch);
        }
    }

    if let Some(allowed) = policy.eku_oids() {
        // A malformed extension counts as missing.
        let ekus = cert
            .extended_key_usages
            .oids()
            .filter(|ekus| !ekus.is_empty())
            .ok_or(RejectReason::EkuMissing)?;
        if !ekus.iter().any(|oid| allowed.contains(oid)) {
            return Err(RejectReason::EkuNotAllowed);
        }
    }

    if let Some(algorithms) = policy.signature_algorithms() {
        if !algorithms.contains(&cert.signature_algorithm.name.to_lowercase()) {
            return Err(RejectReason::SigalgNotAllowed);
        }
    }

    if let Some(thumbprints) = policy.client_thumbprints() {
        if !thumbprints.contains(&normalize_hex(&cert.thumbprint)) {
            return Err(RejectReason::ClientThumbprintNotAllowed);
        }
    }

    Ok(())
}
