//! CA trust bundle.
//!
//! A [`TrustStore`] is built once from a PEM bundle and never mutated.  The
//! whole bundle is parsed into a local accumulator first; a single malformed
//! block aborts the load, so a partially populated store is never published.
//!
//! [`SharedTrustStore`] lets a running process swap in a new bundle: readers
//! take an `Arc` snapshot, a reload installs a fresh store in one assignment.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use x509_parser::certificate::X509Certificate;

use crate::mtls::certificate::{asn1_to_utc, parse_x509, sha1_thumbprint};
use crate::mtls::pem::{self, CERTIFICATE};

/// Failure to build a [`TrustStore`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The bundle source is missing, blank or unreadable.
    #[error("CA bundle not found: {0}")]
    NotFound(String),

    /// The bundle contains a malformed PEM block or certificate.
    #[error("CA bundle is malformed: {0}")]
    ParseError(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// TrustedIssuer
// ─────────────────────────────────────────────────────────────────────────────

/// A certificate from the CA bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedIssuer {
    der: Vec<u8>,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,

    /// Subject DN in display form.
    pub subject: String,

    /// Issuer DN in display form.
    pub issuer: String,

    /// SHA-1 thumbprint, uppercase hex.
    pub thumbprint: String,

    /// Start of the validity window.
    pub not_before: DateTime<Utc>,

    /// End of the validity window.
    pub not_after: DateTime<Utc>,

    /// `false` only when basicConstraints is present with `CA=false`.
    pub is_ca: bool,

    /// Subject equals issuer and the certificate verifies with its own key.
    pub self_signed: bool,
}

impl TrustedIssuer {
    fn from_der(der: Vec<u8>) -> Result<Self, String> {
        let cert = parse_x509(&der).map_err(|e| e.to_string())?;

        let is_ca = cert
            .basic_constraints()
            .map_err(|e| format!("malformed basicConstraints: {e}"))?
            .is_none_or(|bc| bc.value.ca);

        let subject_raw = cert.subject().as_raw().to_vec();
        let issuer_raw = cert.issuer().as_raw().to_vec();
        let self_signed =
            subject_raw == issuer_raw && cert.verify_signature(Some(cert.public_key())).is_ok();

        let not_before = asn1_to_utc(cert.validity().not_before).map_err(|e| e.to_string())?;
        let not_after = asn1_to_utc(cert.validity().not_after).map_err(|e| e.to_string())?;

        let subject = cert.subject().to_string();
        let issuer = cert.issuer().to_string();
        let thumbprint = sha1_thumbprint(&der);
        drop(cert);

        Ok(Self {
            der,
            subject_raw,
            issuer_raw,
            subject,
            issuer,
            thumbprint,
            not_before,
            not_after,
            is_ca,
            self_signed,
        })
    }

    /// Raw DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Raw DER of the subject name.
    #[must_use]
    pub fn subject_raw(&self) -> &[u8] {
        &self.subject_raw
    }

    /// Raw DER of the issuer name.
    #[must_use]
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// `true` when `now` lies within `[not_before, not_after]`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Re-parse the stored DER.  Parsing succeeded at load time, so this only
    /// fails if the bytes were tampered with in memory.
    pub(crate) fn parsed(&self) -> crate::Result<X509Certificate<'_>> {
        parse_x509(&self.der)
    }

    /// `true` when this certificate's key verifies the signature on `child`.
    pub(crate) fn signed(&self, child: &X509Certificate<'_>) -> bool {
        self.parsed()
            .is_ok_and(|own| child.verify_signature(Some(own.public_key())).is_ok())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TrustStore
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable set of trusted issuer certificates.
#[derive(Debug, Default)]
pub struct TrustStore {
    issuers: Vec<Arc<TrustedIssuer>>,
}

impl TrustStore {
    /// Parse a PEM bundle.
    ///
    /// Empty input or a bundle without any certificate block yields an empty
    /// store (every chain then fails).
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::ParseError`] for non-UTF-8 input, unbalanced PEM
    /// markers, invalid base64, or any block that is not a certificate.
    pub fn load(pem_bundle: &[u8]) -> Result<Self, LoadError> {
        let text = std::str::from_utf8(pem_bundle)
            .map_err(|_| LoadError::ParseError("bundle is not valid UTF-8 text".to_string()))?;
        let blocks =
            pem::decode_blocks(text, CERTIFICATE).map_err(|e| LoadError::ParseError(e.to_string()))?;

        let mut issuers = Vec::with_capacity(blocks.len());
        for (idx, der) in blocks.into_iter().enumerate() {
            let issuer = TrustedIssuer::from_der(der)
                .map_err(|e| LoadError::ParseError(format!("block {}: {e}", idx + 1)))?;
            debug!(
                subject = %issuer.subject,
                thumbprint = %issuer.thumbprint,
                self_signed = issuer.self_signed,
                "Loaded trusted certificate"
            );
            issuers.push(Arc::new(issuer));
        }

        if issuers.is_empty() {
            warn!("CA bundle contains no certificates; every client chain will be rejected");
        }

        Ok(Self { issuers })
    }

    /// Read and parse a PEM bundle from disk.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] for a blank path or an unreadable file,
    /// otherwise the errors of [`TrustStore::load`].
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
            return Err(LoadError::NotFound("no CA bundle path configured".to_string()));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| LoadError::NotFound(format!("{}: {e}", path.display())))?;
        let store = Self::load(&bytes).map_err(|e| match e {
            LoadError::ParseError(msg) => {
                LoadError::ParseError(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;

        info!(path = %path.display(), certificates = store.len(), "Loaded CA bundle");
        Ok(store)
    }

    /// Number of trusted certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    /// `true` when the bundle held no certificates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }

    /// All trusted certificates in bundle order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TrustedIssuer>> {
        self.issuers.iter()
    }

    /// Certificates whose subject DN equals the issuer DN of `cert`.
    pub(crate) fn issuers_of<'a>(
        &'a self,
        cert: &'a X509Certificate<'_>,
    ) -> impl Iterator<Item = &'a Arc<TrustedIssuer>> + 'a {
        let wanted = cert.issuer().as_raw();
        self.issuers.iter().filter(move |i| i.subject_raw() == wanted)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SharedTrustStore
// ─────────────────────────────────────────────────────────────────────────────

/// Atomically replaceable handle to the active [`TrustStore`].
#[derive(Debug)]
pub struct SharedTrustStore {
    inner: RwLock<Arc<TrustStore>>,
}

impl SharedTrustStore {
    /// Wrap an initial store.
    #[must_use]
    pub fn new(store: TrustStore) -> Self {
        Self {
            inner: RwLock::new(Arc::new(store)),
        }
    }

    /// Clone the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TrustStore> {
        Arc::clone(&self.inner.read())
    }

    /// Install a new store.
    pub fn replace(&self, store: TrustStore) {
        *self.inner.write() = Arc::new(store);
    }

    /// Load `path` and install it; on failure the previous snapshot stays.
    ///
    /// Returns the number of certificates in the new store.
    pub fn reload_file(&self, path: impl AsRef<Path>) -> Result<usize, LoadError> {
        match TrustStore::load_file(path) {
            Ok(store) => {
                let count = store.len();
                self.replace(store);
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "CA bundle reload failed; keeping previous trust store");
                Err(e)
            }
        }
    }
}

impl From<TrustStore> for SharedTrustStore {
    fn from(store: TrustStore) -> Self {
        Self::new(store)
    }
}
