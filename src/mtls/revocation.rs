//! CRL-based revocation checking.
//!
//! For every certificate in a chain (except the trust anchor) the checker
//! looks for an *applicable* CRL:
//!
//! - its issuer DN equals the certificate's issuer DN,
//! - its signature verifies with the issuer's public key,
//! - `thisUpdate <= now` and `now <= nextUpdate` (when present),
//! - it is a complete CRL (not a delta) without unrecognized critical
//!   extensions,
//! - its issuing distribution point, if any, covers the certificate: the
//!   user/CA scope matches and the distribution point name is one of the
//!   certificate's CRL distribution points.
//!
//! A CRL partitioned by reason (`onlySomeReasons`) can prove a certificate
//! revoked but never good.
//!
//! Static CRL files are consulted first.  In [`RevocationMode::Online`] the
//! HTTP(S) CRL distribution points of the certificate are fetched next
//! through a [`CrlSource`].  When no applicable CRL can be obtained the
//! status is [`RevocationStatus::Unknown`], which callers treat as a failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use url::Url;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{
    DistributionPointName, GeneralName, IssuingDistributionPoint, ParsedExtension, X509Extension,
};
use x509_parser::prelude::FromDer;
use x509_parser::revocation_list::CertificateRevocationList;

use crate::config::{RevocationConfig, RevocationMode};
use crate::mtls::pem::{self, X509_CRL};
use crate::mtls::trust_store::TrustedIssuer;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Revocation status of a single certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStatus {
    /// An applicable CRL does not list the certificate (or checking is off).
    Good,
    /// An applicable CRL lists the certificate.
    Revoked {
        /// RFC 5280 reason name, `unspecified` when the entry carries none.
        reason: String,
    },
    /// No applicable CRL could be obtained.
    Unknown,
}

impl fmt::Display for RevocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => f.write_str("good"),
            Self::Revoked { reason } => write!(f, "revoked ({reason})"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CRL sources
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches CRL bytes (DER or PEM) from a distribution point.
#[async_trait]
pub trait CrlSource: Send + Sync {
    /// Download the CRL published at `url`.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>>;
}

/// [`CrlSource`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpCrlSource {
    client: reqwest::Client,
}

impl HttpCrlSource {
    /// Build a client whose requests time out after `fetch_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create CRL HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CrlSource for HttpCrlSource {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificate under check
// ─────────────────────────────────────────────────────────────────────────────

/// Owned view of the certificate fields revocation checking needs.
#[derive(Debug, Clone)]
pub struct RevocationTarget {
    /// Subject DN, for logging.
    pub subject: String,
    /// Raw DER integer content of the serial number.
    pub serial: Vec<u8>,
    /// Raw DER of the issuer name.
    pub issuer_raw: Vec<u8>,
    /// `true` when basic constraints mark the certificate as a CA.
    pub is_ca: bool,
    /// Every URI in the CRL distribution points extension, any scheme.
    pub distribution_points: Vec<String>,
    /// HTTP(S) CRL distribution point URIs.
    pub crl_urls: Vec<Url>,
}

impl RevocationTarget {
    /// Extract the fields from a parsed certificate.
    #[must_use]
    pub fn from_cert(cert: &X509Certificate<'_>) -> Self {
        let distribution_points = distribution_point_uris(cert);
        let crl_urls = distribution_points
            .iter()
            .filter_map(|uri| match Url::parse(uri) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
                Ok(url) => {
                    debug!(url = %url, "Skipping non-HTTP CRL distribution point");
                    None
                }
                Err(e) => {
                    debug!(uri = %uri, error = %e, "Skipping malformed CRL distribution point");
                    None
                }
            })
            .collect();

        Self {
            subject: cert.subject().to_string(),
            serial: cert.raw_serial().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            is_ca: cert
                .basic_constraints()
                .ok()
                .flatten()
                .is_some_and(|bc| bc.value.ca),
            distribution_points,
            crl_urls,
        }
    }
}

/// URIs from the full names of the CRL distribution points extension.
fn distribution_point_uris(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut uris = Vec::new();
    for ext in cert.extensions() {
        let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() else {
            continue;
        };
        for point in &points.points {
            let Some(DistributionPointName::FullName(names)) = &point.distribution_point else {
                continue;
            };
            uris.extend(names.iter().filter_map(|name| match name {
                GeneralName::URI(uri) => Some((*uri).to_string()),
                _ => None,
            }));
        }
    }
    uris
}

// ─────────────────────────────────────────────────────────────────────────────
// Checker
// ─────────────────────────────────────────────────────────────────────────────

/// Revocation checker shared by every validation call.
///
/// Holds only immutable data; concurrent checks never contend.
#[derive(Clone)]
pub struct RevocationChecker {
    mode: RevocationMode,
    static_crls: Vec<Vec<u8>>,
    source: Option<Arc<dyn CrlSource>>,
    timeout: Duration,
    fetch_timeout: Duration,
}

impl fmt::Debug for RevocationChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationChecker")
            .field("mode", &self.mode)
            .field("static_crls", &self.static_crls.len())
            .field("online", &self.source.is_some())
            .field("timeout", &self.timeout)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl RevocationChecker {
    /// Checker with the given mode and static CRLs (DER) and no online
    /// source.  Use [`RevocationChecker::with_source`] to enable fetching.
    #[must_use]
    pub fn new(mode: RevocationMode, static_crls: Vec<Vec<u8>>) -> Self {
        let defaults = RevocationConfig::default();
        Self {
            mode,
            static_crls,
            source: None,
            timeout: defaults.timeout,
            fetch_timeout: defaults.fetch_timeout,
        }
    }

    /// Checker that reports every certificate as good.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(RevocationMode::NoCheck, Vec::new())
    }

    /// Build from configuration: load static CRL files and, in online mode,
    /// create an HTTP source.
    ///
    /// # Errors
    ///
    /// Returns an error if a CRL file cannot be read or does not contain a
    /// well-formed CRL.
    pub fn from_config(config: &RevocationConfig) -> Result<Self> {
        let mut static_crls = Vec::new();
        for path in &config.crl_paths {
            static_crls.extend(load_crl_file(path)?);
        }

        let source: Option<Arc<dyn CrlSource>> = match config.mode {
            RevocationMode::Online => Some(Arc::new(HttpCrlSource::new(config.fetch_timeout)?)),
            RevocationMode::Offline => None,
            RevocationMode::NoCheck => {
                warn!("Revocation checking is disabled (revocation.mode = no_check)");
                None
            }
        };

        info!(
            mode = ?config.mode,
            static_crls = static_crls.len(),
            timeout = ?config.timeout,
            "Revocation checker ready"
        );

        Ok(Self {
            mode: config.mode,
            static_crls,
            source,
            timeout: config.timeout,
            fetch_timeout: config.fetch_timeout,
        })
    }

    /// Replace the online CRL source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn CrlSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the whole-chain and per-fetch timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeout: Duration, fetch_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Configured mode.
    #[must_use]
    pub fn mode(&self) -> RevocationMode {
        self.mode
    }

    /// Upper bound for checking a whole chain.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Revocation status of `target`, whose CRLs are signed by `issuer`.
    pub async fn check(
        &self,
        target: &RevocationTarget,
        issuer: &TrustedIssuer,
        now: DateTime<Utc>,
    ) -> RevocationStatus {
        if self.mode == RevocationMode::NoCheck {
            return RevocationStatus::Good;
        }

        if let Some(status) = scan(&self.static_crls, target, issuer, now) {
            debug!(subject = %target.subject, %status, "Revocation status from static CRL");
            return status;
        }

        if self.mode == RevocationMode::Online {
            if let Some(status) = self.check_online(target, issuer, now).await {
                debug!(subject = %target.subject, %status, "Revocation status from CRL distribution point");
                return status;
            }
        }

        warn!(subject = %target.subject, "No applicable CRL found");
        RevocationStatus::Unknown
    }

    async fn check_online(
        &self,
        target: &RevocationTarget,
        issuer: &TrustedIssuer,
        now: DateTime<Utc>,
    ) -> Option<RevocationStatus> {
        let source = self.source.as_ref()?;
        let mut fetched = Vec::new();

        for url in &target.crl_urls {
            let bytes = match tokio::time::timeout(self.fetch_timeout, source.fetch(url)).await {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    warn!(url = %url, error = %e, transport = e.is_transport(), "CRL fetch failed");
                    continue;
                }
                Err(_) => {
                    warn!(url = %url, timeout = ?self.fetch_timeout, "CRL fetch timed out");
                    continue;
                }
            };
            match pem::decode_der_or_pem(&bytes, X509_CRL) {
                Ok(crls) => fetched.extend(crls),
                Err(e) => warn!(url = %url, error = %e, "CRL download is not valid PEM"),
            }
            if let Some(RevocationStatus::Revoked { reason }) = scan(&fetched, target, issuer, now) {
                return Some(RevocationStatus::Revoked { reason });
            }
        }

        scan(&fetched, target, issuer, now)
    }
}

/// Load and sanity-check a static CRL file (PEM or DER).
fn load_crl_file(path: &str) -> Result<Vec<Vec<u8>>> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Revocation(format!("Failed to read CRL '{path}': {e}")))?;
    let crls = pem::decode_der_or_pem(&bytes, X509_CRL)
        .map_err(|e| Error::Revocation(format!("Failed to decode CRL '{path}': {e}")))?;
    if crls.is_empty() {
        return Err(Error::Revocation(format!("No CRL found in '{path}'")));
    }
    for der in &crls {
        CertificateRevocationList::from_der(der)
            .map_err(|e| Error::Revocation(format!("Failed to parse CRL '{path}': {e}")))?;
    }
    info!(path, count = crls.len(), "Loaded static CRL");
    Ok(crls)
}

/// Evaluate every CRL against `target`.
///
/// A revoking CRL wins over one that does not list the serial.  Returns
/// `None` when none of the CRLs is applicable.
fn scan(
    crls: &[Vec<u8>],
    target: &RevocationTarget,
    issuer: &TrustedIssuer,
    now: DateTime<Utc>,
) -> Option<RevocationStatus> {
    let issuer_cert = issuer.parsed().ok()?;
    let mut status = None;

    for der in crls {
        match evaluate_crl(der, target, &issuer_cert, now) {
            Some(revoked @ RevocationStatus::Revoked { .. }) => return Some(revoked),
            Some(other) => status = Some(other),
            None => {}
        }
    }
    status
}

fn evaluate_crl(
    der: &[u8],
    target: &RevocationTarget,
    issuer: &X509Certificate<'_>,
    now: DateTime<Utc>,
) -> Option<RevocationStatus> {
    let crl = match CertificateRevocationList::from_der(der) {
        Ok((_, crl)) => crl,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable CRL");
            return None;
        }
    };

    if crl.issuer().as_raw() != target.issuer_raw.as_slice() {
        return None;
    }

    let now_ts = now.timestamp();
    if now_ts < crl.last_update().timestamp() {
        debug!(issuer = %crl.issuer(), "Ignoring CRL that is not yet valid");
        return None;
    }
    if crl.next_update().is_some_and(|next| now_ts > next.timestamp()) {
        debug!(issuer = %crl.issuer(), "Ignoring stale CRL");
        return None;
    }

    let coverage = crl_coverage(crl.extensions(), target)?;

    if crl.verify_signature(issuer.public_key()).is_err() {
        warn!(issuer = %crl.issuer(), "Ignoring CRL with invalid signature");
        return None;
    }

    let revoked = crl
        .iter_revoked_certificates()
        .find(|entry| entry.raw_serial() == target.serial.as_slice());

    match (revoked, coverage) {
        (Some(entry), _) => Some(RevocationStatus::Revoked {
            reason: entry
                .reason_code()
                .map_or("unspecified", |(_, code)| reason_name(code.0))
                .to_string(),
        }),
        (None, Coverage::Complete) => Some(RevocationStatus::Good),
        (None, Coverage::ListedOnly) => {
            debug!(issuer = %crl.issuer(), "Reason-partitioned CRL cannot prove the certificate good");
            None
        }
    }
}

/// delta-CRL-indicator (RFC 5280 section 5.2.4).
const DELTA_CRL_INDICATOR: &str = "2.5.29.27";

/// What a CRL can say about a certificate it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    /// Absence of the serial means the certificate is not revoked.
    Complete,
    /// Only a listed serial is conclusive.
    ListedOnly,
}

/// Decide from the CRL extensions whether the CRL applies to `target`.
///
/// `None` for delta CRLs, for unrecognized critical extensions and for an
/// issuing distribution point whose scope excludes the certificate.
fn crl_coverage(extensions: &[X509Extension<'_>], target: &RevocationTarget) -> Option<Coverage> {
    let mut coverage = Coverage::Complete;
    for ext in extensions {
        match ext.parsed_extension() {
            ParsedExtension::IssuingDistributionPoint(idp) => {
                if !idp_covers(idp, target) {
                    debug!(subject = %target.subject, "Ignoring CRL whose issuing distribution point excludes the certificate");
                    return None;
                }
                if idp.only_some_reasons.is_some() {
                    coverage = Coverage::ListedOnly;
                }
            }
            ParsedExtension::CRLNumber(_) | ParsedExtension::AuthorityKeyIdentifier(_) => {}
            _ if ext.oid.to_id_string() == DELTA_CRL_INDICATOR => {
                debug!(subject = %target.subject, "Ignoring delta CRL");
                return None;
            }
            _ if ext.critical => {
                debug!(oid = %ext.oid.to_id_string(), "Ignoring CRL with unrecognized critical extension");
                return None;
            }
            _ => {}
        }
    }
    Some(coverage)
}

fn idp_covers(idp: &IssuingDistributionPoint<'_>, target: &RevocationTarget) -> bool {
    if idp.indirect_crl || idp.only_contains_attribute_certs {
        return false;
    }
    if (idp.only_contains_user_certs && target.is_ca)
        || (idp.only_contains_ca_certs && !target.is_ca)
    {
        return false;
    }
    match &idp.distribution_point {
        None => true,
        Some(DistributionPointName::FullName(names)) => names.iter().any(|name| {
            matches!(name, GeneralName::URI(uri)
                if target.distribution_points.iter().any(|dp| dp.as_str() == *uri))
        }),
        Some(DistributionPointName::NameRelativeToCRLIssuer(_)) => false,
    }
}

/// RFC 5280 section 5.3.1 reason names.
fn reason_name(code: u8) -> &'static str {
    match code {
        1 => "keyCompromise",
        2 => "cACompromise",
        3 => "affiliationChanged",
        4 => "superseded",
        5 => "cessationOfOperation",
        6 => "certificateHold",
        8 => "removeFromCRL",
        9 => "privilegeWithdrawn",
        10 => "aACompromise",
        _ => "unspecified",
    }
}
