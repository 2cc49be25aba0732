//! Presented client certificate.
//!
//! Parses the DER-encoded leaf certificate a client presented during the TLS
//! handshake and extracts every field the validation pipeline looks at:
//! subject and issuer DNs, serial number, SHA-1 thumbprint, validity window,
//! signature algorithm and the extended-key-usage OID list.
//!
//! Parsing is strict about the certificate itself: trailing bytes or a
//! malformed structure are a parse failure, which the pipeline turns into a
//! `validation-error` rejection.  An undecodable or duplicated EKU extension
//! is recorded as [`ExtendedKeyUsages::Malformed`] and only matters when an
//! EKU allow-list is configured.

use chrono::{DateTime, Utc};
use ring::digest::{SHA1_FOR_LEGACY_USE_ONLY, digest};
use serde::Serialize;
use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::ExtendedKeyUsage;
use x509_parser::prelude::FromDer;
use x509_parser::time::ASN1Time;
use x509_parser::x509::X509Name;

use crate::mtls::pem::{self, CERTIFICATE};
use crate::{Error, Result};

/// Format used for `notBefore` / `notAfter` identity attributes
/// (sortable ISO 8601, UTC, second precision).
const ATTRIBUTE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ─────────────────────────────────────────────────────────────────────────────
// Presented certificate
// ─────────────────────────────────────────────────────────────────────────────

/// Signature algorithm of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureAlgorithm {
    /// Dotted OID, e.g. `1.2.840.113549.1.1.11`.
    pub oid: String,
    /// Display name, e.g. `sha256RSA`.  Falls back to the dotted OID for
    /// algorithms without a well-known name.
    pub name: String,
}

impl SignatureAlgorithm {
    fn from_oid(oid: String) -> Self {
        let name = signature_algorithm_name(&oid).map_or_else(|| oid.clone(), str::to_owned);
        Self { oid, name }
    }
}

/// The leaf certificate under evaluation.
///
/// Built per request from the peer certificate and dropped once the verdict
/// is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedCertificate {
    der: Vec<u8>,

    /// Subject DN in RFC 4514-like display form (`CN=alice, O=Example`).
    pub subject: String,

    /// Issuer DN in display form.
    pub issuer: String,

    /// First CN attribute of the issuer DN.
    pub issuer_common_name: Option<String>,

    /// Serial number: uppercase hex of the DER integer content, no separators.
    pub serial: String,

    /// SHA-1 thumbprint of the DER encoding: uppercase hex, no separators.
    pub thumbprint: String,

    /// Start of the validity window.
    pub not_before: DateTime<Utc>,

    /// End of the validity window.
    pub not_after: DateTime<Utc>,

    /// Signature algorithm used by the issuer to sign this certificate.
    pub signature_algorithm: SignatureAlgorithm,

    /// Extended-key-usage purposes.
    pub extended_key_usages: ExtendedKeyUsages,
}

/// The extended-key-usage extension of a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendedKeyUsages {
    /// No EKU extension.
    Absent,
    /// Purposes as dotted OIDs.
    Listed(Vec<String>),
    /// The extension is present but cannot be decoded, or appears twice.
    Malformed,
}

impl ExtendedKeyUsages {
    fn from_cert(cert: &X509Certificate<'_>) -> Self {
        match cert.extended_key_usage() {
            Ok(Some(ext)) => Self::Listed(eku_oids(ext.value)),
            Ok(None) => Self::Absent,
            Err(e) => {
                debug!(error = %e, "Malformed extended key usage extension");
                Self::Malformed
            }
        }
    }

    /// Dotted OIDs, when the extension is present and well formed.
    #[must_use]
    pub fn oids(&self) -> Option<&[String]> {
        match self {
            Self::Listed(oids) => Some(oids),
            Self::Absent | Self::Malformed => None,
        }
    }
}

impl PresentedCertificate {
    /// Parse a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns `Error::Certificate` when the bytes are not exactly one
    /// well-formed X.509 certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let cert = parse_x509(der)?;

        let extended_key_usages = ExtendedKeyUsages::from_cert(&cert);

        Ok(Self {
            der: der.to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            issuer_common_name: common_name(cert.issuer()),
            serial: hex::encode_upper(cert.raw_serial()),
            thumbprint: sha1_thumbprint(der),
            not_before: asn1_to_utc(cert.validity().not_before)?,
            not_after: asn1_to_utc(cert.validity().not_after)?,
            signature_algorithm: SignatureAlgorithm::from_oid(
                cert.signature_algorithm.algorithm.to_id_string(),
            ),
            extended_key_usages,
        })
    }

    /// Parse the first certificate of a PEM document (or a raw DER blob).
    ///
    /// Additional blocks after the first one (a chain sent along with the
    /// leaf) are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error when the armor is malformed, no certificate block is
    /// present, or the first certificate cannot be parsed.
    pub fn from_pem(bytes: &[u8]) -> Result<Self> {
        let blocks = pem::decode_der_or_pem(bytes, CERTIFICATE)?;
        let leaf = blocks
            .first()
            .ok_or_else(|| Error::Certificate("No certificate found in PEM input".to_string()))?;
        Self::from_der(leaf)
    }

    /// Raw DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Identity attributes handed to downstream components on acceptance.
    #[must_use]
    pub fn identity_attributes(&self) -> IdentityAttributes {
        IdentityAttributes::from(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity attributes
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only identity of an accepted client.
///
/// This is the contract surface propagated to application code, so field
/// names and formats are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityAttributes {
    /// Subject DN.
    pub subject: String,
    /// Normalized SHA-1 thumbprint.
    pub thumbprint: String,
    /// Issuer DN.
    pub issuer: String,
    /// Serial number (uppercase hex).
    pub serial: String,
    /// Start of validity, `YYYY-MM-DDTHH:MM:SS` UTC.
    pub not_before: String,
    /// End of validity, `YYYY-MM-DDTHH:MM:SS` UTC.
    pub not_after: String,
    /// Signature algorithm display name.
    pub signature_algorithm: String,
}

impl IdentityAttributes {
    /// Attribute `(name, value)` pairs in a fixed order.
    #[must_use]
    pub fn pairs(&self) -> [(&'static str, &str); 7] {
        [
            ("subject", &self.subject),
            ("thumbprint", &self.thumbprint),
            ("issuer", &self.issuer),
            ("serial", &self.serial),
            ("valid-from", &self.not_before),
            ("valid-to", &self.not_after),
            ("signature-alg", &self.signature_algorithm),
        ]
    }
}

impl From<&PresentedCertificate> for IdentityAttributes {
    fn from(cert: &PresentedCertificate) -> Self {
        Self {
            subject: cert.subject.clone(),
            thumbprint: cert.thumbprint.clone(),
            issuer: cert.issuer.clone(),
            serial: cert.serial.clone(),
            not_before: cert.not_before.format(ATTRIBUTE_TIME_FORMAT).to_string(),
            not_after: cert.not_after.format(ATTRIBUTE_TIME_FORMAT).to_string(),
            signature_algorithm: cert.signature_algorithm.name.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Normalize a hex identifier (thumbprint or serial number) for comparison.
///
/// Strips whitespace, `:` and `-` separators and upper-cases the rest.
/// Idempotent.
#[must_use]
pub fn normalize_hex(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

/// SHA-1 thumbprint of DER bytes, uppercase hex.
#[must_use]
pub fn sha1_thumbprint(der: &[u8]) -> String {
    hex::encode_upper(digest(&SHA1_FOR_LEGACY_USE_ONLY, der))
}

/// Parse exactly one DER certificate, rejecting trailing data.
pub(crate) fn parse_x509(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (rest, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::Certificate(format!("Failed to parse certificate: {e}")))?;
    if !rest.is_empty() {
        return Err(Error::Certificate(format!(
            "{} trailing bytes after certificate",
            rest.len()
        )));
    }
    Ok(cert)
}

/// First CN attribute of a distinguished name.
pub(crate) fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

pub(crate) fn asn1_to_utc(time: ASN1Time) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| Error::Certificate(format!("Timestamp out of range: {time}")))
}

/// Flatten the parsed EKU extension back into dotted OIDs.
fn eku_oids(eku: &ExtendedKeyUsage<'_>) -> Vec<String> {
    let known = [
        (eku.any, "2.5.29.37.0"),
        (eku.server_auth, "1.3.6.1.5.5.7.3.1"),
        (eku.client_auth, "1.3.6.1.5.5.7.3.2"),
        (eku.code_signing, "1.3.6.1.5.5.7.3.3"),
        (eku.email_protection, "1.3.6.1.5.5.7.3.4"),
        (eku.time_stamping, "1.3.6.1.5.5.7.3.8"),
        (eku.ocsp_signing, "1.3.6.1.5.5.7.3.9"),
    ];

    known
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, oid)| (*oid).to_owned())
        .chain(eku.other.iter().map(|oid| oid.to_id_string()))
        .collect()
}

/// Well-known display names for signature algorithm OIDs.
fn signature_algorithm_name(oid: &str) -> Option<&'static str> {
    let name = match oid {
        "1.2.840.113549.1.1.4" => "md5RSA",
        "1.2.840.113549.1.1.5" | "1.3.14.3.2.29" => "sha1RSA",
        "1.2.840.113549.1.1.10" => "RSASSA-PSS",
        "1.2.840.113549.1.1.11" => "sha256RSA",
        "1.2.840.113549.1.1.12" => "sha384RSA",
        "1.2.840.113549.1.1.13" => "sha512RSA",
        "1.2.840.10045.4.1" => "sha1ECDSA",
        "1.2.840.10045.4.3.2" => "sha256ECDSA",
        "1.2.840.10045.4.3.3" => "sha384ECDSA",
        "1.2.840.10045.4.3.4" => "sha512ECDSA",
        "1.3.101.112" => "Ed25519",
        "1.3.101.113" => "Ed448",
        _ => return None,
    };
    Some(name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
