//! Compiled certificate policy.
//!
//! [`PolicyConfig`] is built once at startup from [`MtlsConfig`] with
//! [`PolicyConfig::from_config`].  Every identifier is normalized up front so
//! per-request checks are plain set lookups:
//!
//! | Setting | Normalization |
//! |---------|---------------|
//! | thumbprints, serial numbers | separators stripped, uppercase hex |
//! | signature algorithms | trimmed, lowercase |
//! | EKU OIDs, bypass addresses | trimmed |
//!
//! An allow-list that is absent and one that is configured but empty both
//! impose no constraint.  The latter is logged, since it usually means a
//! typo in the configuration.

use std::collections::HashSet;
use std::net::IpAddr;

use tracing::warn;

use crate::mtls::certificate::normalize_hex;
use crate::mtls::config::{MtlsConfig, StringList};
use crate::{Error, Result};

/// Length of a hex-encoded SHA-1 digest.
const SHA1_HEX_LEN: usize = 40;

/// Immutable, validated enforcement rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    issuer_name: String,
    issuer_thumbprint: Option<String>,
    serial_numbers: Option<HashSet<String>>,
    client_thumbprints: Option<HashSet<String>>,
    eku_oids: Option<HashSet<String>>,
    signature_algorithms: Option<HashSet<String>>,
    bypass_addresses: Option<HashSet<String>>,
}

impl PolicyConfig {
    /// Compile and validate the policy.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the issuer name is blank, a thumbprint
    /// is not 40 hex digits, or a serial number is not hex.
    pub fn from_config(config: &MtlsConfig) -> Result<Self> {
        let issuer_name = config.issuer_name.trim();
        if issuer_name.is_empty() {
            return Err(Error::Config("mtls.issuer_name must not be blank".to_string()));
        }

        let issuer_thumbprint = config
            .issuer_thumbprint
            .as_deref()
            .map(normalize_hex)
            .filter(|t| !t.is_empty())
            .map(|t| validate_thumbprint("mtls.issuer_thumbprint", t))
            .transpose()?;

        let serial_numbers = compile(
            "mtls.cert_serial_numbers",
            config.cert_serial_numbers.as_ref(),
            |s| validate_serial(normalize_hex(s)),
        )?;
        let client_thumbprints = compile(
            "mtls.allowed_client_thumbprints",
            config.allowed_client_thumbprints.as_ref(),
            |t| validate_thumbprint("mtls.allowed_client_thumbprints", normalize_hex(t)),
        )?;
        let eku_oids = compile("mtls.allowed_eku_oids", config.allowed_eku_oids.as_ref(), |o| {
            Ok(o.trim().to_string())
        })?;
        let signature_algorithms = compile(
            "mtls.allowed_signature_algorithms",
            config.allowed_signature_algorithms.as_ref(),
            |a| Ok(a.trim().to_lowercase()),
        )?;
        let bypass_addresses = compile(
            "mtls.internal_bypass_ips",
            config.internal_bypass_ips.as_ref(),
            |a| Ok(canonical_address(a.trim())),
        )?;

        Ok(Self {
            issuer_name: issuer_name.to_string(),
            issuer_thumbprint,
            serial_numbers,
            client_thumbprints,
            eku_oids,
            signature_algorithms,
            bypass_addresses,
        })
    }

    /// Required issuer common name.
    #[must_use]
    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    /// `true` when `common_name` case-insensitively equals the required
    /// issuer name.
    #[must_use]
    pub fn issuer_name_matches(&self, common_name: Option<&str>) -> bool {
        common_name.is_some_and(|cn| cn.to_lowercase() == self.issuer_name.to_lowercase())
    }

    /// Pinned issuer thumbprint (normalized), if configured.
    #[must_use]
    pub fn issuer_thumbprint(&self) -> Option<&str> {
        self.issuer_thumbprint.as_deref()
    }

    /// Allowed serial numbers, or `None` when unconstrained.
    #[must_use]
    pub fn serial_numbers(&self) -> Option<&HashSet<String>> {
        active(self.serial_numbers.as_ref())
    }

    /// Allowed client thumbprints, or `None` when unconstrained.
    #[must_use]
    pub fn client_thumbprints(&self) -> Option<&HashSet<String>> {
        active(self.client_thumbprints.as_ref())
    }

    /// Allowed EKU OIDs, or `None` when unconstrained.
    #[must_use]
    pub fn eku_oids(&self) -> Option<&HashSet<String>> {
        active(self.eku_oids.as_ref())
    }

    /// Allowed signature algorithm names (lowercase), or `None` when
    /// unconstrained.
    #[must_use]
    pub fn signature_algorithms(&self) -> Option<&HashSet<String>> {
        active(self.signature_algorithms.as_ref())
    }

    /// `true` when `address` exactly matches a configured bypass address.
    #[must_use]
    pub fn is_bypass_address(&self, address: &str) -> bool {
        active(self.bypass_addresses.as_ref()).is_some_and(|set| set.contains(address))
    }
}

fn active(set: Option<&HashSet<String>>) -> Option<&HashSet<String>> {
    set.filter(|s| !s.is_empty())
}

/// Normalize every item of an optional list, preserving `None` vs empty.
fn compile(
    setting: &str,
    list: Option<&StringList>,
    normalize: impl Fn(&str) -> Result<String>,
) -> Result<Option<HashSet<String>>> {
    let Some(list) = list else {
        return Ok(None);
    };

    let set = list
        .items()
        .iter()
        .map(|item| normalize(item.as_str()))
        .filter(|item| !matches!(item, Ok(s) if s.is_empty()))
        .collect::<Result<HashSet<_>>>()?;

    if set.is_empty() {
        warn!(setting, "Allow-list is configured but empty; no constraint applied");
    }
    Ok(Some(set))
}

/// IP literals in canonical text form (IPv4-mapped IPv6 as plain IPv4);
/// anything else verbatim.
fn canonical_address(value: &str) -> String {
    value
        .parse::<IpAddr>()
        .map_or_else(|_| value.to_string(), |ip| ip.to_canonical().to_string())
}

fn validate_thumbprint(setting: &str, value: String) -> Result<String> {
    if value.len() == SHA1_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(value)
    } else {
        Err(Error::Config(format!(
            "{setting}: '{value}' is not a {SHA1_HEX_LEN}-digit SHA-1 thumbprint"
        )))
    }
}

fn validate_serial(value: String) -> Result<String> {
    if value.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(value)
    } else {
        Err(Error::Config(format!(
            "mtls.cert_serial_numbers: '{value}' is not a hex serial number"
        )))
    }
}
