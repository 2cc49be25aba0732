//! mTLS configuration types.
//!
//! Defines the YAML-deserialisable settings for client certificate
//! validation: the trust bundle, the policy allow-lists and revocation
//! checking.  Raw settings are compiled into an immutable
//! [`PolicyConfig`](crate::mtls::PolicyConfig) at startup.
//!
//! # Example YAML
//!
//! ```yaml
//! mtls:
//!   issuer_name: "Test CA"
//!   ca_bundle_path: "/etc/mtls-gate/ca.pem"
//!   error_redirect_url: "/error/403c.html"
//!   cert_serial_numbers: "0A1B2C;0D0E"
//!   allowed_eku_oids: ["1.3.6.1.5.5.7.3.2"]
//!   internal_bypass_ips: ["127.0.0.1"]
//! revocation:
//!   mode: online
//!   timeout: 10s
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Policy settings
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level mTLS configuration block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MtlsConfig {
    /// Common name the client certificate's issuer must carry.  Required.
    pub issuer_name: String,

    /// Path to the PEM bundle of trusted CA certificates.  Required.
    pub ca_bundle_path: String,

    /// Where rejected requests are redirected; `?reason=<code>` is appended.
    #[serde(default = "default_error_redirect_url")]
    pub error_redirect_url: String,

    /// Requests under this path prefix are never redirected, so the error
    /// page itself stays reachable.
    #[serde(default = "default_error_path_prefix")]
    pub error_path_prefix: String,

    /// SHA-1 thumbprint the immediate issuer certificate must have.
    pub issuer_thumbprint: Option<String>,

    /// Allowed client certificate serial numbers (hex).
    pub cert_serial_numbers: Option<StringList>,

    /// Client addresses that skip certificate validation entirely.
    pub internal_bypass_ips: Option<StringList>,

    /// Allowed extended-key-usage OIDs; the certificate needs at least one.
    pub allowed_eku_oids: Option<StringList>,

    /// Allowed signature algorithm names, e.g. `sha256RSA`.
    pub allowed_signature_algorithms: Option<StringList>,

    /// Allowed client certificate SHA-1 thumbprints.
    pub allowed_client_thumbprints: Option<StringList>,
}

impl Default for MtlsConfig {
    fn default() -> Self {
        Self {
            issuer_name: String::new(),
            ca_bundle_path: String::new(),
            error_redirect_url: default_error_redirect_url(),
            error_path_prefix: default_error_path_prefix(),
            issuer_thumbprint: None,
            cert_serial_numbers: None,
            internal_bypass_ips: None,
            allowed_eku_oids: None,
            allowed_signature_algorithms: None,
            allowed_client_thumbprints: None,
        }
    }
}

fn default_error_redirect_url() -> String {
    "/error/403c.html".to_string()
}

fn default_error_path_prefix() -> String {
    "/error".to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Revocation settings
// ─────────────────────────────────────────────────────────────────────────────

/// How certificate revocation is checked.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevocationMode {
    /// Static CRL files first, then CRL distribution points over HTTP(S).
    #[default]
    Online,
    /// Static CRL files only.
    Offline,
    /// Revocation is not checked.
    NoCheck,
}

/// Revocation checking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RevocationConfig {
    /// Checking mode.
    pub mode: RevocationMode,

    /// Static CRL files (PEM or DER), loaded at startup.
    pub crl_paths: Vec<String>,

    /// Upper bound for revocation checking of a whole chain.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Upper bound for a single CRL download.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            mode: RevocationMode::Online,
            crl_paths: Vec::new(),
            timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StringList
// ─────────────────────────────────────────────────────────────────────────────

/// A list option written either as a YAML sequence or as a single string
/// separated by `,` or `;`.
///
/// Items are trimmed and blank items dropped, so `"a; ;b"` and `[" a", "b"]`
/// both yield `["a", "b"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawList", into = "Vec<String>")]
pub struct StringList(Vec<String>);

impl StringList {
    /// Items in configuration order.
    #[must_use]
    pub fn items(&self) -> &[String] {
        &self.0
    }

    /// `true` when no non-blank item was configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for StringList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

impl From<&str> for StringList {
    fn from(value: &str) -> Self {
        value.split([',', ';']).collect()
    }
}

impl From<StringList> for Vec<String> {
    fn from(list: StringList) -> Self {
        list.0
    }
}

/// Wire forms accepted for a [`StringList`].
///
/// Environment overrides are type-inferred by figment, so a purely numeric
/// value arrives as an integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawList {
    Joined(String),
    Integer(u64),
    Items(Vec<RawItem>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawItem {
    Text(String),
    Integer(u64),
}

impl RawItem {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Integer(n) => n.to_string(),
        }
    }
}

impl From<RawList> for StringList {
    fn from(raw: RawList) -> Self {
        match raw {
            RawList::Joined(s) => Self::from(s.as_str()),
            RawList::Integer(n) => Self::from(n.to_string().as_str()),
            RawList::Items(items) => items.into_iter().map(RawItem::into_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        mtls: MtlsConfig,
        #[serde(default)]
        revocation: RevocationConfig,
    }

    fn parse(yaml: &str) -> Wrapper {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = parse("mtls:\n  issuer_name: Test CA\n");
        assert_eq!(cfg.mtls.issuer_name, "Test CA");
        assert_eq!(cfg.mtls.error_redirect_url, "/error/403c.html");
        assert_eq!(cfg.mtls.error_path_prefix, "/error");
        assert!(cfg.mtls.cert_serial_numbers.is_none());
        assert_eq!(cfg.revocation.mode, RevocationMode::Online);
        assert_eq!(cfg.revocation.timeout, Duration::from_secs(10));
        assert_eq!(cfg.revocation.fetch_timeout, Duration::from_secs(5));
    }

    #[test]
    fn joined_string_list_splits_on_comma_and_semicolon() {
        // GIVEN: legacy single-string form with mixed separators and blanks
        let cfg = parse("mtls:\n  cert_serial_numbers: \"0A1B2C; 0D0E, ,FF\"\n");
        // THEN: trimmed items, blanks dropped
        let list = cfg.mtls.cert_serial_numbers.unwrap();
        assert_eq!(list.items(), ["0A1B2C", "0D0E", "FF"]);
    }

    #[test]
    fn sequence_string_list_is_trimmed() {
        let cfg = parse("mtls:\n  internal_bypass_ips: [\" 127.0.0.1 \", \"10.0.0.1\"]\n");
        let list = cfg.mtls.internal_bypass_ips.unwrap();
        assert_eq!(list.items(), ["127.0.0.1", "10.0.0.1"]);
    }

    #[test]
    fn blank_list_is_present_but_empty() {
        let cfg = parse("mtls:\n  allowed_eku_oids: \"\"\n  allowed_client_thumbprints: []\n");
        assert!(cfg.mtls.allowed_eku_oids.unwrap().is_empty());
        assert!(cfg.mtls.allowed_client_thumbprints.unwrap().is_empty());
    }

    #[test]
    fn numeric_list_values_are_kept_as_text() {
        let cfg = parse("mtls:\n  cert_serial_numbers: [1234, \"0A\"]\n");
        assert_eq!(cfg.mtls.cert_serial_numbers.unwrap().items(), ["1234", "0A"]);
    }

    #[test]
    fn revocation_mode_and_durations_parse() {
        let cfg = parse(
            "mtls: {}\nrevocation:\n  mode: no_check\n  timeout: 2s\n  fetch_timeout: 500ms\n  crl_paths: [/tmp/a.crl]\n",
        );
        assert_eq!(cfg.revocation.mode, RevocationMode::NoCheck);
        assert_eq!(cfg.revocation.timeout, Duration::from_secs(2));
        assert_eq!(cfg.revocation.fetch_timeout, Duration::from_millis(500));
        assert_eq!(cfg.revocation.crl_paths, ["/tmp/a.crl"]);
    }

    #[test]
    fn string_list_serializes_as_sequence() {
        let list = StringList::from("a;b");
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }
}
