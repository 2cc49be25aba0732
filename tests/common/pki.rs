//! Throwaway PKI for tests: root and intermediate CAs, client leaves and CRLs
//! generated with `rcgen`.
//!
//! Shared between the library's unit tests and the integration tests, so it
//! only depends on `rcgen`, `time` and `chrono`.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, CrlDistributionPoint,
    CrlIssuingDistributionPoint, CrlScope, CustomExtension, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose,
    RevocationReason, RevokedCertParams, SerialNumber,
};
use time::OffsetDateTime;

/// Midnight UTC on the given day.
pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("valid date")
}

fn to_offset(dt: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(dt.timestamp()).expect("timestamp in range")
}

fn dn(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn
}

/// DER and PEM encodings of one generated object.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub der: Vec<u8>,
    pub pem: String,
}

// ── Certificate authorities ──────────────────────────────────────────────────

/// A CA that can issue leaves, sub-CAs and CRLs.
pub struct TestCa {
    pub cert: Encoded,
    params: CertificateParams,
    issuer: Issuer<'static, KeyPair>,
}

/// Options for a CA certificate.
#[derive(Debug, Clone)]
pub struct CaSpec {
    pub common_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
}

impl CaSpec {
    pub fn new(common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            not_before: utc(2020, 1, 1),
            not_after: utc(2045, 1, 1),
            is_ca: true,
        }
    }

    pub fn validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Issue the certificate without the CA basic constraint.
    pub fn not_ca(mut self) -> Self {
        self.is_ca = false;
        self
    }

    fn params(&self) -> CertificateParams {
        let mut params = CertificateParams::default();
        params.distinguished_name = dn(&self.common_name);
        params.not_before = to_offset(self.not_before);
        params.not_after = to_offset(self.not_after);
        if self.is_ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
            ];
        } else {
            params.is_ca = IsCa::ExplicitNoCa;
        }
        params
    }
}

impl TestCa {
    /// Self-signed root with default validity (2020 to 2045).
    pub fn root(common_name: &str) -> Self {
        Self::root_with(&CaSpec::new(common_name))
    }

    pub fn root_with(spec: &CaSpec) -> Self {
        let key = KeyPair::generate().expect("generate CA key");
        let params = spec.params();
        let cert = params.self_signed(&key).expect("self-sign CA");
        Self {
            cert: Encoded {
                der: cert.der().to_vec(),
                pem: cert.pem(),
            },
            issuer: Issuer::new(params.clone(), key),
            params,
        }
    }

    /// Sub-CA signed by this CA.
    pub fn intermediate(&self, common_name: &str) -> Self {
        self.intermediate_with(&CaSpec::new(common_name))
    }

    pub fn intermediate_with(&self, spec: &CaSpec) -> Self {
        let key = KeyPair::generate().expect("generate sub-CA key");
        let params = spec.params();
        let cert = params.signed_by(&key, &self.issuer).expect("sign sub-CA");
        Self {
            cert: Encoded {
                der: cert.der().to_vec(),
                pem: cert.pem(),
            },
            issuer: Issuer::new(params.clone(), key),
            params,
        }
    }

    /// Certificate with this CA's subject and key, signed by `other`.
    pub fn cross_signed_by(&self, other: &TestCa) -> Encoded {
        let cert = self
            .params
            .signed_by(self.issuer.key(), &other.issuer)
            .expect("cross-sign CA");
        Encoded {
            der: cert.der().to_vec(),
            pem: cert.pem(),
        }
    }

    pub fn der(&self) -> &[u8] {
        &self.cert.der
    }

    pub fn pem(&self) -> String {
        self.cert.pem.clone()
    }

    /// Client certificate signed by this CA.
    pub fn leaf(&self, spec: &LeafSpec) -> Encoded {
        let key = KeyPair::generate().expect("generate leaf key");
        let cert = spec
            .params()
            .signed_by(&key, &self.issuer)
            .expect("sign leaf");
        Encoded {
            der: cert.der().to_vec(),
            pem: cert.pem(),
        }
    }

    /// CRL signed by this CA.
    pub fn crl(&self, spec: &CrlSpec) -> Encoded {
        let params = CertificateRevocationListParams {
            this_update: to_offset(spec.this_update),
            next_update: to_offset(spec.next_update),
            crl_number: SerialNumber::from_slice(&[1]),
            issuing_distribution_point: spec.partition.as_ref().map(|(url, scope)| {
                CrlIssuingDistributionPoint {
                    distribution_point: CrlDistributionPoint {
                        uris: vec![url.clone()],
                    },
                    scope: *scope,
                }
            }),
            revoked_certs: spec
                .revoked
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: SerialNumber::from_slice(serial),
                    revocation_time: to_offset(spec.this_update),
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        let crl = params.signed_by(&self.issuer).expect("sign CRL");
        Encoded {
            der: crl.der().to_vec(),
            pem: crl.pem().expect("CRL PEM"),
        }
    }
}

// ── Leaves ───────────────────────────────────────────────────────────────────

/// Options for a client certificate.
#[derive(Debug, Clone)]
pub struct LeafSpec {
    pub common_name: String,
    pub serial: Option<Vec<u8>>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub eku: Vec<ExtendedKeyUsagePurpose>,
    pub crl_urls: Vec<String>,
    pub raw_eku: Option<Vec<u8>>,
}

impl LeafSpec {
    pub fn new(common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            serial: None,
            not_before: utc(2024, 1, 1),
            not_after: utc(2034, 1, 1),
            eku: Vec::new(),
            crl_urls: Vec::new(),
            raw_eku: None,
        }
    }

    /// Serial number bytes.  Keep the high bit of the first byte clear so the
    /// DER integer has no padding byte.
    pub fn serial(mut self, bytes: &[u8]) -> Self {
        self.serial = Some(bytes.to_vec());
        self
    }

    pub fn validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    pub fn eku(mut self, purposes: Vec<ExtendedKeyUsagePurpose>) -> Self {
        self.eku = purposes;
        self
    }

    pub fn client_auth(self) -> Self {
        self.eku(vec![ExtendedKeyUsagePurpose::ClientAuth])
    }

    pub fn crl_url(mut self, url: &str) -> Self {
        self.crl_urls.push(url.to_string());
        self
    }

    /// Extended key usage extension with arbitrary (possibly malformed)
    /// content, replacing `eku`.
    pub fn raw_eku(mut self, content: &[u8]) -> Self {
        self.raw_eku = Some(content.to_vec());
        self
    }

    fn params(&self) -> CertificateParams {
        let mut params = CertificateParams::default();
        params.distinguished_name = dn(&self.common_name);
        params.not_before = to_offset(self.not_before);
        params.not_after = to_offset(self.not_after);
        params.is_ca = IsCa::NoCa;
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = self.eku.clone();
        if let Some(content) = &self.raw_eku {
            params.extended_key_usages.clear();
            params
                .custom_extensions
                .push(CustomExtension::from_oid_content(&[2, 5, 29, 37], content.clone()));
        }
        params.serial_number = self.serial.as_deref().map(SerialNumber::from_slice);
        if !self.crl_urls.is_empty() {
            params.crl_distribution_points = vec![CrlDistributionPoint {
                uris: self.crl_urls.clone(),
            }];
        }
        params
    }
}

// ── CRLs ─────────────────────────────────────────────────────────────────────

/// Options for a CRL.
#[derive(Debug, Clone)]
pub struct CrlSpec {
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub revoked: Vec<Vec<u8>>,
    pub partition: Option<(String, Option<CrlScope>)>,
}

impl CrlSpec {
    pub fn new() -> Self {
        Self {
            this_update: utc(2024, 1, 1),
            next_update: utc(2040, 1, 1),
            revoked: Vec::new(),
            partition: None,
        }
    }

    pub fn revoke(mut self, serial: &[u8]) -> Self {
        self.revoked.push(serial.to_vec());
        self
    }

    pub fn window(mut self, this_update: DateTime<Utc>, next_update: DateTime<Utc>) -> Self {
        self.this_update = this_update;
        self.next_update = next_update;
        self
    }

    /// Add an issuing distribution point for `url`, optionally restricted to
    /// user or CA certificates.
    pub fn partition(mut self, url: &str, scope: Option<CrlScope>) -> Self {
        self.partition = Some((url.to_string(), scope));
        self
    }
}

impl Default for CrlSpec {
    fn default() -> Self {
        Self::new()
    }
}
