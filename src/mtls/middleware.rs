//! axum middleware enforcing client certificate validation.
//!
//! The TLS-terminating acceptor inserts a [`TlsSession`] extension into each
//! request (and, optionally, a [`ClientAddr`]).  [`mtls_middleware`] then:
//!
//! 1. removes any inbound `x-client-cert-*` headers, so clients cannot spoof
//!    identity attributes,
//! 2. lets configured bypass addresses through untouched,
//! 3. redirects plain-HTTP requests (`insecure-connection`),
//! 4. passes requests for the error pages through,
//! 5. redirects requests without a client certificate (`missing-cert`),
//! 6. runs the [`ValidationPipeline`] and either forwards the request with
//!    [`IdentityAttributes`] attached or redirects with the reason code.
//!
//! # Example
//!
//! ```rust,ignore
//! let guard = Arc::new(MtlsGuard::new(pipeline, &config.mtls));
//! let app = Router::new()
//!     .route("/", get(handler))
//!     .layer(axum::middleware::from_fn_with_state(guard, mtls_middleware));
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

use crate::config::MtlsConfig;
use crate::mtls::certificate::{IdentityAttributes, PresentedCertificate};
use crate::mtls::pipeline::{RejectReason, ValidationPipeline, ValidationVerdict};

/// Prefix of the headers carrying identity attributes downstream.
pub const CLIENT_CERT_HEADER_PREFIX: &str = "x-client-cert-";

// ─────────────────────────────────────────────────────────────────────────────
// Request extensions
// ─────────────────────────────────────────────────────────────────────────────

/// TLS details of the connection a request arrived on.
///
/// Absent on plain-HTTP connections.
#[derive(Debug, Clone, Default)]
pub struct TlsSession {
    /// Leaf certificate presented by the client, if any.
    pub peer_certificate: Option<CertificateDer<'static>>,
}

impl TlsSession {
    /// Session where the client presented `cert`.
    #[must_use]
    pub fn with_peer_certificate(cert: CertificateDer<'static>) -> Self {
        Self {
            peer_certificate: Some(cert),
        }
    }

    /// Session from a rustls peer certificate list (leaf first).
    #[must_use]
    pub fn from_peer_certificates(certs: Option<&[CertificateDer<'_>]>) -> Self {
        Self {
            peer_certificate: certs
                .and_then(<[_]>::first)
                .map(|c| c.clone().into_owned()),
        }
    }
}

/// Client address as seen by the acceptor (e.g. after PROXY protocol).
///
/// Takes precedence over axum's `ConnectInfo<SocketAddr>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

// ─────────────────────────────────────────────────────────────────────────────
// Guard
// ─────────────────────────────────────────────────────────────────────────────

/// Middleware state.
#[derive(Debug)]
pub struct MtlsGuard {
    pipeline: Arc<ValidationPipeline>,
    error_redirect_url: String,
    error_path_prefix: String,
}

impl MtlsGuard {
    /// Guard redirecting to the error URL configured in `config`.
    #[must_use]
    pub fn new(pipeline: Arc<ValidationPipeline>, config: &MtlsConfig) -> Self {
        Self {
            pipeline,
            error_redirect_url: config.error_redirect_url.clone(),
            error_path_prefix: config.error_path_prefix.to_lowercase(),
        }
    }

    /// Pipeline used for evaluation.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<ValidationPipeline> {
        &self.pipeline
    }

    /// `Location` for a rejection with `reason`.
    #[must_use]
    pub fn redirect_location(&self, reason: RejectReason) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("reason", reason.as_str())
            .finish();
        let separator = if self.error_redirect_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{separator}{query}", self.error_redirect_url)
    }

    fn redirect(&self, reason: RejectReason) -> Response {
        let location = self.redirect_location(reason);
        match HeaderValue::from_str(&location) {
            Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
            Err(_) => {
                warn!(location = %location, "Error redirect URL is not a valid header value");
                StatusCode::FORBIDDEN.into_response()
            }
        }
    }

    fn is_error_path(&self, path: &str) -> bool {
        !self.error_path_prefix.is_empty()
            && path.to_lowercase().starts_with(&self.error_path_prefix)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Client certificate enforcement middleware.
pub async fn mtls_middleware(
    State(guard): State<Arc<MtlsGuard>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    strip_identity_headers(request.headers_mut());

    if let Some(ip) = client_ip(&request) {
        if guard.pipeline.policy().is_bypass_address(&ip.to_string()) {
            debug!(client = %ip, "Bypass address, skipping certificate validation");
            return next.run(request).await;
        }
    }

    let Some(session) = request.extensions().get::<TlsSession>().cloned() else {
        warn!(path = %request.uri().path(), "Request did not arrive over TLS");
        return guard.redirect(RejectReason::InsecureConnection);
    };

    if guard.is_error_path(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(der) = session.peer_certificate else {
        warn!(path = %request.uri().path(), "No client certificate presented");
        return guard.redirect(RejectReason::MissingCert);
    };

    let cert = match PresentedCertificate::from_der(der.as_ref()) {
        Ok(cert) => cert,
        Err(e) => {
            warn!(error = %e, "Client certificate could not be parsed");
            return guard.redirect(RejectReason::ValidationError);
        }
    };

    match guard.pipeline.evaluate(&cert).await {
        ValidationVerdict::Accepted { identity } => {
            insert_identity_headers(request.headers_mut(), &identity);
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        ValidationVerdict::Rejected { reason } => guard.redirect(reason),
    }
}

/// Peer address in canonical form: an IPv4 client on a dual-stack listener
/// shows up as `::ffff:a.b.c.d` and is reported as `a.b.c.d`.
fn client_ip(request: &Request<Body>) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ClientAddr>()
        .map(|addr| addr.0)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
        .map(|ip| ip.to_canonical())
}

fn strip_identity_headers(headers: &mut HeaderMap) {
    let spoofed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(CLIENT_CERT_HEADER_PREFIX))
        .cloned()
        .collect();
    for name in spoofed {
        warn!(header = %name, "Removing inbound client certificate header");
        headers.remove(&name);
    }
}

fn insert_identity_headers(headers: &mut HeaderMap, identity: &IdentityAttributes) {
    for (attribute, value) in identity.pairs() {
        let name = format!("{CLIENT_CERT_HEADER_PREFIX}{attribute}");
        match (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(attribute, "Identity attribute not representable as a header"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtls::chain::ChainValidator;
    use crate::mtls::policy::PolicyConfig;
    use crate::mtls::revocation::RevocationChecker;
    use crate::mtls::testing::TestCa;
    use crate::mtls::trust_store::{SharedTrustStore, TrustStore};

    fn guard(redirect: &str) -> MtlsGuard {
        let ca = TestCa::root("Test CA");
        let config = MtlsConfig {
            issuer_name: "Test CA".to_string(),
            error_redirect_url: redirect.to_string(),
            ..MtlsConfig::default()
        };
        let pipeline = ValidationPipeline::new(
            PolicyConfig::from_config(&config).unwrap(),
            Arc::new(SharedTrustStore::new(
                TrustStore::load(ca.pem().as_bytes()).unwrap(),
            )),
            ChainValidator::new(RevocationChecker::disabled()),
        );
        MtlsGuard::new(Arc::new(pipeline), &config)
    }

    #[test]
    fn redirect_location_appends_reason() {
        let g = guard("/error/403c.html");
        assert_eq!(
            g.redirect_location(RejectReason::ExpiredCert),
            "/error/403c.html?reason=expired-cert"
        );
    }

    #[test]
    fn redirect_location_extends_existing_query() {
        let g = guard("https://portal.example.test/denied?lang=sv");
        assert_eq!(
            g.redirect_location(RejectReason::MissingCert),
            "https://portal.example.test/denied?lang=sv&reason=missing-cert"
        );
    }

    #[test]
    fn error_path_match_is_case_insensitive_prefix() {
        let g = guard("/error/403c.html");
        assert!(g.is_error_path("/error/403c.html"));
        assert!(g.is_error_path("/ERROR/styles.css"));
        assert!(!g.is_error_path("/api/error"));
    }

    #[test]
    fn strip_removes_only_identity_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-client-cert-subject", HeaderValue::from_static("CN=mallory"));
        headers.insert("x-client-cert-thumbprint", HeaderValue::from_static("00"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        strip_identity_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-request-id"));
    }

    #[test]
    fn tls_session_takes_leaf_from_peer_list() {
        let leaf = CertificateDer::from(vec![1, 2, 3]);
        let intermediate = CertificateDer::from(vec![4, 5, 6]);
        let chain = [leaf.clone(), intermediate];
        let session = TlsSession::from_peer_certificates(Some(&chain));
        assert_eq!(session.peer_certificate, Some(leaf));
        assert!(TlsSession::from_peer_certificates(None).peer_certificate.is_none());
    }
}
