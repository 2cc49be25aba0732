//! PEM armor decoding for CA bundles, client certificates and CRLs.
//!
//! The decoder is strict: every `BEGIN` marker needs a matching `END` marker,
//! every armored body must be valid padded base64, and a stray `END` marker
//! is an error.  One bad block fails the whole input so callers never end up
//! with a silently shortened list of certificates.
//!
//! Text outside of armored blocks (comments, blank lines, `openssl x509
//! -text` dumps) is ignored.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Label used by X.509 certificate blocks.
pub const CERTIFICATE: &str = "CERTIFICATE";

/// Label used by certificate revocation list blocks.
pub const X509_CRL: &str = "X509 CRL";

/// Failure while decoding PEM armor.
///
/// `block` is 1-based and counts `END` markers seen so far, which is what an
/// operator looking at the file will count too.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PemError {
    /// Input is not valid UTF-8 text.
    #[error("PEM input is not valid UTF-8")]
    NotText,

    /// A `BEGIN` marker is not followed by its `END` marker.
    #[error("block {block}: missing '-----END {label}-----' marker")]
    MissingEnd {
        /// Block position.
        block: usize,
        /// Expected label.
        label: String,
    },

    /// An `END` marker appears without a preceding `BEGIN` marker.
    #[error("block {block}: '-----END {label}-----' without matching BEGIN")]
    UnexpectedEnd {
        /// Block position.
        block: usize,
        /// Expected label.
        label: String,
    },

    /// The armored body is empty.
    #[error("block {block}: empty body")]
    EmptyBlock {
        /// Block position.
        block: usize,
    },

    /// The armored body is not valid base64.
    #[error("block {block}: invalid base64: {reason}")]
    Base64 {
        /// Block position.
        block: usize,
        /// Decoder message.
        reason: String,
    },
}

/// Decode every `label` block in `text` into DER bytes, in file order.
///
/// Returns an empty vector when the text contains no block at all.
pub fn decode_blocks(text: &str, label: &str) -> Result<Vec<Vec<u8>>, PemError> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let pieces: Vec<&str> = text.split(end.as_str()).collect();
    let last = pieces.len().saturating_sub(1);
    let mut blocks = Vec::new();

    for (idx, piece) in pieces.iter().enumerate() {
        let block = idx + 1;
        let terminated = idx < last;

        let Some(start) = piece.find(begin.as_str()) else {
            if terminated {
                return Err(PemError::UnexpectedEnd {
                    block,
                    label: label.to_owned(),
                });
            }
            continue;
        };

        let body = &piece[start + begin.len()..];
        // A second BEGIN inside the same fragment means the previous block
        // was never closed.
        if !terminated || body.contains(begin.as_str()) {
            return Err(PemError::MissingEnd {
                block,
                label: label.to_owned(),
            });
        }

        let encoded: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if encoded.is_empty() {
            return Err(PemError::EmptyBlock { block });
        }

        let der = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| PemError::Base64 {
                block,
                reason: e.to_string(),
            })?;
        blocks.push(der);
    }

    Ok(blocks)
}

/// Accept either PEM text or a single raw DER object.
///
/// Input that contains a `-----BEGIN` marker is treated as PEM and must be
/// UTF-8; anything else is returned unchanged as one DER blob.
pub fn decode_der_or_pem(bytes: &[u8], label: &str) -> Result<Vec<Vec<u8>>, PemError> {
    if !looks_like_pem(bytes) {
        return Ok(vec![bytes.to_vec()]);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| PemError::NotText)?;
    decode_blocks(text, label)
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    const MARKER: &[u8] = b"-----BEGIN";
    bytes.windows(MARKER.len()).any(|w| w == MARKER)
}
