//! GitHub webhook signature verification using HMAC-SHA256.
//!
//! GitHub signs each delivery with the shared secret and sends the result in
//! the `X-Hub-Signature-256` header as `sha256=<hex>`. The MAC must be computed
//! over the raw request body exactly as received: re-serializing a parsed
//! payload changes the byte layout and breaks verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Scheme tag GitHub prepends to the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Name of the header carrying the signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Verify `signature_header` against `raw_body` keyed by `secret`.
///
/// An empty `secret` disables verification for the rule and always succeeds.
/// With a non-empty secret a missing (or empty) header is a hard failure.
/// The digest comparison is constant-time.
pub fn verify_signature(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: &[u8],
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Ok(());
    }

    let header = signature_header
        .filter(|h| !h.is_empty())
        .ok_or(SignatureError::MissingHeader)?;
    let provided = parse_signature_header(header).ok_or(SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(raw_body);
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

/// Decode a `sha256=<hex>` header into raw digest bytes.
///
/// Returns `None` for a missing prefix or invalid hex.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.trim().strip_prefix(SIGNATURE_PREFIX)?;
    hex::decode(hex_sig).ok()
}

/// Compute the raw HMAC-SHA256 of `payload` under `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail.
    match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    }
}

/// Format a digest as a header value (`sha256=<hex>`).
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{SIGNATURE_PREFIX}{}", hex::encode(signature))
}

/// Compute and format the header value GitHub would send for `payload`.
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    format_signature_header(&compute_signature(payload, secret))
}
