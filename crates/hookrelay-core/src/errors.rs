//! Core error types.

use thiserror::Error;

/// Webhook signature verification failures.
///
/// Fatal to the request that carried the signature; the ingress layer must
/// reject the event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The rule has a secret but the request carried no signature header.
    #[error("missing X-Hub-Signature-256 header")]
    MissingHeader,

    /// The header is not of the form `sha256=<hex>`.
    #[error("malformed signature header")]
    Malformed,

    /// The computed signature does not match the provided one.
    #[error("invalid signature")]
    Mismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_header_display() {
        assert_eq!(
            SignatureError::MissingHeader.to_string(),
            "missing X-Hub-Signature-256 header"
        );
    }

    #[test]
    fn mismatch_display() {
        assert_eq!(SignatureError::Mismatch.to_string(), "invalid signature");
    }

    #[test]
    fn malformed_display() {
        assert!(SignatureError::Malformed.to_string().contains("malformed"));
    }
}
