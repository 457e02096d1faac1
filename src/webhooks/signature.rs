//! Webhook authenticity checks.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw body and sends the
//! result in `X-Hub-Signature-256` as `sha256=<hex>`. GitLab does not sign
//! payloads; it echoes the configured secret back in `X-Gitlab-Token`.
//!
//! Both checks run over the raw request, before any JSON parsing. Whether a
//! secret is configured at all is decided by the caller; these functions
//! always verify.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the GitHub signature header value.
const SIGNATURE_PREFIX: &str = "sha256=";

/// Parses a GitHub signature header (`sha256=<hex>`) into raw bytes.
///
/// Returns `None` for a missing prefix, another algorithm, or invalid hex.
///
/// # Examples
///
/// ```
/// use merge_relay::webhooks::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=00ff"), Some(vec![0x00, 0xff]));
/// assert!(parse_signature_header("sha1=00ff").is_none());
/// assert!(parse_signature_header("sha256=not-hex").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix(SIGNATURE_PREFIX)?;
    hex::decode(hex_sig).ok()
}

/// Computes the raw HMAC-SHA256 of a payload.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats raw signature bytes as a `sha256=<hex>` header value.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(signature))
}

/// Computes the `X-Hub-Signature-256` header value GitHub would send.
pub fn sign_payload(payload: &[u8], secret: &[u8]) -> String {
    format_signature_header(&compute_signature(payload, secret))
}

/// Verifies a GitHub signature header against the raw payload.
///
/// The MAC comparison is constant-time. Malformed headers return `false`.
///
/// # Examples
///
/// ```
/// use merge_relay::webhooks::{sign_payload, verify_signature};
///
/// let body = br#"{"action":"closed"}"#;
/// let header = sign_payload(body, b"hook-secret");
///
/// assert!(verify_signature(body, &header, b"hook-secret"));
/// assert!(!verify_signature(body, &header, b"other-secret"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);

    mac.verify_slice(&expected).is_ok()
}

/// Verifies a GitLab `X-Gitlab-Token` header against the configured secret.
///
/// Runs in constant time with respect to the token contents. Tokens of
/// different lengths never match.
///
/// # Examples
///
/// ```
/// use merge_relay::webhooks::verify_token;
///
/// assert!(verify_token("s3cret", "s3cret"));
/// assert!(!verify_token("guess", "s3cret"));
/// ```
pub fn verify_token(token: &str, secret: &str) -> bool {
    token.as_bytes().ct_eq(secret.as_bytes()).into()
}
