//! Webhook signature verification.
//!
//! Every verifier here compares in constant time: a forged signature must
//! take the same code path whether it differs in the first byte, the last
//! byte, or in length.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

/// Verify a Twilio webhook signature (`X-Twilio-Signature`).
///
/// HMAC-SHA1 over the raw request body, base64-encoded. Any `sha1=` prefix
/// on the header value is stripped before decoding.
pub fn verify_twilio_signature(auth_token: &str, body: &[u8], signature_header: &str) -> bool {
    let sig = signature_header
        .strip_prefix("sha1=")
        .unwrap_or(signature_header)
        .trim();

    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(sig) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(body);

    // Constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

/// Verify a generic hex-encoded HMAC-SHA256 signature (LinkMobility-style
/// `X-Link-Signature`, Meta-style `X-Hub-Signature-256`).
pub fn verify_hmac_sha256_hex(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let sig = signature_header
        .strip_prefix("sha256=")
        .unwrap_or(signature_header)
        .trim();

    let Ok(expected) = hex::decode(sig) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&expected).is_ok()
}

/// Constant-time string comparison for short tokens (verify-token handshake).
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();

    // Track length mismatch as a usize (non-zero = different lengths)
    let len_diff = a.len() ^ b.len();

    // XOR each byte, padding the shorter input with zeros.
    // Iterates over max(a.len(), b.len()) to avoid timing differences.
    let max_len = a.len().max(b.len());
    let mut byte_diff = 0u8;
    for i in 0..max_len {
        let x = *a.get(i).unwrap_or(&0);
        let y = *b.get(i).unwrap_or(&0);
        byte_diff |= x ^ y;
    }
    (len_diff == 0) & (byte_diff == 0)
}
