//! HMAC-SHA256 signatures in the `sha256=<hex>` format.
//!
//! Used to verify gateway callbacks and to sign outbound requests and
//! operator alerts. Stored SHA-256 digests (the admin key) are checked
//! through the same MAC comparison.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

const DIGEST_CHECK_KEY: &[u8] = b"stored-digest-check";

/// Generate HMAC-SHA256 signature for a payload.
///
/// # Returns
///
/// Signature in format: `sha256=<hex_encoded_hmac>`
pub fn generate_signature(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a `sha256=<hex>` signature.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(hex_part) = signature.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time check that `value` hashes to the SHA-256 hex digest
/// `expected_hex` (either case).
///
/// Both digests are MACed under a fixed key and compared with
/// `verify_slice`, so the comparison never exits early.
pub fn verify_sha256_digest(expected_hex: &str, value: &[u8]) -> bool {
    let Ok(expected) = hex::decode(expected_hex.trim()) else {
        return false;
    };
    let Ok(mut expected_mac) = HmacSha256::new_from_slice(DIGEST_CHECK_KEY) else {
        return false;
    };
    expected_mac.update(&expected);
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut mac) = HmacSha256::new_from_slice(DIGEST_CHECK_KEY) else {
        return false;
    };
    mac.update(&Sha256::digest(value));
    mac.verify_slice(&expected_tag).is_ok()
}
