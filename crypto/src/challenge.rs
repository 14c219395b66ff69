//! Proximity challenge codes.
//!
//! A code is derived deterministically from `(token, scanner, issued_at)`
//! under a server secret, so the same request always yields the same code
//! but a holder who knows the token id cannot precompute it. Only a keyed
//! hash of the code is ever persisted.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Number of decimal digits in a challenge code.
pub const CODE_DIGITS: usize = 6;

const CODE_MODULUS: u32 = 1_000_000;
const DERIVE_DOMAIN: &[u8] = b"baton/challenge-code/v1";
const STORE_DOMAIN: &[u8] = b"baton/challenge-hash/v1";

fn keyed(secret: &[u8], domain: &[u8], parts: &[&[u8]]) -> HmacSha256 {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(domain);
    for part in parts {
        mac.update(&(part.len() as u32).to_be_bytes());
        mac.update(part);
    }
    mac
}

/// Derive the six-digit code a scanner shows to the current holder.
pub fn derive_challenge_code(
    secret: &[u8],
    token_id: &str,
    scanner_id: &str,
    issued_at_millis: u64,
) -> String {
    let digest = keyed(
        secret,
        DERIVE_DOMAIN,
        &[
            token_id.as_bytes(),
            scanner_id.as_bytes(),
            &issued_at_millis.to_be_bytes(),
        ],
    )
    .finalize()
    .into_bytes();
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % CODE_MODULUS;
    format!("{value:0width$}", width = CODE_DIGITS)
}

/// The hex digest stored on the token in place of the plaintext code.
pub fn challenge_code_hash(secret: &[u8], token_id: &str, scanner_id: &str, code: &str) -> String {
    let digest = keyed(
        secret,
        STORE_DOMAIN,
        &[token_id.as_bytes(), scanner_id.as_bytes(), code.as_bytes()],
    )
    .finalize()
    .into_bytes();
    hex::encode(digest)
}

/// Constant-time check of an entered code against a stored hash.
pub fn verify_challenge_code(
    secret: &[u8],
    token_id: &str,
    scanner_id: &str,
    entered_code: &str,
    stored_hash: &str,
) -> bool {
    let Ok(expected) = hex::decode(stored_hash) else {
        return false;
    };
    keyed(
        secret,
        STORE_DOMAIN,
        &[
            token_id.as_bytes(),
            scanner_id.as_bytes(),
            entered_code.trim().as_bytes(),
        ],
    )
    .verify_slice(&expected)
    .is_ok()
}
