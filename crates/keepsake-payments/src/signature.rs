//! HMAC-SHA256 signing and verification shared by the Mercado Pago and
//! Yampi adapters.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Lowercase hex HMAC-SHA256 of `payload`
pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    hex::encode(mac(secret, payload))
}

/// Base64 HMAC-SHA256 of `payload`
pub fn sign_base64(secret: &str, payload: &[u8]) -> String {
    STANDARD.encode(mac(secret, payload))
}

/// Verify a hex signature.
///
/// Accepts either a bare hex digest or a `ts=…,v1=<hex>` header.
pub fn verify_hex(secret: &str, payload: &[u8], header: &str) -> bool {
    let provided = extract_v1(header).unwrap_or(header).trim().to_ascii_lowercase();
    !provided.is_empty() && constant_time_eq(sign_hex(secret, payload).as_bytes(), provided.as_bytes())
}

/// Verify a base64 signature
pub fn verify_base64(secret: &str, payload: &[u8], header: &str) -> bool {
    let provided = header.trim();
    !provided.is_empty() && constant_time_eq(sign_base64(secret, payload).as_bytes(), provided.as_bytes())
}

fn extract_v1(header: &str) -> Option<&str> {
    header
        .split(',')
        .filter_map(|part| part.trim().split_once('='))
        .find_map(|(k, v)| (k.trim() == "v1").then_some(v))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
