//! Notification signature: lowercase hex SHA-512 over
//! `order_id + status_code + gross_amount + server_key`.

use sha2::{Digest, Sha512};

pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recomputes the signature and compares it with `signature_key` in constant time.
/// An empty server key never verifies.
pub fn verify_notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    signature_key: &str,
    server_key: &str,
) -> bool {
    if server_key.is_empty() {
        return false;
    }
    let expected = notification_signature(order_id, status_code, gross_amount, server_key);
    constant_time_eq(&expected, &signature_key.trim().to_ascii_lowercase())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
