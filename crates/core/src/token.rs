use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{SwarmError, SwarmResult};

type HmacSha256 = Hmac<Sha256>;

const INVALID: &str = "invalid/expired token";

/// A session token is `hex(user).expiry.hex(hmac)` where the MAC covers
/// `hex(user).expiry`. Self-describing: validation needs only the secret.
pub fn issue(user: &str, ttl: Duration, secret: &[u8]) -> String {
    let expiry = now_epoch() + ttl.as_secs() as i64;
    let payload = format!("{}.{}", hex::encode(user.as_bytes()), expiry);
    let mac = sign(payload.as_bytes(), secret);
    format!("{}.{}", payload, hex::encode(mac))
}

/// Verify a token: recompute the MAC with the server secret, compare in
/// constant time, then check expiry. Returns the embedded user-name.
pub fn validate(token: &str, secret: &[u8]) -> SwarmResult<String> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(SwarmError::auth(INVALID));
    }
    let (user_hex, expiry_str, mac_hex) = (parts[0], parts[1], parts[2]);

    let payload = format!("{}.{}", user_hex, expiry_str);
    let presented = hex::decode(mac_hex).map_err(|_| SwarmError::auth(INVALID))?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SwarmError::auth(INVALID))?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&presented)
        .map_err(|_| SwarmError::auth(INVALID))?;

    let expiry: i64 = expiry_str.parse().map_err(|_| SwarmError::auth(INVALID))?;
    if expiry <= now_epoch() {
        return Err(SwarmError::auth(INVALID));
    }

    let user = hex::decode(user_hex).map_err(|_| SwarmError::auth(INVALID))?;
    String::from_utf8(user).map_err(|_| SwarmError::auth(INVALID))
}

fn sign(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC takes keys of any length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
