use std::env;
use std::time::Duration;

/// Fixed size of a file piece in bytes. The last piece of a file may be
/// shorter.
pub const PIECE_SIZE: usize = 1024;

/// Number of worker threads the download engine runs per file.
pub const POOL_SIZE: usize = 10;

/// Session token lifetime when `SWARM_TOKEN_TTL_SECS` is not set (10 hours).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 36_000;

/// HMAC secret used when `SWARM_SECRET` is not set.
pub const DEFAULT_SECRET: &str = "chin_tapak_dum_dum";

/// A frame length prefix never exceeds this many decimal digits.
pub const MAX_LEN_DIGITS: usize = 20;

/// Receive timeout applied to peer-to-peer connections when enabled.
/// Disabled (`None`) by default; the download engine relies on orderly
/// closes instead.
pub const RECV_TIMEOUT: Option<Duration> = None;

pub const LOG_DIR: &str = "./logs";

/// The HMAC secret, overridable through the `SWARM_SECRET` environment
/// variable.
pub fn hmac_secret() -> Vec<u8> {
    env::var("SWARM_SECRET")
        .unwrap_or_else(|_| DEFAULT_SECRET.to_string())
        .into_bytes()
}

/// Session token lifetime, overridable through `SWARM_TOKEN_TTL_SECS`.
pub fn token_ttl() -> Duration {
    let secs = env::var("SWARM_TOKEN_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_default_ttl_is_ten_hours() {
        assert_eq!(DEFAULT_TOKEN_TTL_SECS, 10 * 60 * 60);
    }

    #[test]
    fn test_secret_defaults_when_env_missing() {
        if env::var("SWARM_SECRET").is_err() {
            assert_eq!(hmac_secret(), DEFAULT_SECRET.as_bytes());
        }
    }
}
