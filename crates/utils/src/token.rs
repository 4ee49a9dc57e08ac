//! Per-container secrets and bearer-auth helpers shared by the manager,
//! the backend drivers (who inject `SECRET_TOKEN`), and the sandbox client
//! (who presents it back as an `Authorization` header).

use rand::{Rng, distr::Alphanumeric};

/// Generates a fresh, high-entropy runtime token. Never reused across
/// containers (§3 invariant): each call draws fresh randomness.
pub fn generate_runtime_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

/// Builds the `Authorization: Bearer <token>` header value.
pub fn bearer_header(token: &str) -> String {
    format!("Bearer {token}")
}

/// Builds the `x-agentrun-session-id` header value, per §4.5.
pub fn session_header_value(session_id: &str) -> String {
    format!("s{session_id}")
}

/// Extracts a bearer token from a raw `Authorization` header value, if any.
pub fn extract_bearer(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ").map(str::trim)
}

/// Constant-time comparison for bearer tokens, so auth checks don't leak
/// timing information about how many leading bytes matched.
pub fn tokens_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique() {
        let a = generate_runtime_token();
        let b = generate_runtime_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 48);
    }

    #[test]
    fn bearer_roundtrip() {
        let header = bearer_header("abc123");
        assert_eq!(extract_bearer(&header), Some("abc123"));
    }

    #[test]
    fn constant_time_compare() {
        assert!(tokens_equal("same-token", "same-token"));
        assert!(!tokens_equal("same-token", "diff-token"));
        assert!(!tokens_equal("short", "longer-string"));
    }
}
