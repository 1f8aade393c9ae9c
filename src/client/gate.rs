//! Client-side token checks. Nothing here verifies a signature: the server
//! does that, these only decide whether a request is worth sending.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;

/// Seconds before `exp` at which a token already counts as expired.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 30;

#[derive(Deserialize)]
struct Payload {
    exp: f64,
}

fn decode_exp(token: &str) -> Option<f64> {
    let segment = token.split('.').nth(1)?.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD_NO_PAD.decode(segment))
        .ok()?;
    serde_json::from_slice::<Payload>(&bytes).ok().map(|p| p.exp)
}

/// Undecodable tokens count as expired.
pub fn is_token_expired(token: &str, now: i64, buffer_secs: i64) -> bool {
    match decode_exp(token) {
        Some(exp) => exp < (now + buffer_secs) as f64,
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthGate {
    Authenticated,
    /// Usable after a refresh; `clear_access` drops an undecodable access token.
    NeedsRefresh { clear_access: bool },
    /// Stored tokens, if any, should be cleared.
    Unauthenticated,
}

/// Route guard decision for the stored token pair. Compares `exp` with `now`
/// without any buffer.
pub fn auth_gate(access: Option<&str>, refresh: Option<&str>, now: i64) -> AuthGate {
    let access = access.filter(|t| !t.is_empty());
    let refresh = refresh.filter(|t| !t.is_empty());

    let Some(access) = access else {
        return match refresh {
            Some(_) => AuthGate::NeedsRefresh { clear_access: false },
            None => AuthGate::Unauthenticated,
        };
    };

    match decode_exp(access) {
        None if refresh.is_some() => AuthGate::NeedsRefresh { clear_access: true },
        None => AuthGate::Unauthenticated,
        Some(exp) if exp >= now as f64 => AuthGate::Authenticated,
        Some(_) => match refresh.and_then(decode_exp) {
            Some(refresh_exp) if refresh_exp >= now as f64 => {
                AuthGate::NeedsRefresh { clear_access: false }
            }
            _ => AuthGate::Unauthenticated,
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Unsigned token carrying only `exp`.
    pub(crate) fn token_with_exp(exp: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "user_id": 1 }).to_string());
        format!("eyJhbGciOiJIUzI1NiJ9.{}.firma", payload)
    }

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_expiry_buffer() {
        assert!(!is_token_expired(&token_with_exp(NOW + 60), NOW, DEFAULT_EXPIRY_BUFFER_SECS));
        assert!(is_token_expired(&token_with_exp(NOW + 20), NOW, DEFAULT_EXPIRY_BUFFER_SECS));
        assert!(!is_token_expired(&token_with_exp(NOW + 20), NOW, 0));
        assert!(is_token_expired("no-es-un-jwt", NOW, 0));
        assert!(is_token_expired("a.%%%.b", NOW, 0));
    }

    #[test]
    fn test_gate_table() {
        let valid = token_with_exp(NOW + 600);
        let expired = token_with_exp(NOW - 600);

        assert_eq!(auth_gate(None, None, NOW), AuthGate::Unauthenticated);
        assert_eq!(
            auth_gate(None, Some(&valid), NOW),
            AuthGate::NeedsRefresh { clear_access: false }
        );
        assert_eq!(auth_gate(Some(&valid), None, NOW), AuthGate::Authenticated);
        assert_eq!(
            auth_gate(Some(&expired), Some(&valid), NOW),
            AuthGate::NeedsRefresh { clear_access: false }
        );
        assert_eq!(auth_gate(Some(&expired), Some(&expired), NOW), AuthGate::Unauthenticated);
        assert_eq!(auth_gate(Some(&expired), Some("basura"), NOW), AuthGate::Unauthenticated);
        assert_eq!(auth_gate(Some(&expired), None, NOW), AuthGate::Unauthenticated);
        assert_eq!(
            auth_gate(Some("basura"), Some(&valid), NOW),
            AuthGate::NeedsRefresh { clear_access: true }
        );
        assert_eq!(auth_gate(Some("basura"), None, NOW), AuthGate::Unauthenticated);
    }
}
