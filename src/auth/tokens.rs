//! Token data model and expiry arithmetic.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Tokens returned by the identity provider in a redirect fragment.
///
/// Immutable once constructed; owned by the attempt that produced it until
/// handed to the cache. Field names on the wire are camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Lifetime in seconds as reported by the IdP (`expires_in`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// `state` echoed back by the IdP; compared against the request's
    /// generated state by the orchestrator, not here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl TokenSet {
    /// Unix timestamp at which the access token expires, from its `exp`
    /// claim. `None` when the token does not decode as a JWT.
    pub fn expiry_unix(&self) -> Option<u64> {
        decode_expiry(&self.access_token)
    }

    /// A token is valid only while its decoded expiry is strictly in the
    /// future. Undecodable tokens are invalid, not an error.
    pub fn is_valid(&self) -> bool {
        match self.expiry_unix() {
            Some(exp) => exp > unix_now(),
            None => false,
        }
    }
}

/// Durable representation of a cached token set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTokenRecord {
    #[serde(flatten)]
    pub tokens: TokenSet,
    /// Wall-clock unix timestamp at which the tokens were captured.
    pub captured_at: u64,
}

impl CachedTokenRecord {
    pub fn new(tokens: TokenSet) -> Self {
        Self {
            tokens,
            captured_at: unix_now(),
        }
    }
}

/// Current wall clock as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Decode the `exp` claim from a JWT access token without verifying the
/// signature. Any structural or decode problem yields `None`.
pub fn decode_expiry(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_u64()
}

#[cfg(test)]
pub(crate) fn fake_jwt(exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"aud":"urn:test"}}"#));
    format!("{header}.{payload}.sig")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exp_claim() {
        let token = fake_jwt(1_900_000_000);
        assert_eq!(decode_expiry(&token), Some(1_900_000_000));
    }

    #[test]
    fn non_jwt_token_has_no_expiry() {
        assert_eq!(decode_expiry("opaque-token"), None);
        assert_eq!(decode_expiry("a.%%%.c"), None);
        assert_eq!(decode_expiry(""), None);
    }

    #[test]
    fn validity_is_strict_around_now() {
        let past = TokenSet {
            access_token: fake_jwt(unix_now() - 1),
            id_token: None,
            token_type: None,
            expires_in: None,
            scope: None,
            state: None,
        };
        assert!(!past.is_valid());

        let future = TokenSet {
            access_token: fake_jwt(unix_now() + 60),
            ..past.clone()
        };
        assert!(future.is_valid());
    }

    #[test]
    fn undecodable_token_is_invalid() {
        let tokens = TokenSet {
            access_token: "not-a-jwt".into(),
            id_token: None,
            token_type: None,
            expires_in: Some(3600),
            scope: None,
            state: None,
        };
        assert!(!tokens.is_valid());
    }

    #[test]
    fn cached_record_serializes_flat() {
        let record = CachedTokenRecord::new(TokenSet {
            access_token: "at".into(),
            id_token: None,
            token_type: Some("Bearer".into()),
            expires_in: Some(60),
            scope: None,
            state: None,
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["accessToken"], "at");
        assert_eq!(json["tokenType"], "Bearer");
        assert!(json["capturedAt"].as_u64().is_some());
    }
}
