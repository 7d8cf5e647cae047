//! Authorization request construction.
//!
//! Builds the ADFS authorize URL for the implicit flow, normalizing whatever
//! authority shape the configuration provides and generating a fresh
//! state/nonce pair per attempt.

use rand::distr::Alphanumeric;
use rand::Rng;
use url::Url;

use super::error::AuthError;
use crate::config::Settings;

/// ADFS path segment that marks the federation service root.
const ADFS_SEGMENT: &str = "/adfs";
/// OAuth2 authorize endpoint below the federation service root.
const AUTHORIZE_SUFFIX: &str = "/oauth2/authorize/";

/// Length of the generated `state` and `nonce` values.
const STATE_LEN: usize = 32;

/// One authorization request: configuration snapshot plus the state/nonce
/// pair generated for this attempt. Never reused across attempts.
#[derive(Debug)]
pub struct AuthRequest {
    authority: String,
    client_id: String,
    redirect_uri: String,
    scope: String,
    state: String,
    nonce: String,
}

impl AuthRequest {
    pub fn new(settings: &Settings) -> Self {
        Self {
            authority: settings.authority.clone(),
            client_id: settings.client_id.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            scope: settings.scope.clone(),
            state: random_token(STATE_LEN),
            nonce: random_token(STATE_LEN),
        }
    }

    /// `state` generated for this attempt, for CSRF comparison against the
    /// value echoed back by the IdP.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Build the full authorize URL. The only failure mode is a malformed
    /// URL after normalization, surfaced as a configuration error.
    pub fn authorize_url(&self) -> Result<String, AuthError> {
        let endpoint = authorize_endpoint(&self.authority);
        let mut url = Url::parse(&endpoint)
            .map_err(|e| AuthError::Configuration(format!("invalid authority {endpoint:?}: {e}")))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "id_token token")
            .append_pair("scope", &self.scope)
            .append_pair("nonce", &self.nonce)
            .append_pair("state", &self.state)
            .append_pair("prompt", "select_account");

        Ok(url.into())
    }
}

/// Normalize an authority into the full authorize endpoint.
///
/// Rules: add `https://` when no scheme is present; strip exactly one
/// trailing slash; append the `/adfs/oauth2/authorize/` suffix exactly once
/// no matter how much of it the configured authority already carries.
fn authorize_endpoint(authority: &str) -> String {
    let mut base = authority.trim().to_string();
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("https://{base}");
    }
    if base.ends_with('/') {
        base.pop();
    }

    if base.ends_with(ADFS_SEGMENT) {
        return format!("{base}{AUTHORIZE_SUFFIX}");
    }

    // Look for an /adfs/ segment in the path only, past the scheme and host.
    let path_start = base
        .find("://")
        .map(|i| i + 3)
        .and_then(|host_start| base[host_start..].find('/').map(|i| host_start + i));
    if let Some(start) = path_start {
        if let Some(rel) = base[start..].find("/adfs/") {
            base.truncate(start + rel);
        }
    }

    format!("{base}{ADFS_SEGMENT}{AUTHORIZE_SUFFIX}")
}

fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
