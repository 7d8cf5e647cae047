//! Extraction of tokens from a redirect URL fragment.
//!
//! The implicit flow returns tokens in the part of the URL after `#`, which
//! never reaches a server. This module is pure parsing; CSRF state matching
//! is the orchestrator's job.

use std::collections::HashMap;

use super::error::AuthError;
use super::tokens::TokenSet;

/// Parse the fragment of a redirect URL into a token set.
///
/// Fails with `NoFragment` when the URL has no `#`, with `IdpError` when the
/// provider signalled an error (code and description passed through
/// verbatim), and with `NoAccessToken` when the fragment decodes but carries
/// no `access_token`.
pub fn extract_tokens_from_url(url: &str) -> Result<TokenSet, AuthError> {
    let (_, fragment) = url.split_once('#').ok_or(AuthError::NoFragment)?;

    let mut pairs: HashMap<String, String> = url::form_urlencoded::parse(fragment.as_bytes())
        .into_owned()
        .collect();

    if let Some(code) = pairs.remove("error") {
        return Err(AuthError::IdpError {
            code,
            description: pairs.remove("error_description").unwrap_or_default(),
        });
    }

    let access_token = pairs.remove("access_token").ok_or(AuthError::NoAccessToken)?;

    Ok(TokenSet {
        access_token,
        id_token: pairs.remove("id_token"),
        token_type: pairs.remove("token_type"),
        expires_in: pairs.remove("expires_in").and_then(|v| v.parse().ok()),
        scope: pairs.remove("scope"),
        state: pairs.remove("state"),
    })
}

/// Redirect-match predicate used by login drivers: does this URL point at the
/// redirect URI and carry tokens in its fragment?
pub fn is_token_redirect(url: &str, redirect_uri: &str) -> bool {
    url.starts_with(redirect_uri)
        && url
            .split_once('#')
            .map(|(_, f)| f.contains("access_token=") || f.contains("id_token="))
            .unwrap_or(false)
}
