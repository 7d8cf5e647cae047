//! One browser-driven authentication attempt, end to end.
//!
//! Phases: validate, acquire driver, register observer, navigate, fill and
//! submit, then race the two completion signals (outgoing-request observation
//! vs. navigation settle) under one timeout budget. Observation is
//! authoritative: ADFS can deliver tokens on a request the browser never
//! visibly navigates to, so navigation settle alone is not trusted.

use tracing::{debug, warn};

use super::error::AuthError;
use super::fragment::extract_tokens_from_url;
use super::request::AuthRequest;
use super::tokens::TokenSet;
use crate::config::Settings;
use crate::driver::{DriverFactory, LoginDriver, LoginForm};

/// How the completion race ended; observation is re-checked afterwards in
/// every non-observed branch.
enum RaceEnd {
    Observed(TokenSet),
    Settled,
    NavTimeout,
}

pub struct Authenticator {
    settings: Settings,
}

impl Authenticator {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run one attempt. Every failure is terminal for the attempt; nothing is
    /// retried here and nothing escapes as a panic. The driver is closed on
    /// every path.
    pub async fn authenticate(&self, factory: &DriverFactory) -> Result<TokenSet, AuthError> {
        let form = self.validate()?;

        let mut driver = factory().await?;
        let result = self.drive(driver.as_mut(), &form).await;
        driver.close().await;

        match &result {
            Ok(_) => debug!("authentication attempt succeeded"),
            Err(err) => debug!("authentication attempt failed: {err}"),
        }
        result
    }

    /// Input validation happens before any browser is launched.
    fn validate(&self) -> Result<LoginForm, AuthError> {
        let username = self
            .settings
            .username
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingCredentials)?;
        let password = self
            .settings
            .password
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingCredentials)?;

        if self.settings.authority.is_empty() {
            return Err(AuthError::MissingConfiguration("authority"));
        }
        if self.settings.client_id.is_empty() {
            return Err(AuthError::MissingConfiguration("client id"));
        }
        if self.settings.redirect_uri.is_empty() {
            return Err(AuthError::MissingConfiguration("redirect URI"));
        }

        Ok(LoginForm::adfs(username, password))
    }

    async fn drive(
        &self,
        driver: &mut dyn LoginDriver,
        form: &LoginForm,
    ) -> Result<TokenSet, AuthError> {
        let timeout = self.settings.timeout();

        // Observer registration must complete before navigation begins:
        // tokens can arrive on the very first redirect.
        let mut observer = driver.observe_redirect(&self.settings.redirect_uri).await?;

        let request = AuthRequest::new(&self.settings);
        let url = request.authorize_url()?;
        debug!("navigating to authorization endpoint");
        driver.navigate(&url, timeout).await?;

        debug!("waiting for credential fields");
        driver.fill_and_submit(form, timeout).await?;

        // Completion race. The losing future is dropped once one side
        // settles; the observer receiver survives for the final re-check.
        debug!("racing completion signals");
        let end = tokio::select! {
            tokens = async {
                match (&mut observer).await {
                    Ok(tokens) => tokens,
                    // Observer went away without firing; let the other
                    // signal decide.
                    Err(_) => std::future::pending().await,
                }
            } => RaceEnd::Observed(tokens),
            settled = driver.wait_for_navigation_settled(timeout) => match settled {
                Ok(()) => RaceEnd::Settled,
                Err(AuthError::Timeout(_)) => RaceEnd::NavTimeout,
                Err(err) => return Err(err),
            },
        };

        let tokens = match end {
            RaceEnd::Observed(tokens) => Ok(tokens),
            RaceEnd::Settled => {
                // Observation wins even when navigation settled first.
                if let Ok(tokens) = observer.try_recv() {
                    Ok(tokens)
                } else {
                    let current = driver.current_url().await?;
                    if current.starts_with(&self.settings.redirect_uri) && current.contains('#') {
                        extract_tokens_from_url(&current)
                    } else {
                        Err(AuthError::UnexpectedRedirect {
                            expected: self.settings.redirect_uri.clone(),
                            actual: current,
                        })
                    }
                }
            }
            RaceEnd::NavTimeout => {
                // Same rule after a timed-out navigation wait.
                if let Ok(tokens) = observer.try_recv() {
                    Ok(tokens)
                } else {
                    Err(AuthError::Timeout("login completion".into()))
                }
            }
        }?;

        if let Some(echoed) = tokens.state.as_deref() {
            if echoed != request.state() {
                warn!("state echoed by the identity provider does not match the request state");
            }
        }

        Ok(tokens)
    }
}
