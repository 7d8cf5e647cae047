//! Login driver contract.
//!
//! The orchestrator drives the interactive login through this capability
//! trait rather than a concrete automation backend, so attempts can be
//! exercised with scripted drivers in tests. The production backend lives in
//! [`chromium`].

pub mod chromium;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::auth::error::AuthError;
use crate::auth::tokens::TokenSet;

/// Default ADFS login form selectors.
pub const USERNAME_SELECTOR: &str = "#userNameInput";
pub const PASSWORD_SELECTOR: &str = "#passwordInput";
pub const SUBMIT_SELECTOR: &str = "#submitButton";

/// Credential entry for one login form submission.
#[derive(Debug, Clone)]
pub struct LoginForm {
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub username: String,
    pub password: String,
}

impl LoginForm {
    pub fn adfs(username: &str, password: &str) -> Self {
        Self {
            username_selector: USERNAME_SELECTOR.into(),
            password_selector: PASSWORD_SELECTOR.into(),
            submit_selector: SUBMIT_SELECTOR.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Capability set required of any automation backend.
///
/// `observe_redirect` must have completed its registration by the time it
/// returns: tokens can appear on the very first redirect after navigation, so
/// observer-before-navigate is a hard ordering precondition of the
/// orchestrator, not an optimization.
#[async_trait]
pub trait LoginDriver: Send {
    /// Register the outgoing-request observer. The returned channel fires at
    /// most once per attempt, the first time an outgoing request URL starts
    /// with `redirect_uri` and carries tokens in its fragment.
    async fn observe_redirect(
        &mut self,
        redirect_uri: &str,
    ) -> Result<oneshot::Receiver<TokenSet>, AuthError>;

    /// Load a URL; `Timeout` if the page does not settle within `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), AuthError>;

    /// Wait for the form fields, enter credentials, submit. `ElementNotFound`
    /// if any selector does not appear within `timeout`.
    async fn fill_and_submit(
        &mut self,
        form: &LoginForm,
        timeout: Duration,
    ) -> Result<(), AuthError>;

    /// Resolve when navigation stabilizes, or `Timeout`.
    async fn wait_for_navigation_settled(&mut self, timeout: Duration) -> Result<(), AuthError>;

    async fn current_url(&mut self) -> Result<String, AuthError>;

    /// Idempotent; invoked on every exit path of an attempt.
    async fn close(&mut self);
}

/// Factory producing a fresh driver per attempt. Injected into the
/// orchestrator so tests never launch a real browser.
pub type DriverFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Box<dyn LoginDriver>, AuthError>> + Send + Sync>;
