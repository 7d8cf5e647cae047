//! Chromium-backed login driver.
//!
//! Drives a real Chromium instance over CDP. The redirect observer listens to
//! `Network.requestWillBeSent`, which sees token-bearing requests even when
//! the browser never visibly navigates to them.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{LoginDriver, LoginForm};
use crate::auth::error::AuthError;
use crate::auth::fragment::{extract_tokens_from_url, is_token_redirect};
use crate::auth::tokens::TokenSet;

/// How often the wait-for-selector loop polls the page.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launch options for the production driver.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Optional delay between form interactions, for watching the login in a
    /// headful session.
    pub slow_mo: Option<Duration>,
}

/// Driver factory launching one fresh Chromium per attempt.
pub fn factory(options: BrowserOptions) -> super::DriverFactory {
    std::sync::Arc::new(move || {
        let options = options.clone();
        Box::pin(async move {
            let driver = ChromiumDriver::launch(&options).await?;
            Ok(Box::new(driver) as Box<dyn LoginDriver>)
        })
    })
}

pub struct ChromiumDriver {
    browser: Option<Browser>,
    page: Page,
    handler_task: JoinHandle<()>,
    observer_task: Option<JoinHandle<()>>,
    slow_mo: Option<Duration>,
}

impl ChromiumDriver {
    /// Launch a fresh browser with an isolated default profile and open a
    /// blank page for the attempt.
    pub async fn launch(options: &BrowserOptions) -> Result<Self, AuthError> {
        let mut builder = BrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(AuthError::Internal)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(AuthError::internal)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(AuthError::internal)?;

        debug!(headless = options.headless, "browser launched");

        Ok(Self {
            browser: Some(browser),
            page,
            handler_task,
            observer_task: None,
            slow_mo: options.slow_mo,
        })
    }

    async fn pace(&self) {
        if let Some(delay) = self.slow_mo {
            tokio::time::sleep(delay).await;
        }
    }

    async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<chromiumoxide::element::Element, AuthError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(element) = self.page.find_element(selector).await {
                return Ok(element);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AuthError::ElementNotFound(selector.to_string()));
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl LoginDriver for ChromiumDriver {
    async fn observe_redirect(
        &mut self,
        redirect_uri: &str,
    ) -> Result<oneshot::Receiver<TokenSet>, AuthError> {
        // The CDP listener is registered before this returns, so the caller
        // can rely on observer-before-navigate ordering.
        let mut events = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(AuthError::internal)?;

        let (tx, rx) = oneshot::channel();
        let redirect_uri = redirect_uri.to_string();
        self.observer_task = Some(tokio::spawn(async move {
            let mut tx = Some(tx);
            while let Some(event) = events.next().await {
                let url = event.request.url.as_str();
                if !is_token_redirect(url, &redirect_uri) {
                    continue;
                }
                match extract_tokens_from_url(url) {
                    Ok(tokens) => {
                        debug!("token-bearing redirect observed on outgoing request");
                        if let Some(tx) = tx.take() {
                            let _ = tx.send(tokens);
                        }
                        break;
                    }
                    Err(err) => {
                        warn!("token-bearing redirect did not decode: {err}");
                    }
                }
            }
        }));

        Ok(rx)
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), AuthError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(AuthError::internal(err)),
            Err(_) => Err(AuthError::Timeout("page navigation".into())),
        }
    }

    async fn fill_and_submit(
        &mut self,
        form: &LoginForm,
        timeout: Duration,
    ) -> Result<(), AuthError> {
        let username = self.wait_for_element(&form.username_selector, timeout).await?;
        username.click().await.map_err(AuthError::internal)?;
        username
            .type_str(&form.username)
            .await
            .map_err(AuthError::internal)?;
        self.pace().await;

        let password = self.wait_for_element(&form.password_selector, timeout).await?;
        password.click().await.map_err(AuthError::internal)?;
        password
            .type_str(&form.password)
            .await
            .map_err(AuthError::internal)?;
        self.pace().await;

        let submit = self.wait_for_element(&form.submit_selector, timeout).await?;
        submit.click().await.map_err(AuthError::internal)?;
        debug!("credentials submitted");
        Ok(())
    }

    async fn wait_for_navigation_settled(&mut self, timeout: Duration) -> Result<(), AuthError> {
        match tokio::time::timeout(timeout, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(AuthError::internal(err)),
            Err(_) => Err(AuthError::Timeout("navigation settle".into())),
        }
    }

    async fn current_url(&mut self) -> Result<String, AuthError> {
        self.page
            .url()
            .await
            .map_err(AuthError::internal)?
            .ok_or_else(|| AuthError::Internal("page reports no URL".into()))
    }

    async fn close(&mut self) {
        if let Some(task) = self.observer_task.take() {
            task.abort();
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(err) = browser.close().await {
                warn!("browser close failed: {err}");
            }
            let _ = browser.wait().await;
        }
        self.handler_task.abort();
    }
}
