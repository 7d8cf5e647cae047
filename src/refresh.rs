//! Proactive token refresh scheduling.
//!
//! One-shot timer armed at `expiry - lead time`. Arming cancels any previous
//! timer, so at most one is live per scheduler. The fired callback is
//! expected to run the full authenticate-and-cache path; caching the new
//! tokens rearms the scheduler, forming the self-rearming chain. A failed
//! refresh is logged and simply leaves the scheduler unarmed.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::tokens::{unix_now, TokenSet};

pub struct RefreshScheduler {
    lead_time: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(lead_time: Duration) -> Self {
        Self {
            lead_time,
            timer: Mutex::new(None),
        }
    }

    /// Arm the timer from the token's decoded expiry. Fires immediately when
    /// the refresh point has already passed (fire-and-forget, result logged
    /// by the callback). Replaces any previously armed timer.
    pub fn arm<F, Fut>(&self, tokens: &TokenSet, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(expiry) = tokens.expiry_unix() else {
            warn!("access token has no decodable expiry; refresh not scheduled");
            return;
        };

        let refresh_at = expiry.saturating_sub(self.lead_time.as_secs());
        let delay = Duration::from_secs(refresh_at.saturating_sub(unix_now()));
        if delay.is_zero() {
            debug!("token already within refresh lead time; refreshing now");
        } else {
            debug!(delay_secs = delay.as_secs(), "refresh timer armed");
        }

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            on_fire().await;
        });

        let mut slot = match self.timer.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Cancel any live timer.
    pub fn clear(&self) {
        let mut slot = match self.timer.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = slot.take() {
            handle.abort();
            debug!("refresh timer cancelled");
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::fake_jwt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn token_expiring_in(secs: u64) -> TokenSet {
        TokenSet {
            access_token: fake_jwt(unix_now() + secs),
            id_token: None,
            token_type: None,
            expires_in: Some(secs),
            scope: None,
            state: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_at_expiry_minus_lead_time() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(300));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.arm(&token_expiring_in(600), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_due_token_fires_immediately() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(300));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.arm(&token_expiring_in(60), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_the_previous_timer() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(300));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        scheduler.arm(&token_expiring_in(600), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = second.clone();
        scheduler.arm(&token_expiring_in(900), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0, "old timer fully retired");
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_inside_the_callback_chains_exactly_once() {
        let scheduler = Arc::new(RefreshScheduler::new(Duration::from_secs(300)));
        let fired = Arc::new(AtomicUsize::new(0));

        let chained = scheduler.clone();
        let counter = fired.clone();
        scheduler.arm(&token_expiring_in(600), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            // A successful refresh arms the next cycle.
            let next = counter.clone();
            chained.arm(&token_expiring_in(600), move || async move {
                next.fetch_add(1, Ordering::SeqCst);
            });
        });

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2, "exactly one rearmed timer");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_the_timer() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(300));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.arm(&token_expiring_in(600), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.clear();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undecodable_token_does_not_arm() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(300));
        let tokens = TokenSet {
            access_token: "opaque".into(),
            id_token: None,
            token_type: None,
            expires_in: Some(600),
            scope: None,
            state: None,
        };
        scheduler.arm(&tokens, || async {});
        assert!(scheduler.timer.lock().unwrap().is_none());
    }
}
