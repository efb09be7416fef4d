pub mod browser;
pub mod http;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{FetchMode, FetcherSettings};
use crate::error::FetchError;
use crate::model::PageContent;

/// One stateful, non-reentrant fetch handle. Owned by exactly one worker.
#[async_trait]
pub trait Session: Send {
    /// Navigate to `url` and wait until `ready_selector` matches or the load
    /// timeout elapses.
    async fn load(&mut self, url: &str, ready_selector: &str) -> Result<PageContent, FetchError>;

    /// Wait on the page loaded last, without navigating again, until
    /// `ready_selector` matches or the load timeout elapses.
    async fn wait_ready(&mut self, ready_selector: &str) -> Result<PageContent, FetchError>;

    /// Tear down the underlying handle. Calling it again is a no-op.
    async fn release(&mut self) -> Result<(), FetchError>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Session>, FetchError>;
}

pub fn factory_from_settings(settings: &FetcherSettings) -> Arc<dyn SessionFactory> {
    match settings.mode {
        FetchMode::Browser => Arc::new(browser::BrowserSessions::new(settings.clone())),
        FetchMode::Http => Arc::new(http::HttpSessions::new(settings)),
    }
}

/// Scoped session ownership.
///
/// `release` is the normal exit path. If the guard is dropped while still
/// holding a session (task aborted, panic), the release is spawned onto the
/// runtime the guard was created on.
pub struct SessionGuard {
    session: Option<Box<dyn Session>>,
    open: Arc<AtomicUsize>,
    runtime: tokio::runtime::Handle,
}

impl SessionGuard {
    pub async fn acquire(factory: &dyn SessionFactory, open: Arc<AtomicUsize>) -> Result<Self, FetchError> {
        let session = factory.acquire().await?;
        let now_open = open.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(open_sessions = now_open, "Fetch session acquired");
        Ok(Self {
            session: Some(session),
            open,
            runtime: tokio::runtime::Handle::current(),
        })
    }

    pub async fn load(&mut self, url: &str, ready_selector: &str) -> Result<PageContent, FetchError> {
        match self.session.as_mut() {
            Some(s) => s.load(url, ready_selector).await,
            None => Err(FetchError::Released),
        }
    }

    pub async fn wait_ready(&mut self, ready_selector: &str) -> Result<PageContent, FetchError> {
        match self.session.as_mut() {
            Some(s) => s.wait_ready(ready_selector).await,
            None => Err(FetchError::Released),
        }
    }

    /// Release failures are logged, never returned.
    pub async fn release(mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.release().await {
                warn!("Failed to release fetch session: {}", e);
            }
            let left = self.open.fetch_sub(1, Ordering::SeqCst) - 1;
            debug!(open_sessions = left, "Fetch session released");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            let open = Arc::clone(&self.open);
            self.runtime.spawn(async move {
                if let Err(e) = session.release().await {
                    warn!("Fetch session cleanup on drop failed: {}", e);
                }
                open.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }
}

// ── Tests ──
