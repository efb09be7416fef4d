use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Session, SessionFactory};
use crate::config::FetcherSettings;
use crate::error::FetchError;
use crate::model::PageContent;

const READY_POLL: Duration = Duration::from_millis(250);
const CHROME_ARGS: &[&str] = &["--disable-gpu", "--disable-dev-shm-usage"];

/// Launches one headless Chrome process per session.
pub struct BrowserSessions {
    settings: FetcherSettings,
    launched: AtomicUsize,
}

impl BrowserSessions {
    pub fn new(settings: FetcherSettings) -> Self {
        Self {
            settings,
            launched: AtomicUsize::new(0),
        }
    }

    /// Every Chrome process needs its own profile directory, concurrent
    /// processes cannot share one.
    fn profile_dir(&self) -> PathBuf {
        let n = self.launched.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("menu-harvester-{}-{}", std::process::id(), n))
    }

    fn browser_config(&self, profile: &Path) -> Result<BrowserConfig, FetchError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .user_data_dir(profile)
            .request_timeout(self.settings.load_timeout())
            .args(CHROME_ARGS.iter().copied())
            .args(self.settings.extra_args.iter().map(String::as_str));
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(|reason| FetchError::Launch { reason })
    }
}

#[async_trait]
impl SessionFactory for BrowserSessions {
    async fn acquire(&self) -> Result<Box<dyn Session>, FetchError> {
        let profile = self.profile_dir();
        let config = self.browser_config(&profile)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Launch { reason: e.to_string() })?;

        // The CDP handler must be polled for the browser to make progress.
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let mut session = BrowserSession {
                    browser: Some(browser),
                    page: None,
                    events: Some(events),
                    profile: Some(profile),
                    timeout: self.settings.load_timeout(),
                    current: None,
                };
                if let Err(e) = session.release().await {
                    warn!("Failed to tear down half-started browser: {}", e);
                }
                return Err(FetchError::Launch { reason: e.to_string() });
            }
        };

        debug!("Launched browser session");
        Ok(Box::new(BrowserSession {
            browser: Some(browser),
            page: Some(page),
            events: Some(events),
            profile: Some(profile),
            timeout: self.settings.load_timeout(),
            current: None,
        }))
    }
}

pub struct BrowserSession {
    browser: Option<Browser>,
    page: Option<Page>,
    events: Option<JoinHandle<()>>,
    profile: Option<PathBuf>,
    timeout: Duration,
    /// URL of the page last navigated to.
    current: Option<String>,
}

impl BrowserSession {
    async fn wait_for(&self, page: &Page, url: &str, selector: &str, started: Instant) -> Result<(), FetchError> {
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if started.elapsed() >= self.timeout {
                return Err(FetchError::ReadyTimeout {
                    url: url.to_string(),
                    selector: selector.to_string(),
                    timeout: self.timeout,
                });
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }
}

#[async_trait]
impl Session for BrowserSession {
    async fn load(&mut self, url: &str, ready_selector: &str) -> Result<PageContent, FetchError> {
        let page = self.page.as_ref().ok_or(FetchError::Released)?;
        let started = Instant::now();

        match tokio::time::timeout(self.timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(FetchError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(FetchError::ReadyTimeout {
                    url: url.to_string(),
                    selector: ready_selector.to_string(),
                    timeout: self.timeout,
                })
            }
        }

        self.current = Some(url.to_string());
        self.wait_for(page, url, ready_selector, started).await?;
        snapshot(page, url).await
    }

    async fn wait_ready(&mut self, ready_selector: &str) -> Result<PageContent, FetchError> {
        let page = self.page.as_ref().ok_or(FetchError::Released)?;
        let url = self.current.clone().unwrap_or_default();
        self.wait_for(page, &url, ready_selector, Instant::now()).await?;
        snapshot(page, &url).await
    }

    async fn release(&mut self) -> Result<(), FetchError> {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Page close failed during release: {}", e);
            }
        }

        let mut result = Ok(());
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                result = Err(FetchError::Teardown {
                    reason: e.to_string(),
                });
            }
            if let Err(e) = browser.wait().await {
                warn!("Waiting for browser process exit failed: {}", e);
            }
        }

        if let Some(events) = self.events.take() {
            events.abort();
        }
        if let Some(profile) = self.profile.take() {
            remove_profile(&profile);
        }
        result
    }
}

async fn snapshot(page: &Page, url: &str) -> Result<PageContent, FetchError> {
    let html = page.content().await.map_err(|e| FetchError::Navigation {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PageContent::new(url, html))
}

/// Failures are logged, not returned.
fn remove_profile(profile: &Path) -> bool {
    match std::fs::remove_dir_all(profile) {
        Ok(()) => true,
        Err(e) => {
            warn!(profile = %profile.display(), "Failed to remove browser profile: {}", e);
            false
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_removal_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile");
        std::fs::create_dir_all(profile.join("Default")).unwrap();

        assert!(remove_profile(&profile));
        assert!(!profile.exists());
        assert!(!remove_profile(&profile));
    }

    #[test]
    fn each_session_gets_its_own_profile() {
        let sessions = BrowserSessions::new(FetcherSettings::default());
        assert_ne!(sessions.profile_dir(), sessions.profile_dir());
    }
}
