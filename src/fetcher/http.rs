use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

use super::{Session, SessionFactory};
use crate::config::FetcherSettings;
use crate::error::FetchError;
use crate::model::PageContent;

const USER_AGENT: &str = concat!("menu_harvester/", env!("CARGO_PKG_VERSION"));

/// Plain HTTP fetching for menus that render without scripts.
pub struct HttpSessions {
    timeout: Duration,
}

impl HttpSessions {
    pub fn new(settings: &FetcherSettings) -> Self {
        Self {
            timeout: settings.load_timeout(),
        }
    }
}

#[async_trait]
impl SessionFactory for HttpSessions {
    async fn acquire(&self) -> Result<Box<dyn Session>, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::Launch { reason: e.to_string() })?;
        Ok(Box::new(HttpSession {
            client: Some(client),
            timeout: self.timeout,
            last: None,
        }))
    }
}

pub struct HttpSession {
    client: Option<reqwest::Client>,
    timeout: Duration,
    /// Last document fetched; nothing renders after the response arrives.
    last: Option<PageContent>,
}

#[async_trait]
impl Session for HttpSession {
    async fn load(&mut self, url: &str, ready_selector: &str) -> Result<PageContent, FetchError> {
        let client = self.client.as_ref().ok_or(FetchError::Released)?;
        let navigation = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::ReadyTimeout {
                    url: url.to_string(),
                    selector: ready_selector.to_string(),
                    timeout: self.timeout,
                }
            } else {
                FetchError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let html = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(navigation)?
            .text()
            .await
            .map_err(navigation)?;

        let page = PageContent::new(url, html);
        self.last = Some(page.clone());
        if !document_matches(&page.html, ready_selector) {
            return Err(FetchError::NotReady {
                url: url.to_string(),
                selector: ready_selector.to_string(),
            });
        }
        Ok(page)
    }

    async fn wait_ready(&mut self, ready_selector: &str) -> Result<PageContent, FetchError> {
        if self.client.is_none() {
            return Err(FetchError::Released);
        }
        match &self.last {
            Some(page) if document_matches(&page.html, ready_selector) => Ok(page.clone()),
            last => Err(FetchError::NotReady {
                url: last.as_ref().map(|p| p.url.clone()).unwrap_or_default(),
                selector: ready_selector.to_string(),
            }),
        }
    }

    async fn release(&mut self) -> Result<(), FetchError> {
        self.client = None;
        self.last = None;
        Ok(())
    }
}

fn document_matches(html: &str, selector: &str) -> bool {
    let Ok(sel) = Selector::parse(selector) else {
        return false;
    };
    Html::parse_document(html).select(&sel).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_condition_checks_the_document() {
        let html = std::fs::read_to_string("tests/fixtures/landing.html").unwrap();
        assert!(document_matches(&html, "h2.title"));
        assert!(!document_matches(&html, "div.menu-list-item"));
        assert!(!document_matches(&html, "h2..broken"));
    }

    #[tokio::test]
    async fn wait_ready_rechecks_the_last_document() {
        let html = std::fs::read_to_string("tests/fixtures/landing.html").unwrap();
        let mut session = HttpSession {
            client: Some(reqwest::Client::new()),
            timeout: Duration::from_secs(1),
            last: None,
        };
        assert!(matches!(
            session.wait_ready("h2.title").await,
            Err(FetchError::NotReady { .. })
        ));

        session.last = Some(PageContent::new("https://expz.menu/edf7ccc5", html));
        let page = session.wait_ready("a.main-menu-item").await.unwrap();
        assert_eq!(page.url, "https://expz.menu/edf7ccc5");
        assert!(matches!(
            session.wait_ready("div.menu-list-item").await,
            Err(FetchError::NotReady { url, .. }) if url == "https://expz.menu/edf7ccc5"
        ));
    }

    #[tokio::test]
    async fn released_session_refuses_loads() {
        let factory = HttpSessions::new(&FetcherSettings::default());
        let mut session = factory.acquire().await.unwrap();
        session.release().await.unwrap();
        session.release().await.unwrap();
        assert!(matches!(
            session.load("http://127.0.0.1:9/", "body").await,
            Err(FetchError::Released)
        ));
    }
}
