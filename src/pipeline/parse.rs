use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::stage::Stage;
use super::tracker::StageKind;
use crate::error::{FetchError, ParseError};
use crate::fetcher::{SessionFactory, SessionGuard};
use crate::model::{Category, Restaurant};
use crate::parser::Extractor;

/// Seed URL → restaurant. Each worker lazily opens one fetch session on its
/// first URL and keeps it until it retires, or until a load fails in a way
/// that points at the session itself.
pub struct ParseStage {
    sessions: Arc<dyn SessionFactory>,
    extractor: Arc<Extractor>,
    open_sessions: Arc<AtomicUsize>,
}

impl ParseStage {
    pub fn new(sessions: Arc<dyn SessionFactory>, extractor: Arc<Extractor>, open_sessions: Arc<AtomicUsize>) -> Self {
        Self {
            sessions,
            extractor,
            open_sessions,
        }
    }
}

#[async_trait]
impl Stage for ParseStage {
    type In = String;
    type Out = Restaurant;
    type Worker = Option<SessionGuard>;
    type Error = ParseError;

    const KIND: StageKind = StageKind::Parse;

    fn new_worker(&self) -> Self::Worker {
        None
    }

    fn label(url: &String) -> String {
        url.clone()
    }

    async fn process(&self, worker: &mut Self::Worker, url: String) -> Result<Restaurant, ParseError> {
        let session = match worker {
            Some(session) => session,
            None => {
                let acquired = SessionGuard::acquire(self.sessions.as_ref(), Arc::clone(&self.open_sessions))
                    .await
                    .map_err(|source| ParseError::Fetch {
                        url: url.clone(),
                        source,
                    })?;
                worker.insert(acquired)
            }
        };

        let restaurant = match harvest_restaurant(session, &self.extractor, &url).await {
            Ok(r) => r,
            Err(e) => {
                if let ParseError::Fetch { source, .. } = &e {
                    if source.is_session_fault() {
                        if let Some(session) = worker.take() {
                            warn!(url = %url, "Replacing fetch session after: {}", source);
                            session.release().await;
                        }
                    }
                }
                return Err(e);
            }
        };
        info!(
            url = %url,
            restaurant = %restaurant.name,
            dishes = restaurant.dishes.len(),
            "Parsed restaurant"
        );
        Ok(restaurant)
    }

    async fn retire_worker(&self, worker: Self::Worker) {
        if let Some(session) = worker {
            session.release().await;
        }
    }
}

/// Load a landing page, then every category page it links to. Any failed
/// load fails the whole restaurant.
pub async fn harvest_restaurant(
    session: &mut SessionGuard,
    extractor: &Extractor,
    url: &str,
) -> Result<Restaurant, ParseError> {
    let fetch_err = |source| ParseError::Fetch {
        url: url.to_string(),
        source,
    };

    let landing = session.load(url, extractor.landing_ready()).await.map_err(fetch_err)?;
    let name = extractor.restaurant_name(&landing);
    let mut categories = extractor.categories(&landing);
    if categories.is_empty() {
        match session.wait_ready(extractor.menu_ready()).await {
            Ok(page) => categories = extractor.categories(&page),
            Err(FetchError::ReadyTimeout { .. } | FetchError::NotReady { .. }) => {}
            Err(e) => return Err(fetch_err(e)),
        }
    }
    if categories.is_empty() {
        return Err(ParseError::NoCategoriesFound { url: url.to_string() });
    }

    let mut dishes = Vec::new();
    for category in categories {
        let page = session
            .load(&category.source_url, extractor.category_ready())
            .await
            .map_err(fetch_err)?;
        let parent = Category::new(category.label, None);
        dishes.extend(extractor.dishes(&page, &parent));
    }

    Ok(Restaurant { name, dishes })
}

// ── Tests ──
