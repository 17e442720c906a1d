//! Chrome sessions used as pool workers
//!
//! Each session is one Chrome process with its own profile directory and
//! debugging port, plus a single page that is reused for every visit.

use crate::{create_browser_config_with_instance_id, BrowserSettings, ResourceFactory, ScrapeError};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// A running Chrome instance owned by one pool slot
#[derive(Debug)]
pub struct BrowserSession {
    /// Pool slot identifier
    pub id: usize,
    browser: Browser,
    /// Background task driving Chrome DevTools Protocol communication
    handler: JoinHandle<Result<(), CdpError>>,
    page: Page,
    /// Pages visited through this session
    pub visits: usize,
}

impl BrowserSession {
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigates the session's page to `url`.
    pub async fn goto(&mut self, url: &str) -> Result<(), ScrapeError> {
        self.visits += 1;
        self.page
            .goto(url)
            .await
            .map_err(|e| ScrapeError::NavigationFailed(format!("{url}: {e}")))?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<(), ScrapeError> {
        let closed = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            debug!("driver-{} exit wait failed: {}", self.id, e);
        }
        self.handler.abort();

        closed
            .map(|_| ())
            .map_err(|e| ScrapeError::BrowserCloseFailed(format!("session {}: {}", self.id, e)))
    }
}

/// Launches and closes [`BrowserSession`]s for the worker pool
pub struct BrowserFactory {
    settings: BrowserSettings,
}

impl BrowserFactory {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    async fn launch_session(&self, id: usize) -> Result<BrowserSession, ScrapeError> {
        let user_data_dir = format!("/tmp/places-scraper-{}-{}", std::process::id(), id);
        std::fs::create_dir_all(&user_data_dir).map_err(|e| {
            ScrapeError::BrowserLaunchFailed(format!("Failed to create user data dir: {e}"))
        })?;

        let config = create_browser_config_with_instance_id(&self.settings, id)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::BrowserLaunchFailed(e.to_string()))?;

        // The handler is a stream of CDP events and must be polled for the
        // browser to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(session = id, "Handler error: {}", e);
                }
            }
            debug!(session = id, "Handler stream ended");
            Ok(())
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(ScrapeError::BrowserLaunchFailed(format!(
                    "session {id}: failed to open page: {e}"
                )));
            }
        };

        Ok(BrowserSession {
            id,
            browser,
            handler,
            page,
            visits: 0,
        })
    }
}

#[async_trait]
impl ResourceFactory for BrowserFactory {
    type Resource = BrowserSession;

    async fn create(&self, id: usize) -> Result<BrowserSession, ScrapeError> {
        // Launching several Chrome processes at the same instant is unreliable.
        if id > 0 && !self.settings.launch_stagger.is_zero() {
            sleep(self.settings.launch_stagger).await;
        }

        match self.launch_session(id).await {
            Ok(session) => {
                info!("Created driver-{}", id);
                Ok(session)
            }
            Err(e) => {
                error!("Failed to create driver-{}: {}", id, e);
                Err(e)
            }
        }
    }

    async fn destroy(&self, id: usize, session: BrowserSession) -> Result<(), ScrapeError> {
        let visits = session.visits;
        session.close().await.map_err(|e| {
            warn!("Failed to quit driver-{}: {}", id, e);
            e
        })?;
        debug!(session = id, visits, "driver quit");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> BrowserSettings {
        BrowserSettings {
            launch_stagger: Duration::ZERO,
            debugging_port_base: 9400,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_chrome_fails_launch() {
        let factory = BrowserFactory::new(BrowserSettings {
            chrome_path: Some("/nonexistent/chrome".to_string()),
            ..settings()
        });

        let err = factory.create(0).await.unwrap_err();
        assert!(matches!(err, ScrapeError::BrowserLaunchFailed(_)));
    }

    #[tokio::test]
    #[ignore = "needs a local Chrome"]
    async fn test_session_closes_cleanly() {
        let factory = BrowserFactory::new(settings());

        let mut session = factory.create(0).await.unwrap();
        session.goto("about:blank").await.unwrap();

        // Closing waits for the process to exit; a failed wait is only logged.
        assert!(factory.destroy(0, session).await.is_ok());
    }
}
