use crate::{BrowserSession, Config, ItemProcessor, Place, ScrapeError, WorkItem};
use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Reads the star rating from a place page.
#[derive(Debug, Clone)]
pub struct RatingExtractor {
    settle_delay: Duration,
    selector: String,
    recovery_url: String,
}

impl RatingExtractor {
    pub fn new(
        settle_delay: Duration,
        selector: impl Into<String>,
        recovery_url: impl Into<String>,
    ) -> Self {
        Self {
            settle_delay,
            selector: selector.into(),
            recovery_url: recovery_url.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.page_settle_delay,
            config.rating_selector.clone(),
            config.recovery_url.clone(),
        )
    }

    /// The rating is the text of the first grandchild of the first
    /// container that has exactly two children.
    async fn read_rating(&self, page: &Page, item: &str) -> Result<String, ScrapeError> {
        let containers = page
            .find_elements(self.selector.as_str())
            .await
            .map_err(|e| ScrapeError::PageError(format!("{}: {}", self.selector, e)))?;

        for container in containers {
            let children = child_elements(&container).await?;
            if children.len() != 2 {
                continue;
            }

            let grandchildren = child_elements(&children[0]).await?;
            let Some(first) = grandchildren.first() else {
                return Err(ScrapeError::ElementNotFound(format!(
                    "{} rating text",
                    self.selector
                )));
            };

            let text = first
                .inner_text()
                .await
                .map_err(|e| ScrapeError::PageError(e.to_string()))?;
            return Ok(text.unwrap_or_default().trim().to_string());
        }

        Err(ScrapeError::RatingNotFound(item.to_string()))
    }

    async fn recover(&self, session: &mut BrowserSession) {
        if let Err(e) = session.goto(&self.recovery_url).await {
            warn!(session = session.id, error = %e, "failed to reset page");
        }
    }
}

async fn child_elements(element: &Element) -> Result<Vec<Element>, ScrapeError> {
    element
        .find_elements(":scope > *")
        .await
        .map_err(|e| ScrapeError::PageError(e.to_string()))
}

#[async_trait]
impl ItemProcessor<BrowserSession, Place> for RatingExtractor {
    type Outcome = String;

    async fn process(
        &self,
        session: &mut BrowserSession,
        place: &Place,
        target: &str,
    ) -> Result<String, ScrapeError> {
        info!("navigate to: {:?}", target);

        let result = match session.goto(target).await {
            Ok(()) => {
                sleep(self.settle_delay).await;
                self.read_rating(session.page(), &place.label()).await
            }
            Err(e) => Err(e),
        };

        match result {
            Err(ScrapeError::RatingNotFound(_)) | Ok(_) => result,
            Err(e) => {
                error!("Error on {}: {}", place.label(), e);
                self.recover(session).await;
                Err(e)
            }
        }
    }
}
