//! The page-driving capability both scrapers are written against.
//!
//! Anything that can navigate, query elements, read their text and attributes, click
//! and type can drive the scrapers. The production backend lives in
//! [`crate::webdriver`]; tests drive the same code over static HTML.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { timeout: Duration, what: String },

    #[error("no element matches `{0}`")]
    NoSuchElement(String),

    #[error("browser session could not be started: {0}")]
    Session(String),

    #[error("browser command failed: {0}")]
    Command(String),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

#[allow(async_fn_in_trait)]
pub trait PageDriver {
    type Element: Clone;

    /// Loads `url`, giving up after `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// All elements matching a CSS selector, in document order. Empty when none match.
    async fn find_all(&self, selector: &str) -> Result<Vec<Self::Element>, DriverError>;

    /// Like [`PageDriver::find_all`], scoped to the descendants of `parent`.
    async fn find_all_in(
        &self,
        parent: &Self::Element,
        selector: &str,
    ) -> Result<Vec<Self::Element>, DriverError>;

    /// Rendered text of an element, one line per block.
    async fn text(&self, element: &Self::Element) -> Result<String, DriverError>;

    async fn attr(&self, element: &Self::Element, name: &str)
    -> Result<Option<String>, DriverError>;

    async fn click(&self, element: &Self::Element) -> Result<(), DriverError>;

    /// Replaces the value of an input element.
    async fn fill(&self, element: &Self::Element, value: &str) -> Result<(), DriverError>;

    /// Serialized HTML of the current document.
    async fn source(&self) -> Result<String, DriverError>;

    async fn close(self) -> Result<(), DriverError>
    where
        Self: Sized;

    async fn find_first(&self, selector: &str) -> Result<Option<Self::Element>, DriverError> {
        Ok(self.find_all(selector).await?.into_iter().next())
    }

    async fn find_first_in(
        &self,
        parent: &Self::Element,
        selector: &str,
    ) -> Result<Option<Self::Element>, DriverError> {
        Ok(self.find_all_in(parent, selector).await?.into_iter().next())
    }

    /// Elements matching `selector` whose text contains `needle`.
    async fn find_with_text(
        &self,
        selector: &str,
        needle: &str,
    ) -> Result<Vec<Self::Element>, DriverError> {
        let mut matching = Vec::new();
        for element in self.find_all(selector).await? {
            if self.text(&element).await?.contains(needle) {
                matching.push(element);
            }
        }
        Ok(matching)
    }

    /// Polls until `selector` matches at least one element.
    async fn wait_for(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Self::Element, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_first(selector).await? {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    timeout,
                    what: format!("`{selector}`"),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Polls until an element matching `selector` contains `needle`.
    async fn wait_for_text(
        &self,
        selector: &str,
        needle: &str,
        timeout: Duration,
    ) -> Result<Self::Element, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_with_text(selector, needle).await?.into_iter().next()
            {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    timeout,
                    what: format!("`{selector}` containing {needle:?}"),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Clicks the first element matching `selector`.
    async fn click_first(&self, selector: &str) -> Result<(), DriverError> {
        match self.find_first(selector).await? {
            Some(element) => self.click(&element).await,
            None => Err(DriverError::NoSuchElement(selector.to_string())),
        }
    }
}

/// Starts browser sessions. One session yields one page.
#[allow(async_fn_in_trait)]
pub trait SessionLauncher {
    type Page: PageDriver;

    async fn launch(&self, user_agent: &str) -> Result<Self::Page, DriverError>;
}
