use std::{future::Future, time::Duration};

use fantoccini::{
    Client, ClientBuilder, Locator, elements::Element, error::CmdError, wd::TimeoutConfiguration,
};
use log::warn;
use serde_json::{Map, Value, json};

use crate::page_driver::{DriverError, PageDriver, SessionLauncher};

// Slack on top of the server-side page load timeout before giving up locally.
const NAVIGATION_GRACE: Duration = Duration::from_secs(2);

impl From<CmdError> for DriverError {
    fn from(err: CmdError) -> Self {
        DriverError::Command(err.to_string())
    }
}

/// Runs one WebDriver command with a local deadline. Server-side timeouts come back
/// as [`DriverError::Timeout`] too.
pub async fn bounded<T>(
    timeout: Duration,
    what: impl Into<String>,
    command: impl Future<Output = Result<T, CmdError>>,
) -> Result<T, DriverError> {
    match tokio::time::timeout(timeout, command).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) if err.is_timeout() || err.is_script_timeout() => {
            Err(DriverError::Timeout {
                timeout,
                what: what.into(),
            })
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(DriverError::Timeout {
            timeout,
            what: what.into(),
        }),
    }
}

/// A browser tab driven over the WebDriver protocol.
pub struct WebDriverPage {
    client: Client,
    command_timeout: Duration,
}

impl WebDriverPage {
    pub fn new(client: Client, command_timeout: Duration) -> Self {
        Self {
            client,
            command_timeout,
        }
    }
}

impl PageDriver for WebDriverPage {
    type Element = Element;

    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        bounded(
            timeout + NAVIGATION_GRACE,
            format!("navigation to {url}"),
            self.client.goto(url),
        )
        .await
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<Element>, DriverError> {
        bounded(
            self.command_timeout,
            format!("lookup of `{selector}`"),
            self.client.find_all(Locator::Css(selector)),
        )
        .await
    }

    async fn find_all_in(
        &self,
        parent: &Element,
        selector: &str,
    ) -> Result<Vec<Element>, DriverError> {
        bounded(
            self.command_timeout,
            format!("lookup of `{selector}`"),
            parent.find_all(Locator::Css(selector)),
        )
        .await
    }

    async fn text(&self, element: &Element) -> Result<String, DriverError> {
        bounded(self.command_timeout, "element text", element.text()).await
    }

    async fn attr(&self, element: &Element, name: &str) -> Result<Option<String>, DriverError> {
        bounded(
            self.command_timeout,
            format!("attribute {name}"),
            element.attr(name),
        )
        .await
    }

    async fn click(&self, element: &Element) -> Result<(), DriverError> {
        bounded(self.command_timeout, "click", element.click()).await
    }

    async fn fill(&self, element: &Element, value: &str) -> Result<(), DriverError> {
        bounded(self.command_timeout, "clearing an input", element.clear()).await?;
        bounded(self.command_timeout, "typing", element.send_keys(value)).await
    }

    async fn source(&self) -> Result<String, DriverError> {
        bounded(self.command_timeout, "page source", self.client.source()).await
    }

    async fn close(self) -> Result<(), DriverError> {
        bounded(self.command_timeout, "closing the session", self.client.close()).await
    }
}

/// Opens Chrome sessions through a WebDriver server such as chromedriver or a
/// Selenium hub.
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    pub webdriver_url: String,
    pub headless: bool,
    pub language: String,
    pub connect_timeout: Duration,
    /// Applied by the browser itself, so an abandoned navigation stops there too.
    pub page_load_timeout: Duration,
    pub script_timeout: Duration,
    /// Local deadline for every other command.
    pub command_timeout: Duration,
}

impl WebDriverLauncher {
    pub fn new(webdriver_url: impl Into<String>, headless: bool) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            headless,
            language: "pl-PL".to_string(),
            connect_timeout: Duration::from_secs(30),
            page_load_timeout: Duration::from_secs(30),
            script_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = timeout;
        self
    }

    fn capabilities(&self, user_agent: &str) -> Map<String, Value> {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            format!("--lang={}", self.language),
            format!("--user-agent={user_agent}"),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }

        let mut caps = Map::new();
        caps.insert("browserName".to_string(), json!("chrome"));
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
        caps
    }

    pub fn session_timeouts(&self) -> TimeoutConfiguration {
        // Implicit waits stay off: every wait polls with its own deadline.
        TimeoutConfiguration::new(
            Some(self.script_timeout),
            Some(self.page_load_timeout),
            Some(Duration::ZERO),
        )
    }
}

impl SessionLauncher for WebDriverLauncher {
    type Page = WebDriverPage;

    async fn launch(&self, user_agent: &str) -> Result<WebDriverPage, DriverError> {
        let mut builder = ClientBuilder::native();
        builder.capabilities(self.capabilities(user_agent));
        let connecting = builder.connect(&self.webdriver_url);
        let client = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(client)) => client,
            Ok(Err(err)) => return Err(DriverError::Session(err.to_string())),
            Err(_) => {
                return Err(DriverError::Session(format!(
                    "no session from {} within {:?}",
                    self.webdriver_url, self.connect_timeout
                )));
            }
        };

        if let Err(err) = client.update_timeouts(self.session_timeouts()).await {
            if let Err(close_err) = client.close().await {
                warn!("Closing the half-started browser session failed: {close_err}");
            }
            return Err(DriverError::Session(format!(
                "could not set browser timeouts: {err}"
            )));
        }
        Ok(WebDriverPage::new(client, self.command_timeout))
    }
}
