use crate::{config::ScrapingConfig, requests::RequestClient, webdriver::WebDriverLauncher};

pub struct ScrapingContext {
    pub scraping_config: ScrapingConfig,
    pub request_client: RequestClient,
    pub launcher: WebDriverLauncher,
}

impl ScrapingContext {
    pub fn new() -> anyhow::Result<Self> {
        let scraping_config = ScrapingConfig::new()?;
        let request_client = RequestClient::new(scraping_config.http_timeout)?;
        let launcher =
            WebDriverLauncher::new(&scraping_config.webdriver_url, scraping_config.headless)
                .with_page_load_timeout(scraping_config.orchestrator.navigation_timeout);
        Ok(ScrapingContext {
            scraping_config,
            request_client,
            launcher,
        })
    }
}
