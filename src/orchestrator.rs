use std::time::Duration;

use log::{error, info, warn};
use serde::Deserialize;
use tokio::time::{Instant, sleep};

use crate::{
    detail_scraper::{DetailError, DetailScraper, DetailScraperSettings},
    list_scraper::TrainListScraper,
    page_driver::{DriverError, PageDriver, SessionLauncher},
    progress::Progress,
    records::{DelayFailure, DelayInfo, StopRecord, TrainRecord},
    requests::{ListingSource, random_user_agent},
    scrape_error::ListScrapeError,
};

pub const PORTAL_URL: &str = "https://portalpasazera.pl/Wyszukiwarka/Index";
pub const SEARCH_MODE_SELECTOR: &str = "span.find-train-selector";
pub const SEARCH_MODE_OPTION: &str = "li";
pub const BY_NUMBER_LABEL: &str = "po numerze";
pub const COOKIE_BUTTON: &str = "button";
pub const COOKIE_LABELS: [&str; 2] = ["Akceptuj", "Zgoda"];

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Whether trains share one browser session or each get their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// One session for the whole batch; startup is slow and the portal tolerates
    /// a long-lived session better than rapid reconnects.
    #[default]
    ReuseSession,
    /// A fresh session, with a freshly drawn user agent, for every train.
    FreshSessionPerTrain,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub portal_url: String,
    pub navigation_timeout: Duration,
    pub cookie_timeout: Duration,
    pub session_policy: SessionPolicy,
    pub detail: DetailScraperSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            portal_url: PORTAL_URL.to_string(),
            navigation_timeout: Duration::from_secs(30),
            cookie_timeout: Duration::from_secs(5),
            session_policy: SessionPolicy::default(),
            detail: DetailScraperSettings::default(),
        }
    }
}

/// Runs the list scrape, then enriches every listed train through the browser.
pub struct Orchestrator<'a, L> {
    launcher: &'a L,
    settings: &'a OrchestratorSettings,
}

impl<'a, L: SessionLauncher> Orchestrator<'a, L> {
    pub fn new(launcher: &'a L, settings: &'a OrchestratorSettings) -> Self {
        Self { launcher, settings }
    }

    /// Full pipeline for one date. Only a list-phase failure is an error; every
    /// listed train comes back with `delay_info` set.
    pub async fn run<S, F>(
        &self,
        list_scraper: &TrainListScraper<'_, S, F>,
        date: &str,
        progress: &mut dyn Progress,
    ) -> Result<Vec<TrainRecord>, ListScrapeError>
    where
        S: ListingSource,
        F: ListingSource,
    {
        let mut trains = list_scraper.scrape(date, progress).await?;
        self.enrich(&mut trains, progress).await;
        Ok(trains)
    }

    /// Sets `delay_info` on every train, in order.
    pub async fn enrich(&self, trains: &mut [TrainRecord], progress: &mut dyn Progress) {
        progress.begin(trains.len());
        match self.settings.session_policy {
            SessionPolicy::ReuseSession => self.enrich_in_one_session(trains, progress).await,
            SessionPolicy::FreshSessionPerTrain => {
                self.enrich_session_per_train(trains, progress).await
            }
        }
        progress.finish();
    }

    async fn enrich_in_one_session(
        &self,
        trains: &mut [TrainRecord],
        progress: &mut dyn Progress,
    ) {
        let page = match self.start_session().await {
            Ok(page) => page,
            Err(err) => {
                error!("Could not start the browser session: {err}");
                stamp_connection_error(trains, progress);
                return;
            }
        };

        for train in trains.iter_mut() {
            let outcome = self.process_single_train(&page, &train.number).await;
            progress.train_done(&train.number, &outcome);
            train.delay_info = Some(outcome);
        }

        close_session(page).await;
    }

    async fn enrich_session_per_train(
        &self,
        trains: &mut [TrainRecord],
        progress: &mut dyn Progress,
    ) {
        for index in 0..trains.len() {
            let page = match self.start_session().await {
                Ok(page) => page,
                Err(err) => {
                    error!(
                        "Could not start a browser session for train {}: {err}",
                        trains[index].number
                    );
                    stamp_connection_error(&mut trains[index..], progress);
                    return;
                }
            };

            let train = &mut trains[index];
            let outcome = self.process_single_train(&page, &train.number).await;
            progress.train_done(&train.number, &outcome);
            train.delay_info = Some(outcome);

            close_session(page).await;
        }
    }

    /// Launches the browser, opens the portal once and dismisses the cookie banner.
    async fn start_session(&self) -> Result<L::Page, DriverError> {
        let page = self.launcher.launch(random_user_agent()).await?;
        info!("Browser session started");

        match page
            .goto(&self.settings.portal_url, self.settings.navigation_timeout)
            .await
        {
            Ok(()) => self.accept_cookies(&page).await,
            // Every train navigates again, so a slow first load is not fatal.
            Err(err) => warn!("Opening the passenger portal failed: {err}"),
        }
        Ok(page)
    }

    async fn accept_cookies(&self, page: &L::Page) {
        let deadline = Instant::now() + self.settings.cookie_timeout;
        loop {
            for label in COOKIE_LABELS {
                match page.find_with_text(COOKIE_BUTTON, label).await {
                    Ok(buttons) => {
                        if let Some(button) = buttons.first() {
                            match page.click(button).await {
                                Ok(()) => info!("Accepted cookies"),
                                Err(err) => warn!("Could not click the cookie button: {err}"),
                            }
                            return;
                        }
                    }
                    Err(err) => {
                        warn!("Looking for the cookie banner failed: {err}");
                        return;
                    }
                }
            }
            if Instant::now() >= deadline {
                warn!("The cookie banner did not show up or could not be clicked");
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Never fails: every error becomes the failure recorded on the train.
    async fn process_single_train(&self, page: &L::Page, number: &str) -> DelayInfo {
        if number.trim().is_empty() {
            warn!("Skipping a listed train without a number");
            return DelayInfo::Failed(DelayFailure::NotAvailable);
        }

        match self.search_train(page, number).await {
            Ok(stops) => DelayInfo::Stops(stops),
            Err(DetailError::Unavailable(failure)) => DelayInfo::Failed(failure),
            Err(DetailError::Driver(err)) if err.is_timeout() => {
                error!("Timed out while processing train {number}, skipping it: {err}");
                DelayInfo::Failed(DelayFailure::ScrapingTimeout)
            }
            Err(DetailError::Driver(err)) => {
                error!("Unexpected error while processing train {number}, skipping it: {err}");
                DelayInfo::Failed(DelayFailure::UnknownError)
            }
        }
    }

    async fn search_train(
        &self,
        page: &L::Page,
        number: &str,
    ) -> Result<Vec<StopRecord>, DetailError> {
        page.goto(&self.settings.portal_url, self.settings.navigation_timeout)
            .await?;
        self.select_search_by_number(page).await?;
        DetailScraper::new(page, &self.settings.detail)
            .scrape(number)
            .await
    }

    async fn select_search_by_number(&self, page: &L::Page) -> Result<(), DriverError> {
        let timeout = self.settings.detail.form_timeout;
        let selector = page.wait_for(SEARCH_MODE_SELECTOR, timeout).await?;
        page.click(&selector).await?;
        let option = page
            .wait_for_text(SEARCH_MODE_OPTION, BY_NUMBER_LABEL, timeout)
            .await?;
        page.click(&option).await
    }
}

fn stamp_connection_error(trains: &mut [TrainRecord], progress: &mut dyn Progress) {
    for train in trains.iter_mut() {
        let outcome = DelayInfo::Failed(DelayFailure::ConnectionError);
        progress.train_done(&train.number, &outcome);
        train.delay_info = Some(outcome);
    }
}

async fn close_session<P: PageDriver>(page: P) {
    match page.close().await {
        Ok(()) => info!("Browser session closed"),
        Err(err) => warn!("Closing the browser session failed: {err}"),
    }
}
