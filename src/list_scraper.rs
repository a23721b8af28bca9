use std::{cell::Cell, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use chrono::NaiveDate;
use log::{debug, info, warn};
use scraper::{Html, Selector};

use crate::{
    page_driver::{DriverError, PageDriver, SessionLauncher},
    progress::Progress,
    ratelimit::random_between,
    records::{LISTING_HEADERS, TrainRecord},
    requests::{FetchError, ListingSource, random_user_agent},
    scrape_error::ListScrapeError,
    text_manipulators::{extract_text, normalize_whitespace},
};

pub const LISTING_URL: &str =
    "https://www.intercity.pl/pl/site/dla-pasazera/informacje/frekwencja.html";

/// Category filters sent with every listing request: premium, IC and TLK services.
pub const LISTING_CATEGORIES: [(&str, &str); 4] = [
    ("eic_premium", "eip"),
    ("eic", "eic"),
    ("ic", "ic"),
    ("tlk", "tlk"),
];

// Rendering-only column between "to" and "occupancy".
const SKIPPED_COLUMN: usize = 5;

pub type RawRow = Vec<String>;

#[derive(Debug, Clone)]
pub struct ListScraperSettings {
    pub listing_url: String,
    /// Attempts per page, the first one included.
    pub retry_ceiling: u32,
    /// Delay before the first retry; doubled for every retry after it.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter: bool,
    pub rotate_user_agent: bool,
    /// Random pause taken between two listing pages.
    pub page_pause: (Duration, Duration),
    pub browser_timeout: Duration,
}

impl Default for ListScraperSettings {
    fn default() -> Self {
        Self {
            listing_url: LISTING_URL.to_string(),
            retry_ceiling: 4,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            backoff_jitter: true,
            rotate_user_agent: true,
            page_pause: (Duration::from_millis(400), Duration::from_millis(1100)),
            browser_timeout: Duration::from_secs(30),
        }
    }
}

impl ListScraperSettings {
    /// Retry schedule for one listing page.
    pub fn backoff(&self) -> ExponentialBuilder {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.backoff_base)
            .with_max_delay(self.backoff_max)
            .with_factor(2.0)
            .with_max_times(self.retry_ceiling.max(1) as usize - 1);
        if self.backoff_jitter {
            backoff.with_jitter()
        } else {
            backoff
        }
    }
}

pub fn build_listing_url(base: &str, date: &str, page: u32) -> String {
    let categories = LISTING_CATEGORIES
        .iter()
        .map(|(key, code)| format!("category%5B{key}%5D={code}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?location=&date={date}&{categories}&page={page}")
}

/// Parses the listing table. `None` when the page has no table at all.
pub fn parse_listing_page(html: &str) -> Option<Vec<RawRow>> {
    let document = Html::parse_document(html);
    let table_selector = Selector::parse("table").unwrap();
    let row_selector = Selector::parse("tr").unwrap();
    let cell_selector = Selector::parse("td").unwrap();

    let table = document.select(&table_selector).next()?;
    let rows = table
        .select(&row_selector)
        // Header row.
        .skip(1)
        .map(|row| {
            row.select(&cell_selector)
                .enumerate()
                .filter(|(i, _)| *i != SKIPPED_COLUMN)
                .map(|(_, cell)| normalize_whitespace(&extract_text(cell)))
                .collect::<RawRow>()
        })
        .filter(|cells| !cells.is_empty())
        .collect();
    Some(rows)
}

/// Zips raw rows against [`LISTING_HEADERS`] and stamps them with `date`.
pub fn rows_to_records(rows: &[RawRow], date: &str) -> Vec<TrainRecord> {
    rows.iter()
        .map(|row| {
            if row.len() > LISTING_HEADERS.len() {
                debug!(
                    "Listing row for train {:?} has {} cells, keeping the first {}",
                    row.get(1),
                    row.len(),
                    LISTING_HEADERS.len()
                );
            }
            TrainRecord::from_listing_row(row, date)
        })
        .collect()
}

/// Placeholder for a list scraper without a browser fallback.
pub struct NoFallback;

impl ListingSource for NoFallback {
    async fn fetch_page(&self, _url: &str, _user_agent: &str) -> Result<String, FetchError> {
        Err(FetchError::Browser("no browser fallback configured".to_string()))
    }
}

/// Fetches listing pages through a short-lived browser session.
pub struct BrowserFallback<'a, L> {
    launcher: &'a L,
    timeout: Duration,
}

impl<'a, L: SessionLauncher> BrowserFallback<'a, L> {
    pub fn new(launcher: &'a L, timeout: Duration) -> Self {
        Self { launcher, timeout }
    }
}

impl<L: SessionLauncher> ListingSource for BrowserFallback<'_, L> {
    async fn fetch_page(&self, url: &str, user_agent: &str) -> Result<String, FetchError> {
        let browser_err = |err: DriverError| FetchError::Browser(err.to_string());

        let page = self.launcher.launch(user_agent).await.map_err(browser_err)?;
        let result: Result<String, DriverError> = async {
            page.goto(url, self.timeout).await?;
            // A missing table is the end of the listing, not a failure.
            match page.wait_for("table", self.timeout).await {
                Ok(_) => {}
                Err(err) if err.is_timeout() => {}
                Err(err) => return Err(err),
            }
            page.source().await
        }
        .await;

        if let Err(err) = page.close().await {
            warn!("Closing the fallback browser session failed: {err}");
        }
        result.map_err(browser_err)
    }
}

pub struct TrainListScraper<'a, S, F = NoFallback> {
    source: &'a S,
    fallback: Option<&'a F>,
    settings: &'a ListScraperSettings,
}

impl<'a, S: ListingSource> TrainListScraper<'a, S, NoFallback> {
    pub fn new(source: &'a S, settings: &'a ListScraperSettings) -> Self {
        Self {
            source,
            fallback: None,
            settings,
        }
    }
}

impl<'a, S: ListingSource, F: ListingSource> TrainListScraper<'a, S, F> {
    pub fn with_fallback<G: ListingSource>(self, fallback: &'a G) -> TrainListScraper<'a, S, G> {
        TrainListScraper {
            source: self.source,
            fallback: Some(fallback),
            settings: self.settings,
        }
    }

    /// Lists every train running on `date`, with `delay_info` unset.
    pub async fn scrape(
        &self,
        date: &str,
        progress: &mut dyn Progress,
    ) -> Result<Vec<TrainRecord>, ListScrapeError> {
        info!("Fetching the train listing for {date}");
        let rows = self.scrape_rows(date, progress).await?;
        let records = rows_to_records(&rows, date);
        info!("Listed {} trains for {date}", records.len());
        Ok(records)
    }

    pub async fn scrape_rows(
        &self,
        date: &str,
        progress: &mut dyn Progress,
    ) -> Result<Vec<RawRow>, ListScrapeError> {
        if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            return Err(ListScrapeError::InvalidDate(date.to_string()));
        }

        let mut rows = Vec::new();
        let mut page = 1;
        loop {
            let url = build_listing_url(&self.settings.listing_url, date, page);
            debug!("Fetching listing page {page}: {url}");
            let html = self.fetch_with_retries(page, &url).await?;

            let Some(page_rows) = parse_listing_page(&html) else {
                if page == 1 {
                    warn!("Listing page 1 has no table, no trains listed for {date}");
                } else {
                    info!("No table on listing page {page}, end of results");
                }
                break;
            };
            if page_rows.is_empty() {
                if page == 1 {
                    warn!("Listing table is empty on page 1, no trains listed for {date}");
                } else {
                    info!("Listing table on page {page} is empty, end of results");
                }
                break;
            }

            progress.page_done(page, page_rows.len());
            rows.extend(page_rows);
            page += 1;

            let (low, high) = self.settings.page_pause;
            let pause = random_between(low, high);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(rows)
    }

    async fn fetch_with_retries(&self, page: u32, url: &str) -> Result<String, ListScrapeError> {
        let ceiling = self.settings.retry_ceiling.max(1);
        let user_agent = Cell::new(random_user_agent());
        let attempts = Cell::new(0u32);

        let (source, user_agent, attempts) = (self.source, &user_agent, &attempts);
        let fetch = move || async move {
            attempts.set(attempts.get() + 1);
            source.fetch_page(url, user_agent.get()).await
        };
        let result = fetch
            .retry(self.settings.backoff())
            .sleep(tokio::time::sleep)
            .notify(|err: &FetchError, delay: Duration| {
                warn!(
                    "Listing page {page}, attempt {}/{ceiling} failed: {err}, retrying in {delay:?}",
                    attempts.get()
                );
                if self.settings.rotate_user_agent {
                    user_agent.set(random_user_agent());
                }
            })
            .await;
        let last = match result {
            Ok(html) => return Ok(html),
            Err(err) => err,
        };
        let attempt = attempts.get();
        warn!("Listing page {page}, attempt {attempt}/{ceiling} failed: {last}");

        let Some(fallback) = self.fallback else {
            return Err(ListScrapeError::RetriesExhausted {
                page,
                attempts: attempt,
                last,
            });
        };
        warn!("All HTTP attempts for listing page {page} failed, falling back to the browser");
        fallback
            .fetch_page(url, user_agent.get())
            .await
            .map_err(|source| ListScrapeError::FallbackFailed { page, source })
    }
}
