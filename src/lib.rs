pub mod config;
pub mod detail_scraper;
pub mod list_scraper;
pub mod orchestrator;
pub mod page_driver;
pub mod persistence;
pub mod progress;
pub mod ratelimit;
pub mod records;
pub mod requests;
pub mod scrape_error;
pub mod scraping_context;
pub mod text_manipulators;
pub mod webdriver;

pub use detail_scraper::DetailScraper;
pub use list_scraper::TrainListScraper;
pub use orchestrator::{Orchestrator, SessionPolicy};
pub use page_driver::{DriverError, PageDriver, SessionLauncher};
pub use records::{DelayFailure, DelayInfo, StopRecord, TrainRecord};
pub use scraping_context::ScrapingContext;
