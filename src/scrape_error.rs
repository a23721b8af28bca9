use thiserror::Error;

use crate::requests::FetchError;

/// Errors that end a whole run.
#[derive(Error, Debug)]
pub enum ListScrapeError {
    #[error("listing page {page} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        page: u32,
        attempts: u32,
        last: FetchError,
    },

    #[error("listing page {page} unreachable over HTTP and through the browser: {source}")]
    FallbackFailed { page: u32, source: FetchError },

    #[error("invalid listing date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
}
