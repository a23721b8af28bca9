use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::{
    page_driver::{DriverError, PageDriver},
    records::{DelayFailure, StopRecord},
    text_manipulators::{
        parse_declared_numbers, parse_delay, parse_difficulty_payload, parse_distance_and_time,
        strip_station_qualifier, time_from_block,
    },
};

pub const NUMBER_INPUT: &str = "#ftn-number";
pub const SEARCH_BUTTON: &str = "#ftn-search";
pub const RESULT_ROW: &str = "div.catalog-table__row";
pub const ROW_NUMBER: &str = "div.col-1.col-6--phone strong span";
pub const ROW_CARRIER: &str = "div:nth-of-type(5) > strong.item-value";
pub const ROW_DETAILS_LINK: &str = "a.item-details.loadScr";
pub const NO_TRAINS_HEADING: &str = "h3";
pub const NO_TRAINS_TEXT: &str = "W obecnej dobie brak kursujących pociągów";
pub const INVALID_NUMBER_ERROR: &str = "div.param-error";
pub const INVALID_NUMBER_TEXT: &str = "Wpisany numer pociągu jest nieprawidłowy";
pub const TIMELINE: &str = "div.timeline";
pub const TIMELINE_ITEM: &str = "div.timeline__item";
pub const STATION_HEADING: &str = "h3.timeline__content-station";
pub const ARRIVAL_BLOCK: &str = "span.timeline__numbers-time__stop";
pub const DEPARTURE_BLOCK: &str = "span.timeline__numbers-time__start";
pub const ARRIVAL_DELAY_BADGE: &str = "span.timeline__numbers-time__stop span.inlinedelay";
pub const DEPARTURE_DELAY_BADGE: &str = "span.timeline__numbers-time__start span.inlinedelay";
pub const DISTANCE_BLOCK: &str = "p.timeline__numbers-km";
pub const DIFFICULTIES_BUTTON: &str = "button[data-window-type='difficulties']";
pub const DIFFICULTIES_PAYLOAD: &str = "data-obj-1";

const POLL_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Debug, Clone)]
pub struct DetailScraperSettings {
    /// Carrier code a result row must declare.
    pub operator_code: String,
    /// Largest accepted difference between requested and declared train numbers.
    pub number_tolerance: u32,
    /// How long to wait for the search to settle into a terminal state.
    pub search_timeout: Duration,
    pub form_timeout: Duration,
    pub route_timeout: Duration,
}

impl Default for DetailScraperSettings {
    fn default() -> Self {
        Self {
            operator_code: "IC".to_string(),
            number_tolerance: 1,
            search_timeout: Duration::from_secs(10),
            form_timeout: Duration::from_secs(5),
            route_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Error, Debug)]
pub enum DetailError {
    #[error("no route data: {0}")]
    Unavailable(DelayFailure),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// What the portal settled on after a search was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Results,
    NoTrains,
    InvalidNumber,
}

/// How one results row compares to the requested train.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowMatch {
    Matched,
    CarrierMismatch(String),
    NumberMismatch,
    Malformed(String),
}

/// Does any number declared in a results row sit within `tolerance` of `requested`?
///
/// Shared runs list every portion number (`"5320 5321"`), and numbers flip by one
/// across midnight, hence the tolerance. `Err` when no declared token is a number.
pub fn declared_number_matches(
    declared: &str,
    requested: u32,
    tolerance: u32,
) -> Result<bool, String> {
    let parsed = parse_declared_numbers(declared);
    let numbers: Vec<u32> = parsed.iter().filter_map(|n| n.as_ref().ok()).copied().collect();
    if numbers.is_empty() {
        return Err(declared.to_string());
    }
    for bad in parsed.iter().filter_map(|n| n.as_ref().err()) {
        debug!("Ignoring non-numeric token {bad:?} in declared numbers {declared:?}");
    }
    Ok(numbers.iter().any(|n| n.abs_diff(requested) <= tolerance))
}

pub fn classify_row(
    carrier: &str,
    declared: &str,
    operator_code: &str,
    requested: u32,
    tolerance: u32,
) -> RowMatch {
    match declared_number_matches(declared, requested, tolerance) {
        Err(raw) => RowMatch::Malformed(raw),
        Ok(false) => RowMatch::NumberMismatch,
        Ok(true) if carrier.trim() != operator_code => {
            RowMatch::CarrierMismatch(carrier.trim().to_string())
        }
        Ok(true) => RowMatch::Matched,
    }
}

/// Searches the passenger portal for one train number and reads its route timeline.
///
/// Expects the page to already show the search form in "by number" mode.
pub struct DetailScraper<'a, P> {
    page: &'a P,
    settings: &'a DetailScraperSettings,
}

impl<'a, P: PageDriver> DetailScraper<'a, P> {
    pub fn new(page: &'a P, settings: &'a DetailScraperSettings) -> Self {
        Self { page, settings }
    }

    pub async fn scrape(&self, number: &str) -> Result<Vec<StopRecord>, DetailError> {
        info!("Fetching route details for train {number}");
        let Ok(requested) = number.trim().parse::<u32>() else {
            warn!("Train number {number:?} is not numeric, cannot search for it");
            return Err(DetailError::Unavailable(DelayFailure::NotAvailable));
        };

        self.submit(number).await?;
        match self.await_search_state().await? {
            Some(SearchState::Results) => {}
            Some(SearchState::NoTrains) => {
                warn!("No train {number} runs today according to the portal");
                return Err(DetailError::Unavailable(DelayFailure::NotAvailable));
            }
            Some(SearchState::InvalidNumber) => {
                warn!("The portal rejected {number} as an invalid train number");
                return Err(DetailError::Unavailable(DelayFailure::NotAvailable));
            }
            None => {
                error!(
                    "Search for train {number} did not settle within {:?}",
                    self.settings.search_timeout
                );
                return Err(DetailError::Unavailable(DelayFailure::PageLoadTimeout));
            }
        }

        let row = self.find_matching_row(number, requested).await?;
        self.open_route(number, &row).await?;
        let stops = self.extract_stops(number).await?;
        info!("Read {} stations for train {number}", stops.len());
        Ok(stops)
    }

    async fn submit(&self, number: &str) -> Result<(), DriverError> {
        let input = self
            .page
            .wait_for(NUMBER_INPUT, self.settings.form_timeout)
            .await?;
        self.page.fill(&input, number).await?;
        self.page.click_first(SEARCH_BUTTON).await
    }

    /// Polls for results, the "no trains" message or the validation error.
    /// `None` when none appeared in time.
    pub async fn await_search_state(&self) -> Result<Option<SearchState>, DriverError> {
        let deadline = Instant::now() + self.settings.search_timeout;
        loop {
            if !self
                .page
                .find_with_text(NO_TRAINS_HEADING, NO_TRAINS_TEXT)
                .await?
                .is_empty()
            {
                return Ok(Some(SearchState::NoTrains));
            }
            if !self
                .page
                .find_with_text(INVALID_NUMBER_ERROR, INVALID_NUMBER_TEXT)
                .await?
                .is_empty()
            {
                return Ok(Some(SearchState::InvalidNumber));
            }
            if !self.page.find_all(RESULT_ROW).await?.is_empty() {
                return Ok(Some(SearchState::Results));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn find_matching_row(
        &self,
        number: &str,
        requested: u32,
    ) -> Result<P::Element, DetailError> {
        let mut other_carrier = None;
        for row in self.page.find_all(RESULT_ROW).await? {
            let (Some(number_el), Some(carrier_el)) = (
                self.page.find_first_in(&row, ROW_NUMBER).await?,
                self.page.find_first_in(&row, ROW_CARRIER).await?,
            ) else {
                debug!("Skipping a result row without train number or carrier for {number}");
                continue;
            };
            let declared = self.page.text(&number_el).await?;
            let carrier = self.page.text(&carrier_el).await?;

            match classify_row(
                &carrier,
                &declared,
                &self.settings.operator_code,
                requested,
                self.settings.number_tolerance,
            ) {
                RowMatch::Matched => {
                    debug!("Train {number} matched result row declaring {declared:?}");
                    return Ok(row);
                }
                RowMatch::CarrierMismatch(carrier) => {
                    debug!("Result row {declared:?} for train {number} is run by {carrier}");
                    other_carrier.get_or_insert(carrier);
                }
                RowMatch::NumberMismatch => {
                    debug!("Result row {declared:?} is too far from train {number}");
                }
                RowMatch::Malformed(raw) => {
                    warn!("Skipping result row with unreadable train number {raw:?}");
                }
            }
        }

        match other_carrier {
            Some(carrier) => warn!(
                "Train {number} is not operated by {}, the portal lists it under {carrier}",
                self.settings.operator_code
            ),
            None => warn!("No result row matches train {number}"),
        }
        Err(DetailError::Unavailable(DelayFailure::NotAvailable))
    }

    async fn open_route(&self, number: &str, row: &P::Element) -> Result<(), DetailError> {
        let opened: Result<(), DriverError> = async {
            let Some(link) = self.page.find_first_in(row, ROW_DETAILS_LINK).await? else {
                return Err(DriverError::NoSuchElement(ROW_DETAILS_LINK.to_string()));
            };
            self.page.click(&link).await?;
            self.page
                .wait_for(TIMELINE, self.settings.route_timeout)
                .await
                .map(|_| ())
        }
        .await;

        opened.map_err(|err| {
            error!("Could not open the route of train {number}: {err}");
            DetailError::Unavailable(DelayFailure::NotFound)
        })
    }

    async fn extract_stops(&self, number: &str) -> Result<Vec<StopRecord>, DetailError> {
        let items = self.page.find_all(TIMELINE_ITEM).await?;
        if items.is_empty() {
            error!("Route timeline of train {number} has no stations");
            return Err(DetailError::Unavailable(DelayFailure::ParsingError));
        }

        let mut stops = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match self.extract_stop(item).await? {
                Some(stop) => stops.push(stop),
                None => {
                    error!(
                        "Station {} on the route of train {number} has no name",
                        index + 1
                    );
                    return Err(DetailError::Unavailable(DelayFailure::ParsingError));
                }
            }
        }
        Ok(stops)
    }

    async fn extract_stop(&self, item: &P::Element) -> Result<Option<StopRecord>, DriverError> {
        let Some(heading) = self.page.find_first_in(item, STATION_HEADING).await? else {
            return Ok(None);
        };
        let station_name = strip_station_qualifier(&self.page.text(&heading).await?);

        let arrival_time = self.block_time(item, ARRIVAL_BLOCK).await?;
        let departure_time = self.block_time(item, DEPARTURE_BLOCK).await?;
        let delay_minutes_arrival = self.last_delay(item, ARRIVAL_DELAY_BADGE).await?;
        let delay_minutes_departure = self.last_delay(item, DEPARTURE_DELAY_BADGE).await?;

        let distance_text = match self.page.find_first_in(item, DISTANCE_BLOCK).await? {
            Some(block) => self.page.text(&block).await?,
            None => String::new(),
        };
        let (distance_km, travel_time) = parse_distance_and_time(&distance_text);

        let (reason, station_label) =
            match self.page.find_first_in(item, DIFFICULTIES_BUTTON).await? {
                Some(button) => match self.page.attr(&button, DIFFICULTIES_PAYLOAD).await? {
                    Some(payload) => parse_difficulty_payload(&payload),
                    None => Default::default(),
                },
                None => Default::default(),
            };

        Ok(Some(StopRecord {
            station_name,
            arrival_time,
            departure_time,
            delay_minutes_arrival,
            delay_minutes_departure,
            distance_km_from_start_to_next: distance_km,
            travel_time_from_start_to_next: travel_time,
            difficulties_info: [Some(reason), Some(station_label)],
        }))
    }

    async fn block_time(
        &self,
        item: &P::Element,
        selector: &str,
    ) -> Result<Option<String>, DriverError> {
        match self.page.find_first_in(item, selector).await? {
            Some(block) => Ok(time_from_block(&self.page.text(&block).await?)),
            None => Ok(None),
        }
    }

    // Superseded badges stay in the markup ahead of the current one.
    async fn last_delay(
        &self,
        item: &P::Element,
        selector: &str,
    ) -> Result<Option<u32>, DriverError> {
        match self.page.find_all_in(item, selector).await?.last() {
            Some(badge) => Ok(Some(parse_delay(&self.page.text(badge).await?))),
            None => Ok(None),
        }
    }
}
