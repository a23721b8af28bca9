use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub type TrainNumber = String;

/// Column order of one row in the train listing table.
pub const LISTING_HEADERS: [&str; 7] = [
    "domestic", "number", "category", "name", "from", "to", "occupancy",
];

/// Filler used for listing cells the table did not provide.
pub const MISSING_CELL: &str = "n/a";

/// One scheduled service on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRecord {
    pub domestic: String,
    pub number: TrainNumber,
    pub category: String,
    pub name: String,
    pub from: String,
    pub to: String,
    pub occupancy: String,
    pub date: String,
    #[serde(default, deserialize_with = "deserialize_delay_info")]
    pub delay_info: Option<DelayInfo>,
}

impl TrainRecord {
    /// Builds a record from a raw listing row, padding short rows with [`MISSING_CELL`].
    pub fn from_listing_row(row: &[String], date: &str) -> Self {
        let cell = |i: usize| {
            row.get(i)
                .cloned()
                .unwrap_or_else(|| MISSING_CELL.to_string())
        };
        Self {
            domestic: cell(0),
            number: cell(1),
            category: cell(2),
            name: cell(3),
            from: cell(4),
            to: cell(5),
            occupancy: cell(6),
            date: date.to_string(),
            delay_info: None,
        }
    }

    pub fn stops(&self) -> Option<&[StopRecord]> {
        match &self.delay_info {
            Some(DelayInfo::Stops(stops)) => Some(stops),
            _ => None,
        }
    }
}

/// One station along a train's route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRecord {
    pub station_name: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub delay_minutes_arrival: Option<u32>,
    pub delay_minutes_departure: Option<u32>,
    /// Cumulative kilometres from the origin to the *next* stop.
    pub distance_km_from_start_to_next: Option<f64>,
    pub travel_time_from_start_to_next: Option<String>,
    /// `[reason, affected station label]`
    pub difficulties_info: [Option<String>; 2],
}

/// Either the full route of a train or the reason it could not be scraped.
#[derive(Debug, Clone, PartialEq)]
pub enum DelayInfo {
    Stops(Vec<StopRecord>),
    Failed(DelayFailure),
}

impl Serialize for DelayInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DelayInfo::Stops(stops) => stops.serialize(serializer),
            DelayInfo::Failed(failure) => serializer.serialize_str(failure.as_str()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDelayInfo {
    Stops(Vec<StopRecord>),
    Text(String),
}

// Strings outside the failure vocabulary (like the listing filler) read back as unset.
fn deserialize_delay_info<'de, D>(deserializer: D) -> Result<Option<DelayInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawDelayInfo>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawDelayInfo::Stops(stops)) => Some(DelayInfo::Stops(stops)),
        Some(RawDelayInfo::Text(text)) => text.parse().ok().map(DelayInfo::Failed),
        None => None,
    })
}

/// Reasons a train has no route data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayFailure {
    /// No running train, invalid number, or no row for the operator.
    NotAvailable,
    /// The route view could not be opened.
    NotFound,
    ScrapingTimeout,
    UnknownError,
    PageLoadTimeout,
    ParsingError,
    ConnectionError,
}

impl DelayFailure {
    pub const ALL: [DelayFailure; 7] = [
        DelayFailure::NotAvailable,
        DelayFailure::NotFound,
        DelayFailure::ScrapingTimeout,
        DelayFailure::UnknownError,
        DelayFailure::PageLoadTimeout,
        DelayFailure::ParsingError,
        DelayFailure::ConnectionError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DelayFailure::NotAvailable => "N/A",
            DelayFailure::NotFound => "not_found",
            DelayFailure::ScrapingTimeout => "scraping_timeout",
            DelayFailure::UnknownError => "unknown_error",
            DelayFailure::PageLoadTimeout => "page_load_timeout",
            DelayFailure::ParsingError => "parsing_error",
            DelayFailure::ConnectionError => "browser_connection_error",
        }
    }
}

impl fmt::Display for DelayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DelayFailure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DelayFailure::ALL
            .into_iter()
            .find(|failure| failure.as_str() == s)
            .ok_or_else(|| format!("unknown delay failure: {s}"))
    }
}
