use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

use anyhow::Context;
use log::{error, info, warn};
use serde::Serialize;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};

use crate::records::{DelayInfo, TrainRecord};

/// Names starting with this are replacement bus services, not trains.
pub const REPLACEMENT_BUS_PREFIX: &str = "ZKA";
pub const DOMESTIC_LABEL: &str = "Krajowy";

const SCHEMA: &str = include_str!("../sql/schema.sql");

/// A train run as the database stores it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainRun {
    pub number: String,
    pub name: String,
    pub is_domestic: bool,
    pub date: String,
    pub category: String,
    pub start_station: String,
    pub end_station: String,
    pub occupancy: String,
    pub stops: Vec<RunStop>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStop {
    pub station_name: String,
    pub stop_order: i32,
    pub scheduled_arrival: Option<String>,
    pub scheduled_departure: Option<String>,
    pub delay_arrival_min: Option<i32>,
    pub delay_departure_min: Option<i32>,
    pub distance_from_start_km: f64,
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Difficulty {
    pub description: String,
    pub location: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Turns a scraped `[reason, station label]` pair into a difficulty. Older scrapes put
/// the location after `##` inside the reason; an explicit label wins over that.
pub fn parse_difficulty(info: &[Option<String>; 2]) -> Option<Difficulty> {
    let reason = non_blank(info[0].as_deref())?;
    let (description, embedded_location) = match reason.split_once("##") {
        Some((description, location)) => (
            non_blank(Some(description)),
            non_blank(Some(location)),
        ),
        None => (Some(reason), None),
    };
    Some(Difficulty {
        description: description?,
        location: non_blank(info[1].as_deref()).or(embedded_location),
    })
}

/// `None` for records the database does not take (replacement buses).
///
/// The scraped distance of each stop is cumulative up to the *next* stop, so the
/// distance from the origin to stop `i` is the figure read at stop `i - 1`.
pub fn to_train_run(record: &TrainRecord) -> Option<TrainRun> {
    if record.name.starts_with(REPLACEMENT_BUS_PREFIX) {
        return None;
    }

    let mut stops = Vec::new();
    let mut lagged_distance = 0.0;
    for (i, stop) in record.stops().unwrap_or_default().iter().enumerate() {
        let distance_from_start_km = lagged_distance;
        if let Some(next) = stop.distance_km_from_start_to_next {
            lagged_distance = next;
        }
        stops.push(RunStop {
            station_name: stop.station_name.clone(),
            stop_order: i as i32 + 1,
            scheduled_arrival: stop.arrival_time.clone(),
            scheduled_departure: stop.departure_time.clone(),
            delay_arrival_min: stop.delay_minutes_arrival.map(|m| m as i32),
            delay_departure_min: stop.delay_minutes_departure.map(|m| m as i32),
            distance_from_start_km,
            difficulty: parse_difficulty(&stop.difficulties_info),
        });
    }

    Some(TrainRun {
        number: record.number.clone(),
        name: record.name.clone(),
        is_domestic: record.domestic == DOMESTIC_LABEL,
        date: record.date.clone(),
        category: record.category.clone(),
        start_station: record.from.clone(),
        end_station: record.to.clone(),
        occupancy: record.occupancy.clone(),
        stops,
    })
}

/// Why a record will be stored without stops; `None` when it has a route.
pub fn missing_route_reason(record: &TrainRecord) -> Option<String> {
    match &record.delay_info {
        Some(DelayInfo::Stops(_)) => None,
        Some(DelayInfo::Failed(failure)) => Some(failure.to_string()),
        None => Some("never enriched".to_string()),
    }
}

pub fn read_records_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<TrainRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    let records = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("{} is not a list of train records", path.display()))?;
    Ok(records)
}

pub fn write_records_file(path: impl AsRef<Path>, records: &[TrainRecord]) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("could not create {}", path.display()))?;
    serde_json::to_writer_pretty(file, records)
        .with_context(|| format!("could not write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SaveSummary {
    pub runs_inserted: usize,
    pub runs_skipped: usize,
    pub runs_with_errors: usize,
    pub stops_inserted: usize,
    pub difficulty_links_inserted: usize,
}

#[derive(Default)]
struct DictionaryCache {
    stations: HashMap<String, i32>,
    categories: HashMap<String, i32>,
    occupancies: HashMap<String, i32>,
    difficulties: HashMap<String, i32>,
}

/// Dictionary tables: (table, value column, cache selector).
#[derive(Clone, Copy)]
enum Dictionary {
    Stations,
    Categories,
    Occupancies,
    Difficulties,
}

impl Dictionary {
    fn table(self) -> (&'static str, &'static str) {
        match self {
            Dictionary::Stations => ("stations", "name"),
            Dictionary::Categories => ("train_categories", "category_code"),
            Dictionary::Occupancies => ("occupancies", "status_description"),
            Dictionary::Difficulties => ("difficulties", "description"),
        }
    }
}

impl DictionaryCache {
    fn get_mut(&mut self, dictionary: Dictionary) -> &mut HashMap<String, i32> {
        match dictionary {
            Dictionary::Stations => &mut self.stations,
            Dictionary::Categories => &mut self.categories,
            Dictionary::Occupancies => &mut self.occupancies,
            Dictionary::Difficulties => &mut self.difficulties,
        }
    }
}

pub struct PgStore {
    pool: PgPool,
    cache: DictionaryCache,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to the database")?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("failed to create the schema")?;
        info!("Connected to the database");

        let mut store = Self {
            pool,
            cache: DictionaryCache::default(),
        };
        store.warm_cache().await?;
        Ok(store)
    }

    async fn warm_cache(&mut self) -> anyhow::Result<()> {
        for dictionary in [
            Dictionary::Stations,
            Dictionary::Categories,
            Dictionary::Occupancies,
            Dictionary::Difficulties,
        ] {
            let (table, column) = dictionary.table();
            let rows = sqlx::query(&format!("SELECT id, {column} FROM {table}"))
                .fetch_all(&self.pool)
                .await
                .with_context(|| format!("failed to load {table}"))?;
            let cache = self.cache.get_mut(dictionary);
            for row in rows {
                cache.insert(row.try_get(column)?, row.try_get("id")?);
            }
        }
        info!(
            "Loaded {} stations, {} categories, {} occupancy levels and {} difficulties",
            self.cache.stations.len(),
            self.cache.categories.len(),
            self.cache.occupancies.len(),
            self.cache.difficulties.len()
        );
        Ok(())
    }

    async fn get_or_create_id(
        &mut self,
        dictionary: Dictionary,
        value: &str,
    ) -> anyhow::Result<Option<i32>> {
        let (table, column) = dictionary.table();
        if let Some(id) = self.cache.get_mut(dictionary).get(value) {
            return Ok(Some(*id));
        }
        if value.trim().is_empty() {
            warn!("Refusing to store an empty value in {table}");
            return Ok(None);
        }

        info!("New value in {table}: {value:?}");
        sqlx::query(&format!(
            "INSERT INTO {table} ({column}) VALUES ($1) ON CONFLICT ({column}) DO NOTHING"
        ))
        .bind(value)
        .execute(&self.pool)
        .await?;
        let row = sqlx::query(&format!("SELECT id FROM {table} WHERE {column} = $1"))
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        let id = match row {
            Some(row) => row.try_get::<i32, _>("id")?,
            None => return Ok(None),
        };
        self.cache.get_mut(dictionary).insert(value.to_string(), id);
        Ok(Some(id))
    }

    pub async fn save(&mut self, records: &[TrainRecord]) -> SaveSummary {
        let mut summary = SaveSummary::default();
        for record in records {
            let Some(run) = to_train_run(record) else {
                info!(
                    "Train {} ({}) is a replacement bus, not saving it",
                    record.number, record.name
                );
                summary.runs_skipped += 1;
                continue;
            };
            if let Err(err) = self.save_run(record, &run, &mut summary).await {
                error!("Saving train {} failed: {err:#}", run.number);
                summary.runs_with_errors += 1;
            }
        }

        info!(
            "Saved {} new runs ({} skipped, {} failed), {} stops, {} difficulty links",
            summary.runs_inserted,
            summary.runs_skipped,
            summary.runs_with_errors,
            summary.stops_inserted,
            summary.difficulty_links_inserted
        );
        summary
    }

    /// Stores one run with its stops and difficulty links in a single transaction, so a
    /// failed run leaves nothing behind and is retried whole on the next save.
    async fn save_run(
        &mut self,
        record: &TrainRecord,
        run: &TrainRun,
        summary: &mut SaveSummary,
    ) -> anyhow::Result<()> {
        let ids = (
            self.get_or_create_id(Dictionary::Categories, &run.category).await?,
            self.get_or_create_id(Dictionary::Stations, &run.start_station).await?,
            self.get_or_create_id(Dictionary::Stations, &run.end_station).await?,
            self.get_or_create_id(Dictionary::Occupancies, &run.occupancy).await?,
        );
        let (Some(category_id), Some(start_id), Some(end_id), Some(occupancy_id)) = ids else {
            anyhow::bail!("missing category, station or occupancy for train {}", run.number);
        };

        if let Some(reason) = missing_route_reason(record) {
            warn!(
                "Train {} has no route data ({reason}), storing the run only",
                run.number
            );
        }

        // Dictionary rows are shared between runs, resolve them up front.
        let mut resolved = Vec::with_capacity(run.stops.len());
        for stop in &run.stops {
            let Some(station_id) = self
                .get_or_create_id(Dictionary::Stations, &stop.station_name)
                .await?
            else {
                warn!(
                    "Train {}: no station id for {:?}, skipping the stop",
                    run.number, stop.station_name
                );
                continue;
            };
            let difficulty_id = match &stop.difficulty {
                Some(difficulty) => {
                    self.get_or_create_id(Dictionary::Difficulties, &difficulty.description)
                        .await?
                }
                None => None,
            };
            resolved.push((stop, station_id, difficulty_id));
        }

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO train_runs \
             (number, name, is_domestic, date, category_id, start_station_id, end_station_id, occupancy_id) \
             VALUES ($1, $2, $3, $4::date, $5, $6, $7, $8) \
             ON CONFLICT (number, date) DO NOTHING RETURNING id",
        )
        .bind(&run.number)
        .bind(&run.name)
        .bind(run.is_domestic)
        .bind(&run.date)
        .bind(category_id)
        .bind(start_id)
        .bind(end_id)
        .bind(occupancy_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(inserted) = inserted else {
            info!("Train {} on {} is already stored", run.number, run.date);
            summary.runs_skipped += 1;
            return Ok(());
        };
        let run_id: i32 = inserted.try_get("id")?;

        let mut stops_inserted = 0;
        let mut links_inserted = 0;
        for (stop, station_id, difficulty_id) in resolved {
            let stop_row = sqlx::query(
                "INSERT INTO run_stops \
                 (run_id, station_id, stop_order, scheduled_arrival, scheduled_departure, \
                  delay_arrival_min, delay_departure_min, distance_from_start_km) \
                 VALUES ($1, $2, $3, $4::time, $5::time, $6, $7, $8) RETURNING id",
            )
            .bind(run_id)
            .bind(station_id)
            .bind(stop.stop_order)
            .bind(&stop.scheduled_arrival)
            .bind(&stop.scheduled_departure)
            .bind(stop.delay_arrival_min)
            .bind(stop.delay_departure_min)
            .bind(stop.distance_from_start_km)
            .fetch_one(&mut *tx)
            .await?;
            let stop_id: i32 = stop_row.try_get("id")?;
            stops_inserted += 1;

            let (Some(difficulty), Some(difficulty_id)) = (&stop.difficulty, difficulty_id) else {
                continue;
            };
            sqlx::query(
                "INSERT INTO run_stop_difficulties (stop_id, difficulty_id, location) \
                 VALUES ($1, $2, $3)",
            )
            .bind(stop_id)
            .bind(difficulty_id)
            .bind(&difficulty.location)
            .execute(&mut *tx)
            .await?;
            links_inserted += 1;
        }

        tx.commit().await?;
        summary.runs_inserted += 1;
        summary.stops_inserted += stops_inserted;
        summary.difficulty_links_inserted += links_inserted;
        Ok(())
    }
}
