use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, de::DeserializeOwned};

use crate::{
    list_scraper::ListScraperSettings,
    orchestrator::{OrchestratorSettings, SessionPolicy},
};

/// The env vars read at startup.
#[derive(Debug, Deserialize)]
pub struct ScrapingEnv {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    /// ISO date to scrape; today when unset.
    pub scrape_date: Option<String>,
    /// JSON file of already listed trains to enrich instead of list-scraping.
    pub resume_from: Option<PathBuf>,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    pub database_url: Option<String>,
    #[serde(default)]
    pub session_policy: SessionPolicy,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_true")]
    pub fallback_to_browser: bool,
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_output_path() -> PathBuf {
    PathBuf::from("trains.json")
}

fn default_true() -> bool {
    true
}

pub struct ScrapingConfig {
    pub date: String,
    pub webdriver_url: String,
    pub headless: bool,
    pub resume_from: Option<PathBuf>,
    pub output_path: PathBuf,
    pub database_url: Option<String>,
    pub fallback_to_browser: bool,
    pub http_timeout: Duration,
    pub list: ListScraperSettings,
    pub orchestrator: OrchestratorSettings,
}

impl ScrapingConfig {
    pub fn new() -> anyhow::Result<Self> {
        let scraping_env = ScrapingEnv::load_from_env()?;
        Self::from_env(scraping_env)
    }

    pub fn from_env(env: ScrapingEnv) -> anyhow::Result<Self> {
        let date = match env.scrape_date {
            Some(date) => {
                NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .with_context(|| format!("SCRAPE_DATE {date:?} is not a YYYY-MM-DD date"))?;
                date
            }
            None => Local::now().date_naive().format("%Y-%m-%d").to_string(),
        };

        let orchestrator = OrchestratorSettings {
            session_policy: env.session_policy,
            ..OrchestratorSettings::default()
        };

        Ok(Self {
            date,
            webdriver_url: env.webdriver_url,
            headless: env.headless,
            resume_from: env.resume_from,
            output_path: env.output_path,
            database_url: env.database_url.filter(|url| !url.trim().is_empty()),
            fallback_to_browser: env.fallback_to_browser,
            http_timeout: Duration::from_secs(30),
            list: ListScraperSettings::default(),
            orchestrator,
        })
    }
}

// Extension trait.
pub trait LoadFromEnv: DeserializeOwned {
    fn load_from_env() -> anyhow::Result<Self> {
        // Don't throw an error if .env file doesn't exist.
        let _ = dotenv::dotenv();
        let config =
            envy::from_env::<Self>().context("failed to load env variables into config struct")?;
        Ok(config)
    }
}

impl<T: DeserializeOwned> LoadFromEnv for T {}
