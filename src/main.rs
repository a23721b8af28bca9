use dotenv::dotenv;
use railscrape::{
    Orchestrator, ScrapingContext, TrainListScraper,
    list_scraper::BrowserFallback,
    persistence::{PgStore, read_records_file, write_records_file},
    progress::LogProgress,
    records::TrainRecord,
};

extern crate env_logger;
extern crate log;

use log::LevelFilter;

use log::{error, info, warn};

async fn collect_trains(ctx: &ScrapingContext) -> anyhow::Result<Vec<TrainRecord>> {
    let config = &ctx.scraping_config;
    let orchestrator = Orchestrator::new(&ctx.launcher, &config.orchestrator);
    let mut progress = LogProgress::default();

    if let Some(path) = &config.resume_from {
        info!("Resuming from {}", path.display());
        let mut trains = read_records_file(path)?;
        orchestrator.enrich(&mut trains, &mut progress).await;
        return Ok(trains);
    }

    let list_scraper = TrainListScraper::new(&ctx.request_client, &config.list);
    let trains = if config.fallback_to_browser {
        let fallback = BrowserFallback::new(&ctx.launcher, config.list.browser_timeout);
        let list_scraper = list_scraper.with_fallback(&fallback);
        orchestrator
            .run(&list_scraper, &config.date, &mut progress)
            .await?
    } else {
        orchestrator
            .run(&list_scraper, &config.date, &mut progress)
            .await?
    };
    Ok(trains)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let ctx = ScrapingContext::new()?;
    let config = &ctx.scraping_config;
    info!("Scraping trains for {}", config.date);

    let trains = match collect_trains(&ctx).await {
        Ok(trains) => trains,
        Err(err) => {
            error!("Run aborted: {err:#}");
            return Err(err);
        }
    };

    write_records_file(&config.output_path, &trains)?;
    info!(
        "Wrote {} trains to {}",
        trains.len(),
        config.output_path.display()
    );

    match &config.database_url {
        Some(url) => {
            let mut store = PgStore::connect(url).await?;
            store.save(&trains).await;
        }
        None => warn!("DATABASE_URL not set, skipping the database"),
    }
    Ok(())
}
