//! Command line front end for the locus engine.
//!
//! Syncs the local element cache, lists what a map viewport would show and
//! reverse geocodes single coordinates.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use locus::annotations::ViewportAnnotationManager;
use locus::geocode::{GeocodingService, NominatimGeocoder};
use locus::store::HttpRemoteSource;
use locus::{Coordinate, Element, Engine, EngineConfig, EngineEvent, Viewport};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "locus")]
#[command(about = "Location directory sync and viewport tools")]
struct Args {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch elements updated since the last sync
    Sync,

    /// List the elements visible in a viewport
    Visible {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Viewport height in degrees
        #[arg(long, default_value = "0.1")]
        lat_delta: f64,
        /// Viewport width in degrees
        #[arg(long, default_value = "0.1")]
        lon_delta: f64,
    },

    /// Reverse geocode one coordinate
    Reverse {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
}

fn coordinate(lat: f64, lon: f64) -> Result<Coordinate> {
    Coordinate::new(lat, lon).with_context(|| format!("Invalid coordinate {}, {}", lat, lon))
}

fn open_engine(config: &EngineConfig) -> Result<(Engine<HttpRemoteSource>, locus::EventStream)> {
    let remote = HttpRemoteSource::new(
        &config.remote.endpoint,
        config.timeout(),
        &config.remote.user_agent,
    )?;
    let geocoder = NominatimGeocoder::new(&config.geocoding.nominatim_url, &config.remote.user_agent)?;
    Engine::open(config, remote, geocoder)
}

async fn sync(config: &EngineConfig) -> Result<()> {
    let (mut engine, mut events) = open_engine(config)?;
    info!(
        "Opened {} cached elements (watermark {})",
        engine.store().len(),
        engine.store().watermark()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Fetching from {}", config.remote.endpoint));

    engine.request_sync();
    let completion = engine
        .next_completion()
        .await
        .context("Engine inbox closed")?;
    engine.handle(completion);

    match events.next().await {
        Some(EngineEvent::SnapshotUpdated { count, watermark }) => {
            spinner.finish_with_message("Sync complete");
            println!("{} elements, watermark {}", count, watermark);
        }
        Some(EngineEvent::SyncFailed { error }) => {
            spinner.abandon_with_message("Sync failed");
            anyhow::bail!("Sync failed: {}", error);
        }
        _ => spinner.finish_and_clear(),
    }

    engine.save().await
}

async fn visible(config: &EngineConfig, center: Coordinate, lat_delta: f64, lon_delta: f64) -> Result<()> {
    let (engine, _events) = open_engine(config)?;
    let viewport = Viewport::from_region(center, lat_delta, lon_delta);

    let mut manager = ViewportAnnotationManager::new(config.viewport.cutoff_miles);
    let delta = manager.update(&engine.store().index(), &viewport);

    let store = engine.store();
    for token in &delta.additions {
        let element = store.get(&token.id);
        let contact = |field: fn(&Element) -> Option<&str>| {
            element.and_then(|e| field(e)).unwrap_or("-").to_string()
        };
        println!(
            "{}\t{:.5},{:.5}\t{}\t{}\t{}\t{}\t{}",
            token.id,
            token.coordinate.lat,
            token.coordinate.lon,
            token.symbol,
            token.title,
            contact(Element::phone),
            contact(Element::website),
            contact(Element::opening_hours),
        );
    }
    info!(
        "{} of {} elements visible",
        delta.additions.len(),
        engine.store().len()
    );

    Ok(())
}

async fn reverse(config: &EngineConfig, point: Coordinate) -> Result<()> {
    let geocoder = NominatimGeocoder::new(&config.geocoding.nominatim_url, &config.remote.user_agent)?;
    let service = GeocodingService::new(geocoder, config.geocoding.max_concurrent);

    let address = service.reverse_geocode(point).await?;
    println!("{}", address.one_line());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match args.command {
        Command::Sync => sync(&config).await,
        Command::Visible {
            lat,
            lon,
            lat_delta,
            lon_delta,
        } => visible(&config, coordinate(lat, lon)?, lat_delta, lon_delta).await,
        Command::Reverse { lat, lon } => reverse(&config, coordinate(lat, lon)?).await,
    }
}
