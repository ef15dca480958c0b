//! daq-relay daemon: feeds acquisition documents to a remote archive, either
//! from a live message-bus stream or by polling a catalog service.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use daq_relay::archive::ArchiveClient;
use daq_relay::config::Settings;
use daq_relay::relay::DocumentRelay;
use daq_relay::sources::{BusSource, CatalogSource};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "daq-relay",
    about = "Relays acquisition-run documents to a remote archive service"
)]
struct Cli {
    /// Path to a TOML configuration file (default: relay.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, short = 'l', env = "RELAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Base URL of the archive API
    #[arg(long, env = "RELAY_ARCHIVE_URL")]
    archive_url: Option<String>,

    /// Bearer token for the archive API
    #[arg(long, env = "RELAY_ARCHIVE_TOKEN", hide_env_values = true)]
    archive_token: Option<String>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Subscribe to the acquisition engine's live document stream on the bus
    Bus {
        /// Message bus URL
        #[arg(long, env = "RELAY_BUS_URL")]
        bus_url: Option<String>,

        /// Bus subject carrying the document stream
        #[arg(long, env = "RELAY_BUS_SUBJECT")]
        bus_subject: Option<String>,
    },
    /// Poll a catalog service for newly recorded runs
    Catalog {
        /// Catalog service URL
        #[arg(long, env = "RELAY_CATALOG_URL")]
        catalog_url: Option<String>,

        /// API key for the catalog service
        #[arg(long, env = "RELAY_CATALOG_API_KEY", hide_env_values = true)]
        catalog_api_key: Option<String>,

        /// Polling period in seconds
        #[arg(long)]
        poll_period: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    // CLI flags take precedence over the environment and the file.
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    if let Some(url) = cli.archive_url {
        settings.archive_url = Some(url);
    }
    if let Some(token) = cli.archive_token {
        settings.archive_token = Some(token);
    }
    match &cli.mode {
        Mode::Bus {
            bus_url,
            bus_subject,
        } => {
            if let Some(url) = bus_url {
                settings.bus_url = Some(url.clone());
            }
            if let Some(subject) = bus_subject {
                settings.bus_subject = subject.clone();
            }
        }
        Mode::Catalog {
            catalog_url,
            catalog_api_key,
            poll_period,
        } => {
            if let Some(url) = catalog_url {
                settings.catalog_url = Some(url.clone());
            }
            if let Some(key) = catalog_api_key {
                settings.catalog_api_key = Some(key.clone());
            }
            if let Some(seconds) = poll_period {
                settings.catalog_poll_period = Duration::from_secs_f64(*seconds);
            }
        }
    }
    settings.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&settings.log_level)?)
        .init();

    let archive_url = settings.archive_url.clone().ok_or_else(|| {
        anyhow!("the archive URL is required: pass --archive-url or set RELAY_ARCHIVE_URL")
    })?;
    let archive_token = settings.archive_token.clone().ok_or_else(|| {
        anyhow!("the archive token is required: pass --archive-token or set RELAY_ARCHIVE_TOKEN")
    })?;

    let client = ArchiveClient::new(&archive_url, &archive_token, settings.archive_timeout)?;
    let relay = DocumentRelay::serve(client);

    match cli.mode {
        Mode::Bus { .. } => {
            let bus_url = settings.bus_url.clone().ok_or_else(|| {
                anyhow!("the bus URL is required: pass --bus-url or set RELAY_BUS_URL")
            })?;
            info!(
                bus = %bus_url,
                archive = %archive_url,
                "listening on the bus and sending documents to the archive"
            );
            BusSource::new(&bus_url, &settings.bus_subject)
                .run(relay.sender())
                .await?;
        }
        Mode::Catalog { .. } => {
            let catalog_url = settings.catalog_url.clone().ok_or_else(|| {
                anyhow!("the catalog URL is required: pass --catalog-url or set RELAY_CATALOG_URL")
            })?;
            let catalog_api_key = settings.catalog_api_key.clone().ok_or_else(|| {
                anyhow!(
                    "the catalog API key is required: pass --catalog-api-key or set RELAY_CATALOG_API_KEY"
                )
            })?;
            info!(
                catalog = %catalog_url,
                archive = %archive_url,
                "polling the catalog and sending documents to the archive"
            );
            CatalogSource::new(
                &catalog_url,
                &catalog_api_key,
                settings.catalog_poll_period,
                settings.archive_timeout,
            )?
            .run(relay.sender())
            .await?;
        }
    }

    relay.join().await?;
    Ok(())
}
