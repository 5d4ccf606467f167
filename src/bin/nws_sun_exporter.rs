// nws_sun_exporter - Prometheus metrics exporter for api.weather.gov
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use chrono::FixedOffset;
use clap::Parser;
use nws_sun_exporter::client::{ClientError, WeatherGovClient};
use nws_sun_exporter::collector::{CollectorConfig, StationSelectionPolicy, WeatherCollector};
use nws_sun_exporter::http::RequestContext;
use nws_sun_exporter::metrics::{self, CollectorMetrics, MetricsRegistry};
use nws_sun_exporter::sun::{self, Site};
use prometheus_client::registry::Registry;
use reqwest::{Client, Url};
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::watch;
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9782);
const DEFAULT_REFERSH_SECS: u64 = 300;
const DEFAULT_BACKOFF_SECS: u64 = 100;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_API_URL: &str = "https://api.weather.gov/";

#[derive(Debug, Parser)]
#[clap(name = "nws_sun_exporter", version = clap::crate_version!())]
struct NwsSunExporterApplication {
    /// NWS weather station ID to fetch observations for
    #[clap(long)]
    station: String,

    /// NWS weather station ID to use when the primary station is unavailable or doesn't
    /// report a temperature. May be repeated, stations are tried in the order given.
    #[clap(long = "fallback")]
    fallbacks: Vec<String>,

    /// Latitude of the site to compute the position of the sun for, in degrees (north is positive)
    #[clap(long, allow_negative_numbers = true)]
    latitude: f64,

    /// Longitude of the site to compute the position of the sun for, in degrees (east is positive)
    #[clap(long, allow_negative_numbers = true)]
    longitude: f64,

    /// Offset from UTC of the site's local time, in seconds. Determines which calendar day
    /// sunrise and sunset are reported for. Defaults to the whole hour closest to the
    /// site's longitude.
    #[clap(long, allow_negative_numbers = true)]
    utc_offset_secs: Option<i32>,

    /// Base URL for the Weather.gov API
    #[clap(long, default_value = DEFAULT_API_URL)]
    api_url: Url,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Fetch observations from the Weather.gov API at this interval, in seconds.
    #[clap(long, default_value_t = DEFAULT_REFERSH_SECS)]
    refresh_secs: u64,

    /// Wait this long before trying again when no station could be used, in seconds.
    #[clap(long, default_value_t = DEFAULT_BACKOFF_SECS)]
    backoff_secs: u64,

    /// Timeout for fetching observations from the Weather.gov API, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Exit instead of waiting and trying again when no station could be used.
    #[clap(long)]
    fail_fast: bool,

    /// Address to bind to. By default, nws_sun_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = NwsSunExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    if !(-90.0..=90.0).contains(&opts.latitude) || !(-180.0..=180.0).contains(&opts.longitude) {
        tracing::error!(message = "invalid site coordinates", latitude = opts.latitude, longitude = opts.longitude);
        process::exit(1)
    }

    if opts.api_url.cannot_be_a_base() {
        tracing::error!(message = "invalid API URL", api_url = %opts.api_url);
        process::exit(1)
    }

    let site = match opts.utc_offset_secs {
        Some(secs) => {
            let offset = FixedOffset::east_opt(secs).unwrap_or_else(|| {
                tracing::error!(message = "invalid UTC offset", utc_offset_secs = secs);
                process::exit(1)
            });
            Site::new(opts.latitude, opts.longitude, offset)
        }
        None => Site::new(opts.latitude, opts.longitude, sun::solar_offset(opts.longitude)),
    };

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    // Make an initial request to fetch station information. This allows us to verify that the
    // primary station the user provided is valid and the API is available before starting the
    // HTTP server and running indefinitely. Fallback stations are only checked for a warning.
    let client = WeatherGovClient::new(http_client, opts.api_url.clone());
    match client.station(&opts.station).await {
        Err(ClientError::InvalidStation(station)) => {
            tracing::error!(message = "invalid station provided", station = %station);
            process::exit(1)
        }
        Err(e) => {
            tracing::warn!(message = "failed to fetch initial station information", error = %e);
        }
        Ok(s) => {
            tracing::debug!(message = "verified station information", station = ?s);
        }
    }

    for fallback in opts.fallbacks.iter() {
        if let Err(e) = client.station(fallback).await {
            tracing::warn!(message = "failed to verify fallback station", station = %fallback, error = %e);
        }
    }

    let mut registry = Registry::default();
    let snapshots = Arc::new(MetricsRegistry::new());
    metrics::register_snapshot(&mut registry, snapshots.clone());
    let collector_metrics = CollectorMetrics::new(&mut registry);

    let config = CollectorConfig {
        policy: StationSelectionPolicy::new(opts.station.clone(), opts.fallbacks.clone()),
        site,
        refresh: Duration::from_secs(opts.refresh_secs),
        backoff: Duration::from_secs(opts.backoff_secs),
        fail_fast: opts.fail_fast,
    };

    let collector = WeatherCollector::new(client, config, snapshots, collector_metrics);
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let collector_task = tokio::spawn(async move {
        if let Err(e) = collector.run(shutdown_rx).await {
            tracing::error!(message = "no usable station and fail fast is set, exiting", error = %e);
            process::exit(1)
        }
    });

    let context = Arc::new(RequestContext::new(registry));
    let app = nws_sun_exporter::http::router(context);
    let server = axum::Server::try_bind(&opts.bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
            process::exit(1)
        })
        .serve(app.into_make_service());

    tracing::info!(message = "server started", address = %server.local_addr());
    server
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    // Let a collection in progress finish instead of aborting it
    let _ = shutdown_tx.send(());
    let _ = collector_task.await;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
