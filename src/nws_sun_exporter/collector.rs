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

use crate::client::ObservationSource;
use crate::metrics::{CollectorMetrics, MetricsRegistry};
use crate::observation::{CloudLayer, Field, Observation};
use crate::sun::{Site, SunPosition};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Instrument, Level};

/// Which stations to fetch observations from, in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSelectionPolicy {
    primary: String,
    fallbacks: Vec<String>,
}

impl StationSelectionPolicy {
    pub fn new<S: Into<String>>(primary: S, fallbacks: Vec<String>) -> Self {
        StationSelectionPolicy {
            primary: primary.into(),
            fallbacks,
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn fallbacks(&self) -> &[String] {
        &self.fallbacks
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub policy: StationSelectionPolicy,
    pub site: Site,
    pub refresh: Duration,
    pub backoff: Duration,
    pub fail_fast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorError {
    NoUsableSource { primary: String, attempted: Vec<String> },
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUsableSource { primary, attempted } => write!(
                f,
                "no usable observation from primary station {} or fallbacks [{}]",
                primary,
                attempted.join(", ")
            ),
        }
    }
}

impl error::Error for CollectorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Primary,
    Fallback,
}

impl SourceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceRole::Primary => "primary",
            SourceRole::Fallback => "fallback",
        }
    }
}

/// Observations fetched during a single collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Primary observation, if the request succeeded.
    pub primary: Option<Observation>,
    /// First fallback with a temperature, if the primary needed one.
    pub fallback: Option<Observation>,
    /// Fallback stations requested, in order.
    pub attempted: Vec<String>,
}

/// Weather values after combining the primary and fallback observations.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedWeather {
    values: BTreeMap<Field, f64>,
    pub cloud_layers: Vec<CloudLayer>,
    pub primary: Option<String>,
    pub fallback: Option<String>,
}

impl MergedWeather {
    /// Combine observations field by field.
    ///
    /// A field from the primary is used whenever it is present, even if it's zero.
    /// Fields the primary is missing come from the fallback. Fields that neither
    /// station reported are left out. Cloud layers are taken as a whole from the
    /// first station that reported any.
    pub fn merge(primary: Option<&Observation>, fallback: Option<&Observation>) -> Self {
        let mut values = BTreeMap::new();
        for field in Field::ALL {
            let value = primary
                .and_then(|o| o.value(field))
                .or_else(|| fallback.and_then(|o| o.value(field)));

            if let Some(v) = value {
                values.insert(field, v);
            }
        }

        let cloud_layers = primary
            .filter(|o| !o.cloud_layers.is_empty())
            .or_else(|| fallback.filter(|o| !o.cloud_layers.is_empty()))
            .map(|o| o.cloud_layers.clone())
            .unwrap_or_default();

        MergedWeather {
            values,
            cloud_layers,
            primary: primary.map(|o| o.station_id.clone()),
            fallback: fallback.map(|o| o.station_id.clone()),
        }
    }

    pub fn value(&self, field: Field) -> Option<f64> {
        self.values.get(&field).copied()
    }

    /// Stations that supplied any part of this weather and the role they had.
    pub fn sources(&self) -> Vec<(&str, SourceRole)> {
        let mut out = Vec::with_capacity(2);
        if let Some(s) = &self.primary {
            out.push((s.as_str(), SourceRole::Primary));
        }
        if let Some(s) = &self.fallback {
            out.push((s.as_str(), SourceRole::Fallback));
        }

        out
    }
}

/// Everything published by a single collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    /// `None` when no station could be used.
    pub weather: Option<MergedWeather>,
    pub sun: SunPosition,
}

/// Periodically fetches observations, computes the position of the sun, and
/// publishes both to a `MetricsRegistry`.
pub struct WeatherCollector<S> {
    source: S,
    config: CollectorConfig,
    registry: Arc<MetricsRegistry>,
    metrics: CollectorMetrics,
}

impl<S> WeatherCollector<S>
where
    S: ObservationSource,
{
    pub fn new(source: S, config: CollectorConfig, registry: Arc<MetricsRegistry>, metrics: CollectorMetrics) -> Self {
        WeatherCollector {
            source,
            config,
            registry,
            metrics,
        }
    }

    /// Fetch the primary and, if needed, fallbacks in order until one has a temperature.
    pub async fn select(&self) -> Selection {
        let policy = &self.config.policy;
        let mut selection = Selection {
            primary: self.fetch(policy.primary()).await,
            ..Selection::default()
        };

        if selection.primary.as_ref().map(Observation::has_temperature) == Some(true) {
            return selection;
        }

        for station in policy.fallbacks() {
            selection.attempted.push(station.clone());
            match self.fetch(station).await {
                Some(obs) if obs.has_temperature() => {
                    tracing::info!(
                        message = "using fallback station for missing data",
                        station = %station,
                        primary = %policy.primary(),
                    );
                    selection.fallback = Some(obs);
                    break;
                }
                Some(_) => {
                    tracing::warn!(message = "fallback station has no temperature", station = %station);
                }
                None => {}
            }
        }

        selection
    }

    /// Run a single collection at `now` and publish the results.
    ///
    /// The position of the sun is always published. If the primary station failed
    /// and no fallback was usable, weather values are left unchanged and
    /// `CollectorError::NoUsableSource` is returned.
    pub async fn collect(&self, now: DateTime<Utc>) -> Result<Snapshot, CollectorError> {
        let selection = self.select().await;
        let sun = SunPosition::calculate(now, &self.config.site);
        tracing::debug!(
            message = "computed sun position",
            altitude = sun.altitude_deg,
            azimuth = sun.azimuth_deg,
            daylight = sun.is_daylight,
            sunrise = ?sun.sunrise,
            sunset = ?sun.sunset,
        );

        let weather = if selection.primary.is_none() && selection.fallback.is_none() {
            None
        } else {
            Some(MergedWeather::merge(
                selection.primary.as_ref(),
                selection.fallback.as_ref(),
            ))
        };

        let snapshot = Snapshot {
            taken_at: now,
            weather,
            sun,
        };
        self.registry.publish(&snapshot);

        if snapshot.weather.is_none() {
            self.metrics.collection_failure();
            return Err(CollectorError::NoUsableSource {
                primary: self.config.policy.primary().to_owned(),
                attempted: selection.attempted,
            });
        }

        Ok(snapshot)
    }

    /// Collect on a fixed schedule until `shutdown` changes or its sender is dropped.
    ///
    /// Shutdown is only checked between collections so requests in progress are
    /// allowed to complete. Returns an error only when `fail_fast` is set and a
    /// collection had no usable source.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) -> Result<(), CollectorError> {
        tracing::info!(
            message = "observation polling started",
            station = %self.config.policy.primary(),
            fallbacks = ?self.config.policy.fallbacks(),
        );

        loop {
            let delay = match self
                .collect(Utc::now())
                .instrument(tracing::span!(Level::DEBUG, "collector_tick"))
                .await
            {
                Ok(snapshot) => {
                    tracing::info!(
                        message = "fetched new observation",
                        sources = ?snapshot.weather.as_ref().map(MergedWeather::sources),
                    );
                    self.config.refresh
                }
                Err(e) if self.config.fail_fast => {
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(
                        message = "problem retrieving from all stations",
                        error = %e,
                        backoff_secs = self.config.backoff.as_secs(),
                    );
                    self.config.backoff
                }
            };

            tracing::debug!(message = "waiting for next collection", delay_secs = delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    tracing::info!(message = "observation polling stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn fetch(&self, station: &str) -> Option<Observation> {
        self.metrics.fetch(station);
        match self
            .source
            .fetch(station)
            .instrument(tracing::span!(Level::DEBUG, "nws_observation"))
            .await
        {
            Ok(obs) => Some(obs),
            Err(e) => {
                self.metrics.fetch_error(station, e.kind());
                tracing::warn!(
                    message = "failed to fetch observation",
                    station = %station,
                    kind = %e.kind(),
                    error = %e,
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CollectorConfig, CollectorError, MergedWeather, StationSelectionPolicy, WeatherCollector};
    use crate::client::{ClientError, ErrorKind, ObservationSource};
    use crate::metrics::{CollectorMetrics, MetricKey, MetricsRegistry, SUN_ALTITUDE, SUN_AZIMUTH};
    use crate::observation::{Field, Observation};
    use crate::sun::Site;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use reqwest::{StatusCode, Url};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::watch;

    enum Scripted {
        Observation(Observation),
        Transport,
        Parse,
    }

    /// Returns canned results per station and records the order of requests.
    #[derive(Default)]
    struct FakeSource {
        responses: HashMap<String, Scripted>,
        outages: Mutex<usize>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn with(mut self, station: &str, response: Scripted) -> Self {
            self.responses.insert(station.to_owned(), response);
            self
        }

        /// Fail the next `n` requests regardless of station.
        fn with_outages(self, n: usize) -> Self {
            *self.outages.lock().unwrap() = n;
            self
        }

        fn num_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ObservationSource for Arc<FakeSource> {
        async fn fetch(&self, station: &str) -> Result<Observation, ClientError> {
            self.calls.lock().unwrap().push(station.to_owned());

            let mut outages = self.outages.lock().unwrap();
            if *outages > 0 {
                *outages -= 1;
                return Err(ClientError::Unexpected(
                    StatusCode::SERVICE_UNAVAILABLE,
                    Url::parse("https://api.weather.gov/").unwrap(),
                ));
            }
            drop(outages);

            match self.responses.get(station) {
                Some(Scripted::Observation(obs)) => Ok(obs.clone()),
                Some(Scripted::Parse) => Err(ClientError::Parse(
                    serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
                )),
                Some(Scripted::Transport) | None => Err(ClientError::Unexpected(
                    StatusCode::SERVICE_UNAVAILABLE,
                    Url::parse("https://api.weather.gov/").unwrap(),
                )),
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 21, 22, 0, 0).unwrap()
    }

    fn obs(station: &str) -> Observation {
        Observation::new(station, now())
    }

    fn config(fallbacks: &[&str]) -> CollectorConfig {
        CollectorConfig {
            policy: StationSelectionPolicy::new("PHOG", fallbacks.iter().map(|s| s.to_string()).collect()),
            site: Site::with_solar_offset(20.8986, -156.4306),
            refresh: Duration::from_secs(3600),
            backoff: Duration::from_secs(3600),
            fail_fast: false,
        }
    }

    struct Harness {
        source: Arc<FakeSource>,
        registry: Arc<MetricsRegistry>,
        metrics: CollectorMetrics,
        collector: WeatherCollector<Arc<FakeSource>>,
    }

    fn harness(source: FakeSource, config: CollectorConfig) -> Harness {
        let source = Arc::new(source);
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = CollectorMetrics::default();
        let collector = WeatherCollector::new(source.clone(), config, registry.clone(), metrics.clone());

        Harness {
            source,
            registry,
            metrics,
            collector,
        }
    }

    fn calls(h: &Harness) -> Vec<String> {
        h.source.calls.lock().unwrap().clone()
    }

    fn gauge(h: &Harness, name: &str) -> Option<f64> {
        h.registry.get(&MetricKey::new(name))
    }

    #[test]
    fn test_merge_primary_wins() {
        let primary = obs("PHOG").with_value(Field::Temperature, Some(25.0));
        let fallback = obs("PHHN").with_value(Field::Temperature, Some(22.0));

        let merged = MergedWeather::merge(Some(&primary), Some(&fallback));
        assert_eq!(Some(25.0), merged.value(Field::Temperature));
    }

    #[test]
    fn test_merge_zero_is_present() {
        let primary = obs("PHOG")
            .with_value(Field::Temperature, Some(0.0))
            .with_value(Field::Humidity, None);
        let fallback = obs("PHHN")
            .with_value(Field::Temperature, Some(5.0))
            .with_value(Field::Humidity, Some(40.0));

        let merged = MergedWeather::merge(Some(&primary), Some(&fallback));
        assert_eq!(Some(0.0), merged.value(Field::Temperature));
        assert_eq!(Some(40.0), merged.value(Field::Humidity));
    }

    #[test]
    fn test_merge_missing_everywhere_is_omitted() {
        let primary = obs("PHOG").with_value(Field::Temperature, Some(25.0));
        let fallback = obs("PHHN").with_value(Field::Temperature, Some(22.0));

        let merged = MergedWeather::merge(Some(&primary), Some(&fallback));
        assert_eq!(None, merged.value(Field::Visibility));
    }

    #[test]
    fn test_merge_failed_primary_uses_fallback() {
        let fallback = obs("PHHN")
            .with_value(Field::Temperature, Some(22.0))
            .with_value(Field::WindSpeed, Some(0.0));

        let merged = MergedWeather::merge(None, Some(&fallback));
        assert_eq!(Some(22.0), merged.value(Field::Temperature));
        assert_eq!(Some(0.0), merged.value(Field::WindSpeed));
        assert_eq!(None, merged.primary);
        assert_eq!(Some("PHHN".to_owned()), merged.fallback);
    }

    #[test]
    fn test_merge_cloud_layers_whole() {
        let primary = obs("PHOG").with_cloud_layer("FEW", Some(600.0));
        let fallback = obs("PHHN")
            .with_cloud_layer("BKN", Some(1200.0))
            .with_cloud_layer("OVC", Some(2400.0));

        let merged = MergedWeather::merge(Some(&primary), Some(&fallback));
        assert_eq!(primary.cloud_layers, merged.cloud_layers);

        let empty = obs("PHOG");
        let merged = MergedWeather::merge(Some(&empty), Some(&fallback));
        assert_eq!(fallback.cloud_layers, merged.cloud_layers);

        let merged = MergedWeather::merge(Some(&empty), None);
        assert!(merged.cloud_layers.is_empty());
    }

    #[tokio::test]
    async fn test_select_primary_with_temperature_skips_fallbacks() {
        let source = FakeSource::default()
            .with("PHOG", Scripted::Observation(obs("PHOG").with_value(Field::Temperature, Some(25.0))))
            .with("PHHN", Scripted::Observation(obs("PHHN").with_value(Field::Temperature, Some(22.0))));
        let h = harness(source, config(&["PHHN", "PHLI"]));

        let snapshot = h.collector.collect(now()).await.unwrap();

        assert_eq!(vec!["PHOG"], calls(&h));
        assert_eq!(Some(25.0), snapshot.weather.unwrap().value(Field::Temperature));
        assert_eq!(Some(25.0), gauge(&h, "nws_temperature"));
    }

    #[tokio::test]
    async fn test_select_first_usable_fallback_short_circuits() {
        let source = FakeSource::default()
            .with("PHOG", Scripted::Observation(obs("PHOG").with_value(Field::Humidity, Some(70.0))))
            .with("PHHN", Scripted::Observation(obs("PHHN").with_value(Field::Temperature, Some(22.0))))
            .with("PHLI", Scripted::Observation(obs("PHLI").with_value(Field::Temperature, Some(19.0))));
        let h = harness(source, config(&["PHHN", "PHLI"]));

        let snapshot = h.collector.collect(now()).await.unwrap();
        let weather = snapshot.weather.unwrap();

        assert_eq!(vec!["PHOG", "PHHN"], calls(&h));
        assert_eq!(Some(22.0), weather.value(Field::Temperature));
        assert_eq!(Some(70.0), weather.value(Field::Humidity));
        assert_eq!(0, h.metrics.fetches_total("PHLI"));
    }

    #[tokio::test]
    async fn test_select_skips_unusable_fallbacks_in_order() {
        let source = FakeSource::default()
            .with("PHOG", Scripted::Transport)
            .with("PHHN", Scripted::Observation(obs("PHHN").with_value(Field::Humidity, Some(50.0))))
            .with("PHJR", Scripted::Parse)
            .with("PHLI", Scripted::Observation(obs("PHLI").with_value(Field::Temperature, Some(19.0))));
        let h = harness(source, config(&["PHHN", "PHJR", "PHLI"]));

        let snapshot = h.collector.collect(now()).await.unwrap();
        let weather = snapshot.weather.unwrap();

        assert_eq!(vec!["PHOG", "PHHN", "PHJR", "PHLI"], calls(&h));
        assert_eq!(Some(19.0), weather.value(Field::Temperature));
        // Only the selected fallback contributes values
        assert_eq!(None, weather.value(Field::Humidity));
        assert_eq!(1, h.metrics.fetch_errors_total("PHOG", ErrorKind::Transport));
        assert_eq!(1, h.metrics.fetch_errors_total("PHJR", ErrorKind::Parse));
    }

    #[tokio::test]
    async fn test_collect_zero_temperature_from_primary() {
        let source = FakeSource::default()
            .with(
                "PHOG",
                Scripted::Observation(
                    obs("PHOG")
                        .with_value(Field::Temperature, Some(0.0))
                        .with_value(Field::Humidity, None),
                ),
            )
            .with(
                "PHHN",
                Scripted::Observation(
                    obs("PHHN")
                        .with_value(Field::Temperature, Some(5.0))
                        .with_value(Field::Humidity, Some(40.0)),
                ),
            );
        let h = harness(source, config(&["PHHN"]));

        h.collector.collect(now()).await.unwrap();

        // Primary has a temperature so the fallback is never requested
        assert_eq!(vec!["PHOG"], calls(&h));
        assert_eq!(Some(0.0), gauge(&h, "nws_temperature"));
        assert_eq!(None, gauge(&h, "nws_humidity"));
    }

    #[tokio::test]
    async fn test_collect_primary_without_temperature_and_no_fallback() {
        let source = FakeSource::default()
            .with("PHOG", Scripted::Observation(obs("PHOG").with_value(Field::Humidity, Some(65.0))))
            .with("PHHN", Scripted::Transport);
        let h = harness(source, config(&["PHHN"]));

        let snapshot = h.collector.collect(now()).await.unwrap();

        assert_eq!(vec!["PHOG", "PHHN"], calls(&h));
        assert!(snapshot.weather.is_some());
        assert_eq!(Some(65.0), gauge(&h, "nws_humidity"));
        assert_eq!(None, gauge(&h, "nws_temperature"));
    }

    #[tokio::test]
    async fn test_collect_total_failure_publishes_sun_only() {
        let source = FakeSource::default()
            .with("PHOG", Scripted::Transport)
            .with("PHHN", Scripted::Transport)
            .with("PHLI", Scripted::Parse);
        let h = harness(source, config(&["PHHN", "PHLI"]));

        let err = h.collector.collect(now()).await.unwrap_err();

        assert_eq!(
            CollectorError::NoUsableSource {
                primary: "PHOG".to_owned(),
                attempted: vec!["PHHN".to_owned(), "PHLI".to_owned()],
            },
            err
        );
        assert!(gauge(&h, SUN_ALTITUDE).is_some());
        assert!(gauge(&h, SUN_AZIMUTH).is_some());
        assert!(!h.registry.snapshot().keys().any(|k| k.name().starts_with("nws_")));
        assert_eq!(1, h.metrics.collection_failures_total());
    }

    #[tokio::test]
    async fn test_collect_total_failure_keeps_previous_weather() {
        let primary = obs("PHOG").with_value(Field::Temperature, Some(25.0));
        let good = harness(FakeSource::default().with("PHOG", Scripted::Observation(primary)), config(&[]));
        good.collector.collect(now()).await.unwrap();
        let before = gauge(&good, SUN_ALTITUDE);

        let failing = WeatherCollector::new(
            Arc::new(FakeSource::default()),
            config(&["PHHN"]),
            good.registry.clone(),
            CollectorMetrics::default(),
        );
        let later = now() + chrono::Duration::hours(3);
        assert!(failing.collect(later).await.is_err());

        assert_eq!(Some(25.0), gauge(&good, "nws_temperature"));
        assert_ne!(before, gauge(&good, SUN_ALTITUDE));
    }

    #[tokio::test]
    async fn test_run_fail_fast_returns_error() {
        let mut cfg = config(&["PHHN"]);
        cfg.fail_fast = true;
        let h = harness(FakeSource::default(), cfg);
        let (_tx, rx) = watch::channel(());

        let res = tokio::time::timeout(Duration::from_secs(5), h.collector.run(rx)).await.unwrap();

        assert!(matches!(res, Err(CollectorError::NoUsableSource { .. })));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = FakeSource::default().with(
            "PHOG",
            Scripted::Observation(obs("PHOG").with_value(Field::Temperature, Some(25.0))),
        );
        let h = harness(source, config(&[]));
        let registry = h.registry.clone();
        let (tx, rx) = watch::channel(());

        let handle = tokio::spawn(h.collector.run(rx));
        while registry.get(&MetricKey::new("nws_temperature")).is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(()).unwrap();

        let res = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(Ok(()), res);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_backoff_after_failure_and_refresh_after_success() {
        let source = FakeSource::default()
            .with(
                "PHOG",
                Scripted::Observation(obs("PHOG").with_value(Field::Temperature, Some(25.0))),
            )
            .with_outages(1);
        let mut cfg = config(&[]);
        cfg.refresh = Duration::from_secs(300);
        cfg.backoff = Duration::from_secs(100);
        let h = harness(source, cfg);
        let source = h.source.clone();
        let (tx, rx) = watch::channel(());

        let handle = tokio::spawn(h.collector.run(rx));

        // t = 1s: the first collection failed
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(1, source.num_calls());
        assert_eq!(1, h.metrics.collection_failures_total());

        // t = 101s: retried after the backoff and succeeded
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(2, source.num_calls());
        assert_eq!(Some(25.0), h.registry.get(&MetricKey::new("nws_temperature")));

        // t = 399s: still waiting out the refresh period
        tokio::time::sleep(Duration::from_secs(298)).await;
        assert_eq!(2, source.num_calls());

        // t = 401s: refreshed
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(3, source.num_calls());

        tx.send(()).unwrap();
        assert_eq!(Ok(()), handle.await.unwrap());
    }
}
