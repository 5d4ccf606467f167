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

use crate::client::ErrorKind;
use crate::collector::{MergedWeather, Snapshot};
use crate::observation::{compass_point, Field};
use crate::sun::SunPosition;
use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::metrics::MetricType;
use prometheus_client::registry::Registry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

const LABEL_DIRECTION: &str = "direction";
const LABEL_AMOUNT: &str = "amount";
const LABEL_STATION: &str = "station";
const LABEL_ROLE: &str = "role";

pub const NWS_CLOUD_COVER: &str = "nws_cloud_cover";
pub const NWS_OBSERVATION_SOURCE: &str = "nws_observation_source";
pub const SUN_ALTITUDE: &str = "sun_altitude";
pub const SUN_AZIMUTH: &str = "sun_azimuth";
pub const SUN_IS_DAYLIGHT: &str = "sun_is_daylight";
pub const SUN_SUNRISE_TIME: &str = "sun_sunrise_time";
pub const SUN_SUNSET_TIME: &str = "sun_sunset_time";

/// Name of the gauge that a particular observation field is exported as.
pub fn field_metric(field: Field) -> &'static str {
    match field {
        Field::Temperature => "nws_temperature",
        Field::Humidity => "nws_humidity",
        Field::Dewpoint => "nws_dewpoint",
        Field::WindDirection => "nws_wind_direction",
        Field::WindSpeed => "nws_wind_speed",
        Field::BarometricPressure => "nws_barometric_pressure",
        Field::SeaLevelPressure => "nws_sealevel_pressure",
        Field::Visibility => "nws_visibility",
    }
}

#[derive(Debug)]
struct FamilyDescriptor {
    name: &'static str,
    help: &'static str,
    labeled: bool,
}

const WEATHER_FAMILIES: &[FamilyDescriptor] = &[
    FamilyDescriptor {
        name: "nws_humidity",
        help: "humidity gauge percentage",
        labeled: false,
    },
    FamilyDescriptor {
        name: "nws_temperature",
        help: "temperature in celsius",
        labeled: false,
    },
    FamilyDescriptor {
        name: "nws_dewpoint",
        help: "dewpoint in celsius",
        labeled: false,
    },
    FamilyDescriptor {
        name: "nws_wind_direction",
        help: "wind direction in degrees",
        labeled: true,
    },
    FamilyDescriptor {
        name: "nws_wind_speed",
        help: "wind speed in kilometers per hour",
        labeled: false,
    },
    FamilyDescriptor {
        name: "nws_barometric_pressure",
        help: "barometric pressure in pascals",
        labeled: false,
    },
    FamilyDescriptor {
        name: "nws_sealevel_pressure",
        help: "sealevel pressure in pascals",
        labeled: false,
    },
    FamilyDescriptor {
        name: "nws_visibility",
        help: "visibility in meters",
        labeled: false,
    },
    FamilyDescriptor {
        name: NWS_CLOUD_COVER,
        help: "cloud cover amount and base height in meters",
        labeled: true,
    },
    FamilyDescriptor {
        name: NWS_OBSERVATION_SOURCE,
        help: "stations that contributed to the latest observation",
        labeled: true,
    },
];

const SUN_FAMILIES: &[FamilyDescriptor] = &[
    FamilyDescriptor {
        name: SUN_ALTITUDE,
        help: "sun altitude in degrees above horizon (negative = below horizon)",
        labeled: false,
    },
    FamilyDescriptor {
        name: SUN_AZIMUTH,
        help: "sun azimuth in degrees from North (0=N, 90=E, 180=S, 270=W)",
        labeled: false,
    },
    FamilyDescriptor {
        name: SUN_IS_DAYLIGHT,
        help: "1 if sun is above horizon, 0 if below",
        labeled: false,
    },
    FamilyDescriptor {
        name: SUN_SUNRISE_TIME,
        help: "today's sunrise time as Unix timestamp",
        labeled: false,
    },
    FamilyDescriptor {
        name: SUN_SUNSET_TIME,
        help: "today's sunset time as Unix timestamp",
        labeled: false,
    },
];

/// Metric name plus label pairs, sorted by label name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    pub fn new<S: Into<String>>(name: S) -> Self {
        MetricKey {
            name: name.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        let key = key.into();
        self.labels.retain(|(k, _)| *k != key);
        self.labels.push((key, value.into()));
        self.labels.sort();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.labels.is_empty() {
            let pairs: Vec<String> = self.labels.iter().map(|(k, v)| format!("{}=\"{}\"", k, v)).collect();
            write!(f, "{{{}}}", pairs.join(","))?;
        }

        Ok(())
    }
}

pub type Samples = BTreeMap<MetricKey, f64>;

/// Latest value of every exported gauge.
///
/// The current values are held as an immutable map behind an `Arc`. Writers build
/// a new map and swap it in, readers clone the `Arc` and never observe a partially
/// applied update. The lock is only held long enough to swap or clone the pointer
/// (and for writers, to copy the map), never while fetching observations.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    current: RwLock<Arc<Samples>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the value of a single gauge.
    pub fn set(&self, key: MetricKey, value: f64) {
        self.update(|samples| {
            samples.insert(key, value);
        });
    }

    /// Apply `f` to a copy of the current values and publish the result as one change.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Samples),
    {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Samples::clone(&current);
        f(&mut next);
        *current = Arc::new(next);
    }

    pub fn snapshot(&self) -> Arc<Samples> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, key: &MetricKey) -> Option<f64> {
        self.snapshot().get(key).copied()
    }

    /// Replace the published values with those from `snapshot`.
    ///
    /// Sun gauges are always replaced. Weather gauges are only replaced when the
    /// snapshot has weather; otherwise the values from the last successful
    /// collection are left as they are. Fields missing from the merged weather
    /// are removed rather than set to zero.
    pub fn publish(&self, snapshot: &Snapshot) {
        self.update(|samples| {
            remove_families(samples, SUN_FAMILIES);
            insert_sun(samples, &snapshot.sun);

            if let Some(weather) = &snapshot.weather {
                remove_families(samples, WEATHER_FAMILIES);
                insert_weather(samples, weather);
            }
        });
    }
}

fn remove_families(samples: &mut Samples, families: &[FamilyDescriptor]) {
    samples.retain(|k, _| !families.iter().any(|f| f.name == k.name));
}

fn insert_sun(samples: &mut Samples, sun: &SunPosition) {
    samples.insert(MetricKey::new(SUN_ALTITUDE), sun.altitude_deg);
    samples.insert(MetricKey::new(SUN_AZIMUTH), sun.azimuth_deg);
    samples.insert(MetricKey::new(SUN_IS_DAYLIGHT), if sun.is_daylight { 1.0 } else { 0.0 });

    if let Some((sunrise, sunset)) = sun.daylight_period() {
        samples.insert(MetricKey::new(SUN_SUNRISE_TIME), sunrise.timestamp() as f64);
        samples.insert(MetricKey::new(SUN_SUNSET_TIME), sunset.timestamp() as f64);
    }
}

fn insert_weather(samples: &mut Samples, weather: &MergedWeather) {
    for field in Field::ALL {
        if let Some(v) = weather.value(field) {
            let key = MetricKey::new(field_metric(field));
            let key = match field {
                Field::WindDirection => key.with_label(LABEL_DIRECTION, compass_point(v)),
                _ => key,
            };

            samples.insert(key, v);
        }
    }

    // Layers without a reported base (clear skies) are exported at zero
    for layer in weather.cloud_layers.iter() {
        samples.insert(
            MetricKey::new(NWS_CLOUD_COVER).with_label(LABEL_AMOUNT, layer.amount.as_str()),
            layer.base_meters.unwrap_or(0.0),
        );
    }

    for (station, role) in weather.sources() {
        samples.insert(
            MetricKey::new(NWS_OBSERVATION_SOURCE)
                .with_label(LABEL_STATION, station)
                .with_label(LABEL_ROLE, role.as_str()),
            1.0,
        );
    }
}

/// Exposes the current contents of a `MetricsRegistry` as gauges when a
/// `prometheus_client::registry::Registry` is encoded.
#[derive(Debug)]
pub struct SnapshotCollector {
    registry: Arc<MetricsRegistry>,
}

impl SnapshotCollector {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        SnapshotCollector { registry }
    }
}

impl Collector for SnapshotCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        let samples = self.registry.snapshot();

        for family in WEATHER_FAMILIES.iter().chain(SUN_FAMILIES.iter()) {
            if family.labeled {
                let members: Vec<(&MetricKey, &f64)> = samples.iter().filter(|(k, _)| k.name == family.name).collect();
                if members.is_empty() {
                    continue;
                }

                let mut metric_encoder =
                    encoder.encode_descriptor(family.name, family.help, None, MetricType::Gauge)?;
                for (key, value) in members {
                    let gauge = ConstGauge::new(*value);
                    gauge.encode(metric_encoder.encode_family(&key.labels)?)?;
                }
            } else if let Some(value) = samples.get(&MetricKey::new(family.name)) {
                let gauge = ConstGauge::new(*value);
                let metric_encoder = encoder.encode_descriptor(family.name, family.help, None, gauge.metric_type())?;
                gauge.encode(metric_encoder)?;
            }
        }

        Ok(())
    }
}

/// Register a collector that exposes the contents of `snapshots` with `reg`.
pub fn register_snapshot(reg: &mut Registry, snapshots: Arc<MetricsRegistry>) {
    reg.register_collector(Box::new(SnapshotCollector::new(snapshots)));
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StationLabels {
    station: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct FetchErrorLabels {
    station: String,
    kind: String,
}

/// Counters describing the collector itself, as opposed to the weather.
///
/// Clones share the same underlying counters.
#[derive(Clone, Debug, Default)]
pub struct CollectorMetrics {
    fetches: Family<StationLabels, Counter>,
    fetch_errors: Family<FetchErrorLabels, Counter>,
    collection_failures: Counter,
}

impl CollectorMetrics {
    /// Create a new `CollectorMetrics` and register each metric with the provided `Registry`.
    pub fn new(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        reg.register(
            "nws_fetches",
            "Observation requests made, by station",
            metrics.fetches.clone(),
        );
        reg.register(
            "nws_fetch_errors",
            "Observation requests that failed, by station and kind of failure",
            metrics.fetch_errors.clone(),
        );
        reg.register(
            "nws_collection_failures",
            "Collections where no station produced a usable observation",
            metrics.collection_failures.clone(),
        );

        metrics
    }

    pub fn fetch(&self, station: &str) {
        self.fetches
            .get_or_create(&StationLabels {
                station: station.to_owned(),
            })
            .inc();
    }

    pub fn fetch_error(&self, station: &str, kind: ErrorKind) {
        self.fetch_errors
            .get_or_create(&FetchErrorLabels {
                station: station.to_owned(),
                kind: kind.as_str().to_owned(),
            })
            .inc();
    }

    pub fn collection_failure(&self) {
        self.collection_failures.inc();
    }

    /// Number of requests made for `station`. Reading doesn't create a series.
    pub fn fetches_total(&self, station: &str) -> u64 {
        self.fetches
            .get(&StationLabels {
                station: station.to_owned(),
            })
            .map(|c| c.get())
            .unwrap_or(0)
    }

    pub fn fetch_errors_total(&self, station: &str, kind: ErrorKind) -> u64 {
        self.fetch_errors
            .get(&FetchErrorLabels {
                station: station.to_owned(),
                kind: kind.as_str().to_owned(),
            })
            .map(|c| c.get())
            .unwrap_or(0)
    }

    pub fn collection_failures_total(&self) -> u64 {
        self.collection_failures.get()
    }
}
