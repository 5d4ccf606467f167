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

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Scalar readings reported by a station that are exported as gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Temperature,
    Humidity,
    Dewpoint,
    WindDirection,
    WindSpeed,
    BarometricPressure,
    SeaLevelPressure,
    Visibility,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Temperature,
        Field::Humidity,
        Field::Dewpoint,
        Field::WindDirection,
        Field::WindSpeed,
        Field::BarometricPressure,
        Field::SeaLevelPressure,
        Field::Visibility,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Dewpoint => "dewpoint",
            Field::WindDirection => "wind_direction",
            Field::WindSpeed => "wind_speed",
            Field::BarometricPressure => "barometric_pressure",
            Field::SeaLevelPressure => "sealevel_pressure",
            Field::Visibility => "visibility",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cloud layer, in the order the station reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudLayer {
    pub amount: String,
    pub base_meters: Option<f64>,
}

/// Result of fetching the latest observation from one station.
///
/// Readings that the station did not report (explicit `null` or a missing key
/// upstream) are absent and `value()` returns `None` for them. A reading of zero
/// is a real reading and is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub station_id: String,
    pub fetched_at: DateTime<Utc>,
    pub cloud_layers: Vec<CloudLayer>,
    values: BTreeMap<Field, f64>,
}

impl Observation {
    pub fn new<S: Into<String>>(station_id: S, fetched_at: DateTime<Utc>) -> Self {
        Observation {
            station_id: station_id.into(),
            fetched_at,
            cloud_layers: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    /// Set or clear the value of a field, returning the observation.
    pub fn with_value(mut self, field: Field, value: Option<f64>) -> Self {
        self.set(field, value);
        self
    }

    pub fn with_cloud_layer<S: Into<String>>(mut self, amount: S, base_meters: Option<f64>) -> Self {
        self.cloud_layers.push(CloudLayer {
            amount: amount.into(),
            base_meters,
        });
        self
    }

    pub fn set(&mut self, field: Field, value: Option<f64>) {
        match value {
            Some(v) => self.values.insert(field, v),
            None => self.values.remove(&field),
        };
    }

    pub fn value(&self, field: Field) -> Option<f64> {
        self.values.get(&field).copied()
    }

    /// Temperature is the reading that decides whether a station is usable.
    pub fn has_temperature(&self) -> bool {
        self.values.contains_key(&Field::Temperature)
    }
}

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW", "NNW",
];

/// Name of the 16-point compass sector containing `degrees`.
///
/// Each sector is 22.5 degrees wide and centered on its point, so "N" covers
/// 348.75 through 11.25 degrees. Values outside of 0-360 are wrapped.
pub fn compass_point(degrees: f64) -> &'static str {
    let sector = ((degrees.rem_euclid(360.0) + 11.25) / 22.5) as usize;
    COMPASS_POINTS[sector % COMPASS_POINTS.len()]
}
