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

//! Prometheus metrics exporter for api.weather.gov observations and the position of the sun
//!
//! ## Features
//!
//! `nws_sun_exporter` fetches the latest observation for a primary [NWS station] using the
//! [api.weather.gov] API and emits it as Prometheus metrics. When the primary station can't be
//! reached or doesn't report a temperature, an ordered list of fallback stations is tried and the
//! first one with a temperature fills in whatever the primary is missing. Alongside the weather,
//! the position of the sun at a fixed site is computed every collection.
//!
//! The following metrics are emitted when available (not all fields are available for all stations).
//!
//! * `nws_temperature` - Temperature, in degrees celsius.
//! * `nws_humidity` - Relative humidity (0-100).
//! * `nws_dewpoint` - Dewpoint, in degrees celsius.
//! * `nws_wind_direction{direction=$COMPASS_POINT}` - Wind direction, in degrees.
//! * `nws_wind_speed` - Wind speed, in kilometers per hour.
//! * `nws_barometric_pressure` - Barometric pressure, in pascals.
//! * `nws_sealevel_pressure` - Sea level pressure, in pascals.
//! * `nws_visibility` - Visibility, in meters.
//! * `nws_cloud_cover{amount=$AMOUNT}` - Base of each cloud layer, in meters.
//! * `nws_observation_source{station=$STATION, role=$ROLE}` - Stations used for the latest values.
//! * `sun_altitude` - Degrees above the horizon, negative when below.
//! * `sun_azimuth` - Degrees clockwise from north.
//! * `sun_is_daylight` - 1 if the sun is above the horizon, 0 otherwise.
//! * `sun_sunrise_time` and `sun_sunset_time` - Today's sunrise and sunset as UNIX timestamps,
//!   only when the sun both rises and sets today.
//! * `nws_fetches_total`, `nws_fetch_errors_total`, `nws_collection_failures_total` - Requests
//!   made by the exporter and how many of them failed.
//!
//! [NWS station]: https://www.weather.gov/documentation/services-web-api#/default/obs_stations
//! [api.weather.gov]: https://www.weather.gov/documentation/services-web-api
//!
//! ## Build
//!
//! `nws_sun_exporter` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Picking stations
//!
//! You can get a list of the available stations in your state by using the API itself. The
//! `properties.stationIdentifier` field for each station is the ID to use.
//!
//! ```text
//! curl -sS 'https://api.weather.gov/stations?state=HI' | jq | less
//! ```
//!
//! Pick a primary station and, optionally, nearby stations to fall back to. The site used for
//! the position of the sun is given separately. By default the site's calendar day is based on
//! the whole-hour offset closest to its longitude; use `--utc-offset-secs` to override it.
//!
//! ```text
//! ./nws_sun_exporter --station PHOG --fallback PHHN --fallback PHLI \
//!     --latitude 20.8986 --longitude -156.4306
//! ```
//!
//! When none of the stations can be used, the exporter waits `--backoff-secs` before trying
//! again. Pass `--fail-fast` to exit instead.
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9782` at `/metrics`. Add the host running
//! `nws_sun_exporter` as a target under the Prometheus `scrape_configs` section.
//!
//! ```yaml
//! scrape_configs:
//! - job_name: nws_sun_exporter
//!   static_configs:
//!   - targets: ['example:9782']
//! ```
//!

pub mod client;
pub mod collector;
pub mod http;
pub mod metrics;
pub mod observation;
pub mod sun;
