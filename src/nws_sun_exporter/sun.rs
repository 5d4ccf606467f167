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

//! Low precision solar ephemeris for a fixed observation site.
//!
//! Altitude and azimuth follow the approximate solar coordinates from the
//! Astronomical Almanac (good to about 0.01 degrees between 1950 and 2050).
//! Sunrise and sunset use the hour angle method from the Almanac for Computers
//! with a zenith of 90.833 degrees to account for refraction and the size of the
//! solar disk.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, Timelike, Utc};

/// Altitude of the sun's center, in degrees, at apparent sunrise and sunset.
pub const HORIZON_ALTITUDE_DEG: f64 = -0.833;

const EVENT_ZENITH_DEG: f64 = 90.0 - HORIZON_ALTITUDE_DEG;
const J2000_JULIAN_DAY: f64 = 2451545.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Fixed geographic location that sun positions are computed for.
///
/// `utc_offset` decides where the site's calendar day begins and ends. Sunrise
/// and sunset are always reported for the local date of the instant being
/// computed, not the UTC date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    pub latitude: f64,
    pub longitude: f64,
    pub utc_offset: FixedOffset,
}

impl Site {
    pub fn new(latitude: f64, longitude: f64, utc_offset: FixedOffset) -> Self {
        Site {
            latitude,
            longitude,
            utc_offset,
        }
    }

    /// Create a site using the whole-hour offset closest to local mean solar time.
    pub fn with_solar_offset(latitude: f64, longitude: f64) -> Self {
        Self::new(latitude, longitude, solar_offset(longitude))
    }
}

/// Whole-hour UTC offset closest to mean solar time at `longitude`.
pub fn solar_offset(longitude: f64) -> FixedOffset {
    let hours = (longitude.clamp(-180.0, 180.0) / 15.0).round() as i32;
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

/// Position of the sun at one instant, plus the local day's sunrise and sunset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunPosition {
    /// Degrees above the horizon, negative when the sun is below it.
    pub altitude_deg: f64,
    /// Degrees clockwise from north, in the range `[0, 360)`.
    pub azimuth_deg: f64,
    pub is_daylight: bool,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
}

impl SunPosition {
    pub fn calculate(at: DateTime<Utc>, site: &Site) -> Self {
        let (altitude_deg, azimuth_deg) = horizontal_coordinates(julian_day(at), site.latitude, site.longitude);
        let local_date = at.with_timezone(&site.utc_offset).date_naive();
        let (sunrise, sunset) = match sunrise_sunset(local_date, site) {
            Some((rise, set)) => (Some(rise), Some(set)),
            None => (None, None),
        };

        SunPosition {
            altitude_deg,
            azimuth_deg,
            is_daylight: is_daylight(altitude_deg),
            sunrise,
            sunset,
        }
    }

    /// Sunrise and sunset, only if the local day has both.
    pub fn daylight_period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.sunrise.zip(self.sunset)
    }
}

/// True if any part of the sun is visible above the horizon at `altitude_deg`.
pub fn is_daylight(altitude_deg: f64) -> bool {
    altitude_deg > HORIZON_ALTITUDE_DEG
}

/// Julian Day for an instant, via the Gregorian calendar conversion.
pub fn julian_day(at: DateTime<Utc>) -> f64 {
    let seconds = f64::from(at.second()) + f64::from(at.nanosecond()) / 1e9;
    let hours = f64::from(at.hour()) + f64::from(at.minute()) / 60.0 + seconds / SECONDS_PER_HOUR;
    gregorian_to_julian(at.year(), at.month(), at.day(), hours / 24.0)
}

fn gregorian_to_julian(year: i32, month: u32, day: u32, day_fraction: f64) -> f64 {
    let (y, m) = if month <= 2 {
        (year - 1, month + 12)
    } else {
        (year, month)
    };

    let a = y.div_euclid(100);
    let b = 2 - a + a.div_euclid(4);

    (365.25 * f64::from(y + 4716)).floor() + (30.6001 * f64::from(m + 1)).floor() + f64::from(day) + f64::from(b)
        - 1524.5
        + day_fraction
}

/// Altitude and azimuth of the sun, in degrees, as seen from the given location.
fn horizontal_coordinates(jd: f64, latitude: f64, longitude: f64) -> (f64, f64) {
    let n = jd - J2000_JULIAN_DAY;

    let mean_longitude = (280.460 + 0.9856474 * n).rem_euclid(360.0);
    let mean_anomaly = (357.528 + 0.9856003 * n).rem_euclid(360.0).to_radians();
    let ecliptic_longitude =
        (mean_longitude + 1.915 * mean_anomaly.sin() + 0.020 * (2.0 * mean_anomaly).sin()).to_radians();
    let obliquity = (23.439 - 0.0000004 * n).to_radians();

    let right_ascension = (obliquity.cos() * ecliptic_longitude.sin()).atan2(ecliptic_longitude.cos());
    let declination = (obliquity.sin() * ecliptic_longitude.sin()).asin();

    let gmst = (280.46061837 + 360.98564736629 * n).rem_euclid(360.0);
    let hour_angle = (gmst + longitude).to_radians() - right_ascension;

    let lat = latitude.to_radians();
    let sin_alt = (lat.sin() * declination.sin() + lat.cos() * declination.cos() * hour_angle.cos()).clamp(-1.0, 1.0);
    let altitude = sin_alt.asin();

    // At the poles or with the sun at zenith azimuth is undefined, report north.
    let denominator = lat.cos() * altitude.cos();
    let mut azimuth = if denominator.abs() < f64::EPSILON {
        0.0
    } else {
        ((declination.sin() - lat.sin() * sin_alt) / denominator)
            .clamp(-1.0, 1.0)
            .acos()
            .to_degrees()
    };

    if hour_angle.sin() > 0.0 {
        azimuth = 360.0 - azimuth;
    }

    (altitude.to_degrees(), azimuth.rem_euclid(360.0))
}

/// Sunrise and sunset on the site's local calendar date `date`.
///
/// Returns `None` when the sun stays above or below the horizon for the entire day.
pub fn sunrise_sunset(date: NaiveDate, site: &Site) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let day_of_year = date.ordinal();
    let rise = event_hours_utc(day_of_year, site, SolarEvent::Rise)?;
    let set = event_hours_utc(day_of_year, site, SolarEvent::Set)?;

    let midnight = date.and_hms_opt(0, 0, 0)?.and_utc();
    Some((midnight + hours(rise), midnight + hours(set)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SolarEvent {
    Rise,
    Set,
}

/// Hours after UTC midnight of the local date at which the event happens. The
/// result may be negative or greater than 24 for sites far from Greenwich.
fn event_hours_utc(day_of_year: u32, site: &Site, event: SolarEvent) -> Option<f64> {
    let lng_hour = site.longitude / 15.0;
    let approx_local_hour = match event {
        SolarEvent::Rise => 6.0,
        SolarEvent::Set => 18.0,
    };
    let t = f64::from(day_of_year) + (approx_local_hour - lng_hour) / 24.0;

    let mean_anomaly = 0.9856 * t - 3.289;
    let true_longitude = (mean_anomaly
        + 1.916 * mean_anomaly.to_radians().sin()
        + 0.020 * (2.0 * mean_anomaly).to_radians().sin()
        + 282.634)
        .rem_euclid(360.0);

    let mut right_ascension = (0.91764 * true_longitude.to_radians().tan())
        .atan()
        .to_degrees()
        .rem_euclid(360.0);
    // Same quadrant as the true longitude
    right_ascension += (true_longitude / 90.0).floor() * 90.0 - (right_ascension / 90.0).floor() * 90.0;
    let right_ascension_hours = right_ascension / 15.0;

    let sin_dec = 0.39782 * true_longitude.to_radians().sin();
    let cos_dec = sin_dec.asin().cos();
    let lat = site.latitude.to_radians();
    let cos_hour_angle = (EVENT_ZENITH_DEG.to_radians().cos() - sin_dec * lat.sin()) / (cos_dec * lat.cos());

    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return None;
    }

    let hour_angle = match event {
        SolarEvent::Rise => 360.0 - cos_hour_angle.acos().to_degrees(),
        SolarEvent::Set => cos_hour_angle.acos().to_degrees(),
    } / 15.0;

    let local_mean_time = (hour_angle + right_ascension_hours - 0.06571 * t - 6.622).rem_euclid(24.0);
    Some(local_mean_time - lng_hour)
}

fn hours(h: f64) -> Duration {
    Duration::seconds((h * SECONDS_PER_HOUR).round() as i64)
}
