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

use crate::observation::{CloudLayer, Field, Observation};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;

/// Broad category of a failed request, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Parse,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Parse => "parse",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ClientError {
    Transport(reqwest::Error),
    InvalidStation(String),
    Unexpected(StatusCode, Url),
    Parse(serde_json::Error),
}

impl ClientError {
    /// Unexpected statuses, including a missing station, count as transport failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::Parse,
            _ => ErrorKind::Transport,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::InvalidStation(s) => write!(f, "invalid station {}", s),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Parse(e) => write!(f, "malformed response: {}", e),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

/// Something that can produce the latest observation for a station.
///
/// Implementations make a single attempt per call and leave retries and
/// fallback to the caller.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch(&self, station: &str) -> Result<Observation, ClientError>;
}

#[derive(Debug)]
pub struct WeatherGovClient {
    client: Client,
    base_url: Url,
}

impl WeatherGovClient {
    const USER_AGENT: &'static str = "nws_sun_exporter (https://github.com/56quarters/nws_exporter)";
    const JSON_RESPONSE: &'static str = "application/geo+json";

    /// Create a client for the API at `base_url`. Request timeouts are configured
    /// on the provided `reqwest::Client`.
    pub fn new(client: Client, base_url: Url) -> Self {
        WeatherGovClient { client, base_url }
    }

    pub async fn station(&self, station: &str) -> Result<Station, ClientError> {
        let station_url = self.station_url(station);
        tracing::debug!(message = "making station information request", url = %station_url);

        let res = self.make_request(station, station_url).await?;
        let body = res.bytes().await.map_err(ClientError::Transport)?;
        serde_json::from_slice::<Station>(&body).map_err(ClientError::Parse)
    }

    pub async fn observation(&self, station: &str) -> Result<Observation, ClientError> {
        let fetched_at = Utc::now();
        let request_url = self.observation_url(station);
        tracing::debug!(message = "making latest observation request", url = %request_url);

        let res = self.make_request(station, request_url).await?;
        let body = res.bytes().await.map_err(ClientError::Transport)?;
        let parsed = serde_json::from_slice::<ObservationResponse>(&body).map_err(ClientError::Parse)?;

        Ok(parsed.properties.into_observation(station, fetched_at))
    }

    async fn make_request<S: Into<String>>(&self, station: S, url: Url) -> Result<Response, ClientError> {
        let res = self
            .client
            .get(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Transport)?;

        let status = res.status();
        if status == StatusCode::OK {
            Ok(res)
        } else if status == StatusCode::NOT_FOUND {
            Err(ClientError::InvalidStation(station.into()))
        } else {
            Err(ClientError::Unexpected(status, url))
        }
    }

    fn station_url(&self, station: &str) -> Url {
        let mut url = self.base_url.clone();
        // Segments are percent-encoded by `push`. A base URL that cannot have a
        // path is rejected when the binary parses its arguments.
        if let Ok(mut p) = url.path_segments_mut() {
            p.clear().push("stations").push(station);
        }

        url
    }

    fn observation_url(&self, station: &str) -> Url {
        let mut url = self.station_url(station);
        if let Ok(mut p) = url.path_segments_mut() {
            p.push("observations").push("latest");
        }

        url
    }
}

#[async_trait]
impl ObservationSource for WeatherGovClient {
    async fn fetch(&self, station: &str) -> Result<Observation, ClientError> {
        self.observation(station).await
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Station {
    pub id: String,
    pub properties: StationProperties,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StationProperties {
    pub station_identifier: String,
    pub name: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ObservationResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub properties: ObservationProperties,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObservationProperties {
    #[serde(default)]
    pub station: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub temperature: Measurement,
    #[serde(default)]
    pub dewpoint: Measurement,
    #[serde(default)]
    pub wind_direction: Measurement,
    #[serde(default)]
    pub wind_speed: Measurement,
    #[serde(default)]
    pub barometric_pressure: Measurement,
    #[serde(default)]
    pub sea_level_pressure: Measurement,
    #[serde(default)]
    pub visibility: Measurement,
    #[serde(default)]
    pub relative_humidity: Measurement,
    #[serde(default)]
    pub cloud_layers: Option<Vec<CloudLayerResponse>>,
}

impl ObservationProperties {
    fn measurement(&self, field: Field) -> &Measurement {
        match field {
            Field::Temperature => &self.temperature,
            Field::Humidity => &self.relative_humidity,
            Field::Dewpoint => &self.dewpoint,
            Field::WindDirection => &self.wind_direction,
            Field::WindSpeed => &self.wind_speed,
            Field::BarometricPressure => &self.barometric_pressure,
            Field::SeaLevelPressure => &self.sea_level_pressure,
            Field::Visibility => &self.visibility,
        }
    }

    /// Convert the API representation into an `Observation` for `station`. Null
    /// and missing values stay absent.
    pub fn into_observation(self, station: &str, fetched_at: chrono::DateTime<Utc>) -> Observation {
        let mut obs = Observation::new(station, fetched_at);
        for field in Field::ALL {
            obs.set(field, self.measurement(field).value);
        }

        obs.cloud_layers = self
            .cloud_layers
            .unwrap_or_default()
            .into_iter()
            .map(|l| CloudLayer {
                amount: l.amount,
                base_meters: l.base.value,
            })
            .collect();

        obs
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CloudLayerResponse {
    #[serde(default)]
    pub base: Measurement,
    pub amount: String,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    #[serde(default)]
    pub unit_code: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub quality_control: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{ClientError, ErrorKind, ObservationResponse, WeatherGovClient};
    use crate::observation::Field;
    use chrono::{TimeZone, Utc};
    use reqwest::{Client, StatusCode, Url};

    const OBSERVATION: &str = r#"{
        "id": "https://api.weather.gov/stations/PHOG/observations/2024-06-21T22:54:00+00:00",
        "type": "Feature",
        "properties": {
            "@id": "https://api.weather.gov/stations/PHOG/observations/2024-06-21T22:54:00+00:00",
            "station": "https://api.weather.gov/stations/PHOG",
            "timestamp": "2024-06-21T22:54:00+00:00",
            "temperature": {"unitCode": "wmoUnit:degC", "value": 0, "qualityControl": "V"},
            "dewpoint": {"unitCode": "wmoUnit:degC", "value": 18.3, "qualityControl": "V"},
            "windDirection": {"unitCode": "wmoUnit:degree_(angle)", "value": 60, "qualityControl": "V"},
            "windSpeed": {"unitCode": "wmoUnit:km_h-1", "value": 31.68, "qualityControl": "V"},
            "barometricPressure": {"unitCode": "wmoUnit:Pa", "value": 101590, "qualityControl": "V"},
            "seaLevelPressure": {"unitCode": "wmoUnit:Pa", "value": null, "qualityControl": "Z"},
            "relativeHumidity": {"unitCode": "wmoUnit:percent", "value": 62.5, "qualityControl": "V"},
            "cloudLayers": [
                {"base": {"unitCode": "wmoUnit:m", "value": 910}, "amount": "FEW"},
                {"base": {"unitCode": "wmoUnit:m", "value": null}, "amount": "CLR"}
            ]
        }
    }"#;

    #[test]
    fn test_observation_absent_values_are_not_zero() {
        let res: ObservationResponse = serde_json::from_str(OBSERVATION).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 21, 23, 0, 0).unwrap();
        let obs = res.properties.into_observation("PHOG", at);

        assert_eq!("PHOG", obs.station_id);
        assert_eq!(at, obs.fetched_at);
        assert_eq!(Some(0.0), obs.value(Field::Temperature));
        assert!(obs.has_temperature());
        assert_eq!(Some(62.5), obs.value(Field::Humidity));
        assert_eq!(Some(101590.0), obs.value(Field::BarometricPressure));
        // Explicit null
        assert_eq!(None, obs.value(Field::SeaLevelPressure));
        // Missing key entirely
        assert_eq!(None, obs.value(Field::Visibility));
    }

    #[test]
    fn test_observation_cloud_layers() {
        let res: ObservationResponse = serde_json::from_str(OBSERVATION).unwrap();
        let obs = res.properties.into_observation("PHOG", Utc::now());

        assert_eq!(2, obs.cloud_layers.len());
        assert_eq!("FEW", obs.cloud_layers[0].amount);
        assert_eq!(Some(910.0), obs.cloud_layers[0].base_meters);
        assert_eq!("CLR", obs.cloud_layers[1].amount);
        assert_eq!(None, obs.cloud_layers[1].base_meters);
    }

    #[test]
    fn test_observation_null_cloud_layers() {
        let res: ObservationResponse = serde_json::from_str(r#"{"properties": {"cloudLayers": null}}"#).unwrap();
        let obs = res.properties.into_observation("PHOG", Utc::now());

        assert!(obs.cloud_layers.is_empty());
        assert!(!obs.has_temperature());
    }

    #[test]
    fn test_observation_url() {
        let client = WeatherGovClient::new(Client::new(), Url::parse("https://api.weather.gov/").unwrap());
        assert_eq!(
            "https://api.weather.gov/stations/PHOG/observations/latest",
            client.observation_url("PHOG").as_str()
        );
        assert_eq!("https://api.weather.gov/stations/PHOG", client.station_url("PHOG").as_str());
    }

    #[test]
    fn test_observation_url_encodes_station() {
        let client = WeatherGovClient::new(Client::new(), Url::parse("https://api.weather.gov/").unwrap());
        assert_eq!(
            "https://api.weather.gov/stations/A%2FB/observations/latest",
            client.observation_url("A/B").as_str()
        );
    }

    #[test]
    fn test_error_kind() {
        let parse = ClientError::Parse(serde_json::from_str::<ObservationResponse>("{").unwrap_err());
        assert_eq!(ErrorKind::Parse, parse.kind());

        let status = ClientError::Unexpected(StatusCode::BAD_GATEWAY, Url::parse("https://example.com/").unwrap());
        assert_eq!(ErrorKind::Transport, status.kind());
        assert_eq!(ErrorKind::Transport, ClientError::InvalidStation("XXXX".to_owned()).kind());
    }
}
