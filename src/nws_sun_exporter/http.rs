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

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const OPENMETRICS_TEXT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// State shared by every request to the metrics server.
#[derive(Debug)]
pub struct RequestContext {
    registry: Registry,
}

impl RequestContext {
    pub fn new(registry: Registry) -> Self {
        RequestContext { registry }
    }
}

/// Build the router that serves `/metrics` in the OpenMetrics text format.
pub fn router(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/metrics", get(text_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn text_metrics(State(context): State<Arc<RequestContext>>) -> Response {
    let mut buf = String::new();

    match encode(&mut buf, &context.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            ([(CONTENT_TYPE, OPENMETRICS_TEXT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
