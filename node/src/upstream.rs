//! HTTP client for the upstream conversion API.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use ratekeeper_common::{FixedPointMoney, DEFAULT_SCALE};
use ratekeeper_fx::{FxError, FxResult, Quote, QuoteRequest, UpstreamRateSource};

use crate::config::UpstreamConfig;

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    success: bool,
    #[serde(default)]
    result: f64,
    #[serde(default)]
    info: ConvertInfo,
}

#[derive(Debug, Default, Deserialize)]
struct ConvertInfo {
    #[serde(default)]
    rate: f64,
    #[serde(default)]
    timestamp: i64,
}

/// Upstream source backed by a `GET /convert` endpoint.
pub struct HttpRateSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRateSource {
    pub fn new(config: &UpstreamConfig) -> FxResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("ratekeeper/0.1")
            .timeout(config.timeout)
            .build()
            .map_err(|e| FxError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl UpstreamRateSource for HttpRateSource {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, request), fields(pair = %request.pair))]
    async fn convert(&self, request: &QuoteRequest) -> FxResult<Quote> {
        let pair = &request.pair;
        let url = format!("{}/convert", self.base_url);

        let mut query = vec![
            ("access_key", self.api_key.clone()),
            ("from", pair.from.code().to_string()),
            ("to", pair.to.code().to_string()),
            ("amount", request.amount.to_decimal_string()),
        ];
        if let Some(date) = request.date {
            query.push(("date", date.format("%Y-%m-%d").to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| FxError::upstream(pair, "request", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FxError::upstream(pair, "request", format!("HTTP error: {status}")));
        }

        let body: ConvertResponse = response
            .json()
            .await
            .map_err(|e| FxError::upstream(pair, "decode", e.to_string()))?;
        debug!(success = body.success, result = body.result, rate = body.info.rate, "Upstream answered");

        if !body.success {
            return Err(FxError::UpstreamRejected(pair.clone()));
        }

        let converted_amount = FixedPointMoney::from_decimal(body.result, DEFAULT_SCALE)
            .map_err(|e| FxError::upstream(pair, "decode", e.to_string()))?;
        let rate = if body.info.rate > 0.0 {
            FixedPointMoney::from_decimal(body.info.rate, DEFAULT_SCALE)
                .map_err(|e| FxError::upstream(pair, "decode", e.to_string()))?
        } else {
            converted_amount
        };
        let timestamp = if body.info.timestamp > 0 {
            Utc.timestamp_opt(body.info.timestamp, 0).single().unwrap_or_else(Utc::now)
        } else {
            Utc::now()
        };

        Ok(Quote {
            success: true,
            rate,
            converted_amount,
            timestamp,
        })
    }
}
