//! Central bank daily JSON rate source.
//!
//! The document looks like
//! `{"Valute": {"USD": {"Nominal": 1, "Value": 90.1234, ...}, ...}}`.
//! `Value` is the price of `Nominal` units, so the unit rate is
//! `Value / Nominal`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use parcelhub_shipping::ExchangeRate;

use super::{RateError, RateSource};

#[derive(Debug, Clone)]
pub struct CbrRateSource {
    client: Client,
    url: String,
    currency: String,
}

impl CbrRateSource {
    pub fn new(url: impl Into<String>, currency: impl Into<String>, timeout: Duration) -> Result<Self, RateError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RateError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            currency: currency.into(),
        })
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

#[async_trait]
impl RateSource for CbrRateSource {
    async fn fetch(&self) -> Result<ExchangeRate, RateError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RateError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), url = %self.url, "rate source returned an error status");
            return Err(RateError::Status(status.as_u16()));
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| RateError::Malformed(e.to_string()))?;

        let rate = parse_rate(&body, &self.currency)?;
        debug!(currency = %self.currency, %rate, "fetched exchange rate");
        Ok(rate)
    }
}

/// Extract `Valute.<currency>.Value / Nominal` from a daily document.
pub fn parse_rate(document: &JsonValue, currency: &str) -> Result<ExchangeRate, RateError> {
    let entry = document
        .get("Valute")
        .ok_or_else(|| RateError::Malformed("missing Valute section".to_string()))?
        .get(currency)
        .ok_or_else(|| RateError::MissingCurrency(currency.to_string()))?;

    let value = entry
        .get("Value")
        .and_then(JsonValue::as_f64)
        .ok_or_else(|| RateError::Malformed(format!("{currency}.Value is missing or not a number")))?;

    let nominal = match entry.get("Nominal") {
        None => 1.0,
        Some(n) => n
            .as_f64()
            .ok_or_else(|| RateError::Malformed(format!("{currency}.Nominal is not a number")))?,
    };
    if nominal <= 0.0 {
        return Err(RateError::Malformed(format!("{currency}.Nominal must be positive")));
    }

    ExchangeRate::new(value / nominal).map_err(|e| RateError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn source(server: &MockServer) -> CbrRateSource {
        CbrRateSource::new(server.url("/daily_json.js"), "USD", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn fetches_usd_value() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/daily_json.js");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "Date": "2025-08-05T11:30:00+03:00",
                    "Valute": {
                        "USD": {"CharCode": "USD", "Nominal": 1, "Value": 79.7653},
                        "EUR": {"CharCode": "EUR", "Nominal": 1, "Value": 92.1}
                    }
                }));
        });

        let rate = source(&server).fetch().await.unwrap();

        mock.assert();
        assert_eq!(rate.value(), 79.7653);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/daily_json.js");
            then.status(503);
        });

        assert_eq!(source(&server).fetch().await.unwrap_err(), RateError::Status(503));
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/daily_json.js");
            then.status(200).body("<html>maintenance</html>");
        });

        assert!(matches!(source(&server).fetch().await.unwrap_err(), RateError::Malformed(_)));
    }

    #[tokio::test]
    async fn slow_source_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/daily_json.js");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(json!({"Valute": {"USD": {"Nominal": 1, "Value": 90.0}}}));
        });

        let source = CbrRateSource::new(server.url("/daily_json.js"), "USD", Duration::from_millis(50)).unwrap();
        assert!(matches!(source.fetch().await.unwrap_err(), RateError::Http(_)));
    }

    #[test]
    fn nominal_divides_value() {
        let doc = json!({"Valute": {"JPY": {"Nominal": 100, "Value": 55.0}}});
        assert_eq!(parse_rate(&doc, "JPY").unwrap().value(), 0.55);
    }

    #[test]
    fn missing_pieces_are_errors() {
        assert!(matches!(parse_rate(&json!({}), "USD"), Err(RateError::Malformed(_))));
        assert!(matches!(
            parse_rate(&json!({"Valute": {}}), "USD"),
            Err(RateError::MissingCurrency(_))
        ));
        assert!(matches!(
            parse_rate(&json!({"Valute": {"USD": {"Value": "ninety"}}}), "USD"),
            Err(RateError::Malformed(_))
        ));
        assert!(matches!(
            parse_rate(&json!({"Valute": {"USD": {"Nominal": 0, "Value": 90.0}}}), "USD"),
            Err(RateError::Malformed(_))
        ));
        assert!(matches!(
            parse_rate(&json!({"Valute": {"USD": {"Nominal": 1, "Value": -1.0}}}), "USD"),
            Err(RateError::Malformed(_))
        ));
    }
}
