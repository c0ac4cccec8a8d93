//! Weather provider client
//!
//! Issues one GET per city against the provider's "current conditions"
//! endpoint and turns the body into a [`RawWeatherResponse`]. The HTTP
//! status is never inspected: a provider error arrives as a JSON body whose
//! `success` field is falsy and is reported from there.

use crate::config::WeatherConfig;
use crate::models::RawWeatherResponse;
use crate::{LoadError, Result};
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Source of current weather observations
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Fetch the current conditions for one city
    async fn fetch_current(&self, city: &str) -> Result<RawWeatherResponse>;
}

/// Client for the Weatherstack `current` endpoint
pub struct WeatherstackClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: SecretString,
}

impl std::fmt::Debug for WeatherstackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherstackClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl WeatherstackClient {
    /// Create a new client; installs the retry middleware only when retries are enabled
    pub fn new(config: &WeatherConfig, api_key: &SecretString) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            "weatherload/",
            env!("CARGO_PKG_VERSION")
        ));
        if config.timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_seconds));
        }
        let http = builder
            .build()
            .map_err(|e| LoadError::startup(format!("Failed to create HTTP client: {e}")))?;

        let mut client = ClientBuilder::new(http);
        if config.max_retries > 0 {
            let policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
            client = client.with(RetryTransientMiddleware::new_with_policy(policy));
        }

        Ok(Self {
            client: client.build(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.expose_secret()),
        })
    }

    /// Full request URL for a city
    fn request_url(&self, city: &str) -> String {
        format!(
            "{}/current?access_key={}&query={}",
            self.base_url,
            urlencoding::encode(self.api_key.expose_secret()),
            urlencoding::encode(city)
        )
    }

    /// Request URL safe for logs
    fn redacted_url(&self, city: &str) -> String {
        format!(
            "{}/current?access_key=***&query={}",
            self.base_url,
            urlencoding::encode(city)
        )
    }
}

#[async_trait]
impl WeatherSource for WeatherstackClient {
    #[instrument(skip(self))]
    async fn fetch_current(&self, city: &str) -> Result<RawWeatherResponse> {
        debug!(url = %self.redacted_url(city), "Requesting current weather");
        let start_time = Instant::now();

        let response = self
            .client
            .get(self.request_url(city))
            .send()
            .await
            .map_err(|e| LoadError::transport(format!("Request for {city} failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            LoadError::transport(format!("Reading response for {city} failed: {e}"))
        })?;

        let elapsed = start_time.elapsed();
        debug!(
            %status,
            bytes = body.len(),
            "Weather response received in {:.3}s",
            elapsed.as_secs_f64()
        );
        if elapsed.as_secs() > 5 {
            warn!("Slow weather API response: {:.3}s", elapsed.as_secs_f64());
        }

        parse_response(city, &body)
    }
}

/// Interpret a provider body for `city`.
///
/// A missing `success` field counts as success; a present falsy value is a
/// provider failure.
pub fn parse_response(city: &str, body: &str) -> Result<RawWeatherResponse> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        LoadError::parse(format!("Invalid JSON in weather response for {city}: {e}"))
    })?;
    let raw = RawWeatherResponse::from_value(value)
        .map_err(|e| LoadError::parse(format!("Unexpected weather response for {city}: {e}")))?;

    if raw.is_failure() {
        return Err(LoadError::api(city, raw.error_info().unwrap_or("Unknown")));
    }

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn client(base_url: &str) -> WeatherstackClient {
        let config = WeatherConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        WeatherstackClient::new(&config, &SecretString::from("secret-key")).unwrap()
    }

    #[test]
    fn test_request_url_encodes_city() {
        let client = client("http://api.weatherstack.com/");
        assert_eq!(
            client.request_url("New York"),
            "http://api.weatherstack.com/current?access_key=secret-key&query=New%20York"
        );
        assert_eq!(
            client.request_url("São Paulo&x=1"),
            "http://api.weatherstack.com/current?access_key=secret-key&query=S%C3%A3o%20Paulo%26x%3D1"
        );
    }

    #[test]
    fn test_redacted_url_hides_key() {
        let client = client("http://api.weatherstack.com");
        let url = client.redacted_url("Paris");
        assert!(!url.contains("secret-key"));
        assert!(url.ends_with("query=Paris"));
        assert!(!format!("{client:?}").contains("secret-key"));
    }

    #[test]
    fn test_missing_success_is_success() {
        let raw = parse_response("Paris", r#"{"location": {"name": "Paris"}}"#).unwrap();
        assert_eq!(raw.as_map().len(), 1);
    }

    #[test]
    fn test_success_true_is_success() {
        assert!(parse_response("Paris", r#"{"success": true, "current": {}}"#).is_ok());
    }

    #[test]
    fn test_success_false_is_api_error() {
        let body = r#"{"success": false, "error": {"code": 615, "type": "request_failed", "info": "Your API request failed. Please try again or contact support."}}"#;
        let err = parse_response("Atlantis", body).unwrap_err();
        match err {
            LoadError::Api { city, message } => {
                assert_eq!(city, "Atlantis");
                assert!(message.starts_with("Your API request failed."));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[rstest]
    #[case::null("null")]
    #[case::zero("0")]
    #[case::empty_string(r#""""#)]
    #[case::empty_array("[]")]
    #[case::empty_object("{}")]
    fn test_falsy_success_is_api_error(#[case] flag: &str) {
        let body = format!(r#"{{"success": {flag}, "error": {{"info": "boom"}}}}"#);
        let err = parse_response("Atlantis", &body).unwrap_err();
        assert!(matches!(err, LoadError::Api { .. }), "got {err:?}");
        assert!(err.to_string().ends_with("boom"));
    }

    #[rstest]
    #[case::one("1")]
    #[case::text(r#""yes""#)]
    fn test_truthy_success_is_success(#[case] flag: &str) {
        let body = format!(r#"{{"success": {flag}, "current": {{"temperature": 8}}}}"#);
        assert!(parse_response("Paris", &body).is_ok());
    }

    #[test]
    fn test_success_false_without_info_is_unknown() {
        let err = parse_response("Atlantis", r#"{"success": false}"#).unwrap_err();
        assert_eq!(err.to_string(), "API error for Atlantis: Unknown");
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_response("Paris", "<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn test_non_object_is_parse_error() {
        let err = parse_response("Paris", "[]").unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }
}
