use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;

/// Asynchronous request/response primitive used once per pipeline run.
#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("forecastio-sidecar/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl WeatherFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, TransportError> {
        let response = self.http.get(url).timeout(self.timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.text().await?)
    }
}

/// Builds the forecast request URL for one location.
pub fn forecast_url(
    base_url: &str,
    api_key: &str,
    latitude: f64,
    longitude: f64,
    language: &str,
) -> String {
    format!(
        "{}/forecast/{}/{},{}?lang={}&exclude=minutely,flags",
        base_url.trim_end_matches('/'),
        api_key,
        latitude,
        longitude,
        language
    )
}
