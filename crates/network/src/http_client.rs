use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Config;
use crate::error::{NetError, Result};

/// A request header as `(name, value)`. Names are static because callers only
/// ever attach a fixed set (`Authorization`, `x-csrf-token`).
pub type Header<'a> = (&'static str, &'a str);

pub struct HttpClient {
    client: Client,
    config: Config,
}

impl HttpClient {
    pub fn new(config: Config) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if !config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| NetError::Config(format!("Failed to build client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub async fn get(&self, url: &str, headers: &[Header<'_>]) -> Result<Response> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetError::Http(format!("GET request failed: {}", e)))?;
        Self::check_status(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[Header<'_>],
    ) -> Result<T> {
        let response = self.get(url, headers).await?;
        response
            .json()
            .await
            .map_err(|e| NetError::Http(format!("JSON parse failed: {}", e)))
    }

    pub async fn post<T: Serialize>(
        &self,
        url: &str,
        body: &T,
        headers: &[Header<'_>],
    ) -> Result<Response> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetError::Http(format!("POST request failed: {}", e)))?;
        Self::check_status(response).await
    }

    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[Header<'_>],
    ) -> Result<R> {
        let response = self.post(url, body, headers).await?;
        response
            .json()
            .await
            .map_err(|e| NetError::Http(format!("JSON parse failed: {}", e)))
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(NetError::Status {
            status: status.as_u16(),
            body,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
