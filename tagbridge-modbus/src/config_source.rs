//! Remote tag configuration fetch.

use std::time::Duration;

use reqwest::{Client, Url};
use serde_json::Value;

/// Path of the tag list endpoint, relative to the config base URL.
pub const TAGS_PATH: &str = "api/plc/tags";

#[derive(Debug, thiserror::Error)]
pub enum ConfigFetchError {
    #[error("Invalid config URL: {0}")]
    Url(String),
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Expected a JSON array of tags")]
    NotAnArray,
}

/// HTTP source of the raw tag list.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    client: Client,
    tags_url: Url,
}

impl ConfigSource {
    pub fn new(base: &Url, timeout: Duration) -> Result<Self, ConfigFetchError> {
        let tags_url = base
            .join(TAGS_PATH)
            .map_err(|e| ConfigFetchError::Url(e.to_string()))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, tags_url })
    }

    pub fn tags_url(&self) -> &Url {
        &self.tags_url
    }

    /// Fetch the raw, un-normalized tag entries.
    pub async fn fetch(&self) -> Result<Vec<Value>, ConfigFetchError> {
        let body: Value = self
            .client
            .get(self.tags_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match body {
            Value::Array(entries) => Ok(entries),
            _ => Err(ConfigFetchError::NotAnArray),
        }
    }
}
