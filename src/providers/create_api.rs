use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::models::{Creation, Generation};

const NOT_LINKED: &str = "X account not found or not linked";

/// The external content-generation service.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, username: &str) -> Result<Generation, ApiError>;

    /// A random liked creation to republish, or `None` when the API has nothing usable.
    async fn fetch_random_creation(&self) -> Option<Creation>;
}

#[derive(Debug, Deserialize)]
struct CreationEnvelope {
    #[serde(default)]
    creation: Option<Creation>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

pub struct CreateApi {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl CreateApi {
    pub fn new(api_key: &str, base_url: &str) -> Self {
        CreateApi {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn classify_failure(status: u16, body: String) -> ApiError {
        let reason = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error);
        if reason.as_deref() == Some(NOT_LINKED) || body.trim() == NOT_LINKED {
            ApiError::AccountNotLinked
        } else {
            ApiError::Status { status, body }
        }
    }
}

#[async_trait]
impl Generator for CreateApi {
    async fn generate(&self, prompt: &str, username: &str) -> Result<Generation, ApiError> {
        let url = format!("{}/api/generate-external-api", self.base_url);
        info!("Sending generation request for {} to {}", username, url);

        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&json!({ "prompt": prompt, "x_username": username }))
            .send()
            .await
            .map_err(|e| {
                error!("Connection error: {}", e);
                ApiError::Transport(e)
            })?;

        let status = response.status();
        info!("Response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("API request failed: {}", body);
            return Err(Self::classify_failure(status.as_u16(), body));
        }

        let body = response.text().await?;
        let generation: Generation = serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("{}: {}", e, body)))?;
        info!("Generation successful");
        Ok(generation)
    }

    async fn fetch_random_creation(&self) -> Option<Creation> {
        let url = format!("{}/api/pull-random-liked-creation", self.base_url);
        let response = match self
            .client
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Error fetching creation: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("API request failed with status code: {}", response.status());
            return None;
        }

        match response.json::<CreationEnvelope>().await {
            Ok(envelope) => envelope.creation,
            Err(e) => {
                error!("Error decoding creation: {}", e);
                None
            }
        }
    }
}
