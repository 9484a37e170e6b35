use crate::error::FetchError;
use crate::util::env::{env_opt, env_req};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// One POST to one catalog endpoint. Implementations never retry.
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn post(&self, endpoint_url: &str, query: &str) -> Result<Vec<Value>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
    expires_in: u64,
    #[allow(dead_code)]
    token_type: String,
}

#[derive(Debug, Clone)]
struct BearerToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
enum Credentials {
    Static(String),
    ClientCredentials { client_secret: String },
}

/// `reqwest` transport speaking IGDB's text query protocol.
pub struct IgdbHttpTransport {
    http: Client,
    client_id: String,
    credentials: Credentials,
    token: Arc<Mutex<Option<BearerToken>>>,
}

impl IgdbHttpTransport {
    pub fn new_from_env() -> Result<Self> {
        let client_id = env_req("TWITCH_CLIENT_ID")
            .context("missing env: TWITCH_CLIENT_ID (required for IGDB)")?;
        let credentials = match env_opt("IGDB_ACCESS_TOKEN") {
            Some(token) => Credentials::Static(token),
            None => Credentials::ClientCredentials {
                client_secret: env_req("TWITCH_CLIENT_SECRET").context(
                    "missing env: TWITCH_CLIENT_SECRET (or IGDB_ACCESS_TOKEN) required for IGDB",
                )?,
            },
        };
        let user_agent =
            env_opt("IGDB_USER_AGENT").unwrap_or_else(|| "igdb-harvest/0.1".to_string());
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to construct IGDB HTTP client")?;
        Ok(Self {
            http,
            client_id,
            credentials,
            token: Arc::new(Mutex::new(None)),
        })
    }

    async fn ensure_token(&self) -> Result<String> {
        let client_secret = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ClientCredentials { client_secret } => client_secret,
        };
        {
            let guard = self.token.lock().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() + Duration::from_secs(30) {
                    return Ok(token.access_token.clone());
                }
            }
        }
        let token = self.request_new_token(client_secret).await?;
        let mut guard = self.token.lock().await;
        *guard = Some(token.clone());
        Ok(token.access_token)
    }

    async fn request_new_token(&self, client_secret: &str) -> Result<BearerToken> {
        let response = self
            .http
            .post(TWITCH_TOKEN_URL)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", client_secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .context("requesting Twitch OAuth token")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "twitch token request failed (status={}): {}",
                status,
                text
            ));
        }
        let token: TwitchTokenResponse = response.json().await?;
        let ttl = token.expires_in.saturating_sub(30).max(30);
        info!(target = "fetcher", ttl_secs = ttl, "obtained Twitch app token");
        Ok(BearerToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(ttl),
        })
    }
}

#[async_trait]
impl CatalogTransport for IgdbHttpTransport {
    async fn post(&self, endpoint_url: &str, query: &str) -> Result<Vec<Value>, FetchError> {
        let token = self
            .ensure_token()
            .await
            .map_err(|err| FetchError::new(endpoint_url, None, format!("auth: {err:#}")))?;
        let response = self
            .http
            .post(endpoint_url)
            .header("Client-ID", &self.client_id)
            .header("Content-Type", "text/plain")
            .header("Authorization", format!("Bearer {}", token))
            .body(query.to_string())
            .send()
            .await
            .map_err(|err| FetchError::new(endpoint_url, err.status().map(|s| s.as_u16()), err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                let mut guard = self.token.lock().await;
                *guard = None;
            }
            let text = response.text().await.unwrap_or_default();
            return Err(FetchError::new(endpoint_url, Some(status.as_u16()), text));
        }

        let text = response
            .text()
            .await
            .map_err(|err| FetchError::new(endpoint_url, Some(status.as_u16()), err.to_string()))?;
        debug!(target = "fetcher", endpoint = endpoint_url, bytes = text.len(), "catalog response");
        serde_json::from_str::<Vec<Value>>(&text).map_err(|err| {
            FetchError::new(
                endpoint_url,
                Some(status.as_u16()),
                format!("failed to parse IGDB payload ({err})"),
            )
        })
    }
}
