// src/core/service_client.rs
//! HTTP service client for the JobPulse REST API.
//!
//! All authenticated calls attach the session's access token as a bearer
//! credential, read from the session store on every request so the client
//! never holds a stale copy.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::feed::NotificationsApi;
use crate::session::AuthApi;
use crate::storage::{SessionStore, KEY_TOKEN};
use crate::types::{LoginResponse, NotificationPage, UnreadCountResponse};

const AUTH_LOGIN_ENDPOINT: &str = "/api/auth/login/";
const AUTH_GOOGLE_ENDPOINT: &str = "/api/auth/google/";
const AUTH_LOGOUT_ENDPOINT: &str = "/api/auth/logout/";
const AUTH_REGISTER_ENDPOINT: &str = "/api/auth/register/";
const NOTIFICATIONS_ENDPOINT: &str = "/api/notifications";

pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    store: Arc<dyn SessionStore>,
}

impl RestClient {
    /// Create new service client with configuration
    pub fn new(base_url: String, timeout: Duration, store: Arc<dyn SessionStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            store,
        })
    }

    async fn bearer(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match self.store.get(KEY_TOKEN).await? {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Ok(request),
        }
    }

    async fn read_json<R>(response: reqwest::Response, url: &str) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let status = response.status();
        trace!("Response status for {}: {}", url, status);

        if status.is_success() {
            response
                .json::<R>()
                .await
                .with_context(|| format!("Failed to parse JSON response from {}", url))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("HTTP {} error from {}: {}", status, url, error_text)
        }
    }

    /// Generic GET request with query parameters
    pub async fn get<R>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("GET {}", url);

        let request = self.bearer(self.client.get(&url)).await?;
        let response = request
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to GET from {}", url))?;

        Self::read_json(response, &url).await
    }

    /// Generic POST request with JSON body
    pub async fn post_json<T, R>(&self, endpoint: &str, payload: &T) -> Result<R>
    where
        T: serde::Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("POST {}", url);

        let request = self.bearer(self.client.post(&url)).await?;
        let response = request
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to POST to {}", url))?;

        Self::read_json(response, &url).await
    }

    /// POST with an empty body, discarding any response payload
    pub async fn post_empty(&self, endpoint: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("POST {}", url);

        let request = self.bearer(self.client.post(&url)).await?;
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to POST to {}", url))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("HTTP {} error from {}: {}", status, url, error_text)
        }
    }
}

#[async_trait]
impl AuthApi for RestClient {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        self.post_json(AUTH_LOGIN_ENDPOINT, &payload).await
    }

    async fn google_login(&self, provider_token: &str) -> Result<LoginResponse> {
        let payload = serde_json::json!({ "token": provider_token });
        self.post_json(AUTH_GOOGLE_ENDPOINT, &payload).await
    }

    async fn register(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        self.post_json(AUTH_REGISTER_ENDPOINT, &payload).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, AUTH_LOGOUT_ENDPOINT);
        let payload = serde_json::json!({ "refresh": refresh_token });

        let request = self.bearer(self.client.post(&url)).await?;
        let response = request
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to POST to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Logout returned HTTP {}", status);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationsApi for RestClient {
    async fn list(&self, page: u32, limit: u32) -> Result<NotificationPage> {
        self.get(
            NOTIFICATIONS_ENDPOINT,
            &[("page", page.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    async fn unread_count(&self) -> Result<u64> {
        let response: UnreadCountResponse = self
            .get(
                &format!("{}/unread_count/", NOTIFICATIONS_ENDPOINT),
                &[],
            )
            .await?;
        Ok(response.count)
    }

    async fn mark_read(&self, id: u64) -> Result<()> {
        self.post_empty(&format!("{}/{}/mark_read/", NOTIFICATIONS_ENDPOINT, id))
            .await
    }

    async fn mark_all_read(&self) -> Result<()> {
        self.post_empty(&format!("{}/mark_all_read/", NOTIFICATIONS_ENDPOINT))
            .await
    }
}
