//! Microsoft Graph `/subscriptions` client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::auth::TokenProvider;
use crate::client::NotificationServiceClient;
use crate::error::ServiceError;
use crate::model::{RenewalRequest, Subscription, SubscriptionRequest};

/// Guards against a service that keeps handing out next links
const MAX_LIST_PAGES: usize = 100;

/// `OData` error response body
#[derive(Debug, Deserialize)]
struct ODataError {
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ODataPage<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

pub struct GraphSubscriptionClient {
    http_client: reqwest::Client,
    base_url: String,
    token_provider: Arc<dyn TokenProvider>,
}

impl GraphSubscriptionClient {
    pub fn new(
        base_url: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::other(None, format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_provider,
        })
    }

    fn subscriptions_url(&self) -> String {
        format!("{}/subscriptions", self.base_url)
    }

    fn subscription_url(&self, id: &str) -> String {
        format!("{}/subscriptions/{}", self.base_url, id)
    }

    async fn request(&self, method: reqwest::Method, url: &str) -> Result<reqwest::RequestBuilder, ServiceError> {
        let token = self
            .token_provider
            .access_token()
            .await
            .map_err(|e| ServiceError::other(None, e.to_string()))?;

        Ok(self.http_client.request(method, url).bearer_auth(token))
    }

    /// Map a non-success response; 404 becomes `NotFound(id)`
    async fn error_from_response(id: Option<&str>, response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let message = match serde_json::from_str::<ODataError>(&body) {
            Ok(odata) if !odata.error.message.is_empty() => {
                format!("{}: {}", odata.error.code, odata.error.message)
            }
            _ if body.is_empty() => status.to_string(),
            _ => body,
        };

        if status == reqwest::StatusCode::NOT_FOUND {
            return ServiceError::NotFound(id.map(str::to_string).unwrap_or(message));
        }

        ServiceError::Other {
            status: Some(status.as_u16()),
            message,
        }
    }
}

#[async_trait]
impl NotificationServiceClient for GraphSubscriptionClient {
    async fn list(&self) -> Result<Vec<Subscription>, ServiceError> {
        let mut subscriptions = Vec::new();
        let mut url = self.subscriptions_url();

        for _ in 0..MAX_LIST_PAGES {
            debug!(url = %url, "Listing subscriptions");
            let response = self.request(reqwest::Method::GET, &url).await?.send().await?;
            if !response.status().is_success() {
                return Err(Self::error_from_response(None, response).await);
            }

            let page: ODataPage<Subscription> = response.json().await?;
            subscriptions.extend(page.value);

            match page.next_link {
                Some(next) => url = next,
                None => return Ok(subscriptions),
            }
        }

        Err(ServiceError::other(
            None,
            format!("Subscription list exceeded {} pages", MAX_LIST_PAGES),
        ))
    }

    async fn create(&self, request: &SubscriptionRequest) -> Result<Subscription, ServiceError> {
        let response = self
            .request(reqwest::Method::POST, &self.subscriptions_url())
            .await?
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(None, response).await);
        }
        Ok(response.json().await?)
    }

    async fn update(&self, id: &str, expiration: DateTime<Utc>) -> Result<Subscription, ServiceError> {
        let body = RenewalRequest { expiration_date_time: expiration };
        let response = self
            .request(reqwest::Method::PATCH, &self.subscription_url(id))
            .await?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(Some(id), response).await);
        }
        Ok(response.json().await?)
    }

    async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        let response = self
            .request(reqwest::Method::DELETE, &self.subscription_url(id))
            .await?
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(Some(id), response).await);
        }
        Ok(())
    }
}
