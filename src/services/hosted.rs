use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::models::{ExpenseRecord, NewExpense, UserProfile};
use crate::services::store::{ProfileStore, ReceiptStore};

const PROFILES_TABLE: &str = "profiles";

/// Thin client for the hosted PostgREST interface.
///
/// Every request carries the project anon key; row-level security on the
/// hosted side keys off the user's bearer token when one is present.
#[derive(Clone)]
pub struct HostedClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl HostedClient {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        HostedClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, action: &str) -> Result<T> {
    let response = ensure_success(response, action).await?;
    Ok(response.json::<T>().await?)
}

async fn ensure_success(response: Response, action: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    warn!(%status, action, "hosted store request failed");
    Err(anyhow!("Hosted store error {} while {}: {}", status, action, body))
}

pub struct HostedReceiptStore {
    client: HostedClient,
    table: String,
}

impl HostedReceiptStore {
    pub fn new(client: HostedClient, table: &str) -> Self {
        HostedReceiptStore {
            client,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl ReceiptStore for HostedReceiptStore {
    async fn insert(&self, expense: NewExpense) -> Result<ExpenseRecord> {
        debug!(table = %self.table, user_id = %expense.user_id, "inserting receipt");
        let response = self
            .client
            .request(Method::POST, &self.table)
            .header("Prefer", "return=representation")
            .header("Accept", "application/vnd.pgrst.object+json")
            .json(&expense)
            .send()
            .await?;
        read_json(response, "inserting receipt").await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ExpenseRecord>> {
        let response = self
            .client
            .request(Method::GET, &self.table)
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", user_id)),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await?;
        read_json(response, "listing receipts").await
    }

    async fn get(&self, id: &str, user_id: &str) -> Result<Option<ExpenseRecord>> {
        let response = self
            .client
            .request(Method::GET, &self.table)
            .query(&[
                ("select", "*".to_string()),
                ("id", format!("eq.{}", id)),
                ("user_id", format!("eq.{}", user_id)),
            ])
            .send()
            .await?;
        let rows: Vec<ExpenseRecord> = read_json(response, "fetching receipt").await?;
        Ok(rows.into_iter().next())
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool> {
        let response = self
            .client
            .request(Method::DELETE, &self.table)
            .header("Prefer", "return=representation")
            .query(&[
                ("id", format!("eq.{}", id)),
                ("user_id", format!("eq.{}", user_id)),
            ])
            .send()
            .await?;
        let removed: Vec<serde_json::Value> = read_json(response, "deleting receipt").await?;
        Ok(!removed.is_empty())
    }
}

pub struct HostedProfileStore {
    client: HostedClient,
}

impl HostedProfileStore {
    pub fn new(client: HostedClient) -> Self {
        HostedProfileStore { client }
    }
}

#[async_trait]
impl ProfileStore for HostedProfileStore {
    async fn get(&self, uid: &str) -> Result<Option<UserProfile>> {
        let response = self
            .client
            .request(Method::GET, PROFILES_TABLE)
            .query(&[("select", "*".to_string()), ("uid", format!("eq.{}", uid))])
            .send()
            .await?;
        let rows: Vec<UserProfile> = read_json(response, "fetching profile").await?;
        Ok(rows.into_iter().next())
    }

    async fn create(&self, profile: &UserProfile) -> Result<()> {
        let response = self
            .client
            .request(Method::POST, PROFILES_TABLE)
            .header("Prefer", "return=minimal")
            .json(profile)
            .send()
            .await?;
        ensure_success(response, "creating profile").await?;
        Ok(())
    }

    async fn set_upload_count(&self, uid: &str, count: u32, updated_at: &str) -> Result<()> {
        let response = self
            .client
            .request(Method::PATCH, PROFILES_TABLE)
            .header("Prefer", "return=minimal")
            .query(&[("uid", format!("eq.{}", uid))])
            .json(&json!({"upload_count": count, "updated_at": updated_at}))
            .send()
            .await?;
        ensure_success(response, "updating upload count").await?;
        Ok(())
    }
}
