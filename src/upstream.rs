//! Thin contract to the external budgeting service.
//!
//! The rest of the crate only sees the `UpstreamClient` trait; the reqwest
//! implementation lives here and tests substitute an in-memory mock.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream rate limit hit")]
    RateLimited { retry_after: u64 },
    #[error("Upstream requires multi-factor confirmation")]
    MfaRequired,
    #[error("Upstream rejected the stored credentials")]
    Auth,
    #[error("{0}")]
    Api(String),
}

impl From<UpstreamError> for ApiError {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::RateLimited { retry_after } => ApiError::RateLimited { retry_after },
            UpstreamError::MfaRequired => {
                ApiError::MfaRequired("Upstream requires multi-factor confirmation".into())
            }
            UpstreamError::Auth => ApiError::Auth("Upstream rejected the stored credentials".into()),
            UpstreamError::Api(message) => ApiError::Upstream(message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub amount: f64,
    pub date: String,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub category: Option<CategoryRef>,
    #[serde(default)]
    pub tags: Vec<TagRef>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub struct TransactionQuery<'a> {
    pub tag_ids: Option<&'a [String]>,
    pub category_ids: Option<&'a [String]>,
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
}

pub struct SearchQuery<'a> {
    pub search: Option<&'a str>,
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
    pub limit: i64,
    pub offset: i64,
    pub credits_only: bool,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get_transactions(
        &self,
        query: TransactionQuery<'_>,
    ) -> Result<Vec<Transaction>, UpstreamError>;

    async fn search_transactions(
        &self,
        query: SearchQuery<'_>,
    ) -> Result<Vec<Transaction>, UpstreamError>;

    async fn list_tags(&self) -> Result<Vec<Tag>, UpstreamError>;

    async fn list_category_groups(&self) -> Result<Vec<CategoryGroup>, UpstreamError>;

    async fn set_tags(&self, transaction_id: &str, tag_ids: &[String])
        -> Result<(), UpstreamError>;

    async fn update_notes(&self, transaction_id: &str, notes: &str) -> Result<(), UpstreamError>;

    async fn get_notes(&self, transaction_id: &str) -> Result<String, UpstreamError>;
}

pub struct HttpUpstreamClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpUpstreamClient {
    pub fn new(base_url: String, token: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build upstream http client");
        HttpUpstreamClient {
            client,
            base_url,
            token,
        }
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, UpstreamError> {
        Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| UpstreamError::Api(e.to_string()))
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                Err(UpstreamError::RateLimited { retry_after })
            }
            StatusCode::UNAUTHORIZED => Err(UpstreamError::Auth),
            StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                if body.contains("mfa") || body.contains("multi-factor") {
                    Err(UpstreamError::MfaRequired)
                } else {
                    Err(UpstreamError::Auth)
                }
            }
            status => Err(UpstreamError::Api(format!("upstream returned {status}"))),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, UpstreamError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| UpstreamError::Api(e.to_string()))?;
        self.check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Api(e.to_string()))
    }
}

#[derive(Deserialize)]
struct TransactionsResponse {
    transactions: Vec<Transaction>,
}

#[derive(Deserialize)]
struct TagsResponse {
    tags: Vec<Tag>,
}

#[derive(Deserialize)]
struct GroupsResponse {
    groups: Vec<CategoryGroup>,
}

#[derive(Deserialize)]
struct NotesResponse {
    #[serde(default)]
    notes: Option<String>,
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn get_transactions(
        &self,
        query: TransactionQuery<'_>,
    ) -> Result<Vec<Transaction>, UpstreamError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(tag_ids) = query.tag_ids {
            params.push(("tag_ids", tag_ids.join(",")));
        }
        if let Some(category_ids) = query.category_ids {
            params.push(("category_ids", category_ids.join(",")));
        }
        if let Some(start) = query.start_date {
            params.push(("start_date", start.to_string()));
        }
        if let Some(end) = query.end_date {
            params.push(("end_date", end.to_string()));
        }

        let url = self.url("/transactions", &params)?;
        let payload: TransactionsResponse = self.get_json(url).await?;
        Ok(payload.transactions)
    }

    async fn search_transactions(
        &self,
        query: SearchQuery<'_>,
    ) -> Result<Vec<Transaction>, UpstreamError> {
        let mut params: Vec<(&str, String)> = vec![
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
            ("credits_only", query.credits_only.to_string()),
        ];
        if let Some(search) = query.search {
            params.push(("q", search.to_string()));
        }
        if let Some(start) = query.start_date {
            params.push(("start_date", start.to_string()));
        }
        if let Some(end) = query.end_date {
            params.push(("end_date", end.to_string()));
        }

        let url = self.url("/transactions/search", &params)?;
        let payload: TransactionsResponse = self.get_json(url).await?;
        Ok(payload.transactions)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, UpstreamError> {
        let url = self.url("/tags", &[])?;
        let payload: TagsResponse = self.get_json(url).await?;
        Ok(payload.tags)
    }

    async fn list_category_groups(&self) -> Result<Vec<CategoryGroup>, UpstreamError> {
        let url = self.url("/category-groups", &[])?;
        let payload: GroupsResponse = self.get_json(url).await?;
        Ok(payload.groups)
    }

    async fn set_tags(
        &self,
        transaction_id: &str,
        tag_ids: &[String],
    ) -> Result<(), UpstreamError> {
        let url = self.url(&format!("/transactions/{transaction_id}/tags"), &[])?;
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "tag_ids": tag_ids }))
            .send()
            .await
            .map_err(|e| UpstreamError::Api(e.to_string()))?;
        self.check(response).await.map(|_| ())
    }

    async fn update_notes(&self, transaction_id: &str, notes: &str) -> Result<(), UpstreamError> {
        let url = self.url(&format!("/transactions/{transaction_id}/notes"), &[])?;
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "notes": notes }))
            .send()
            .await
            .map_err(|e| UpstreamError::Api(e.to_string()))?;
        self.check(response).await.map(|_| ())
    }

    async fn get_notes(&self, transaction_id: &str) -> Result<String, UpstreamError> {
        let url = self.url(&format!("/transactions/{transaction_id}/notes"), &[])?;
        let payload: NotesResponse = self.get_json(url).await?;
        Ok(payload.notes.unwrap_or_default())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory upstream for service tests. Records mutations so tests
    /// can assert on side-effects.
    #[derive(Default)]
    pub struct MockUpstream {
        pub transactions: Mutex<Vec<Transaction>>,
        pub groups: Mutex<Vec<CategoryGroup>>,
        pub tags: Mutex<Vec<Tag>>,
        pub notes: Mutex<HashMap<String, String>>,
        pub tag_writes: Mutex<Vec<(String, Vec<String>)>>,
        pub note_writes: Mutex<Vec<(String, String)>>,
        pub fail_mutations: Mutex<bool>,
    }

    impl MockUpstream {
        pub fn with_transactions(transactions: Vec<Transaction>) -> Self {
            let mock = MockUpstream::default();
            *mock.transactions.lock().unwrap() = transactions;
            mock
        }
    }

    #[async_trait]
    impl UpstreamClient for MockUpstream {
        async fn get_transactions(
            &self,
            query: TransactionQuery<'_>,
        ) -> Result<Vec<Transaction>, UpstreamError> {
            let transactions = self.transactions.lock().unwrap().clone();
            Ok(transactions
                .into_iter()
                .filter(|t| match query.tag_ids {
                    Some(tag_ids) => t.tags.iter().any(|tag| tag_ids.contains(&tag.id)),
                    None => true,
                })
                .collect())
        }

        async fn search_transactions(
            &self,
            query: SearchQuery<'_>,
        ) -> Result<Vec<Transaction>, UpstreamError> {
            let transactions = self.transactions.lock().unwrap().clone();
            let filtered: Vec<Transaction> = transactions
                .into_iter()
                .filter(|t| !query.credits_only || t.amount > 0.0)
                .collect();
            let start = (query.offset as usize).min(filtered.len());
            let end = (start + query.limit as usize).min(filtered.len());
            Ok(filtered[start..end].to_vec())
        }

        async fn list_tags(&self) -> Result<Vec<Tag>, UpstreamError> {
            Ok(self.tags.lock().unwrap().clone())
        }

        async fn list_category_groups(&self) -> Result<Vec<CategoryGroup>, UpstreamError> {
            Ok(self.groups.lock().unwrap().clone())
        }

        async fn set_tags(
            &self,
            transaction_id: &str,
            tag_ids: &[String],
        ) -> Result<(), UpstreamError> {
            if *self.fail_mutations.lock().unwrap() {
                return Err(UpstreamError::Api("mock failure".into()));
            }
            self.tag_writes
                .lock()
                .unwrap()
                .push((transaction_id.to_string(), tag_ids.to_vec()));
            Ok(())
        }

        async fn update_notes(
            &self,
            transaction_id: &str,
            notes: &str,
        ) -> Result<(), UpstreamError> {
            if *self.fail_mutations.lock().unwrap() {
                return Err(UpstreamError::Api("mock failure".into()));
            }
            self.note_writes
                .lock()
                .unwrap()
                .push((transaction_id.to_string(), notes.to_string()));
            self.notes
                .lock()
                .unwrap()
                .insert(transaction_id.to_string(), notes.to_string());
            Ok(())
        }

        async fn get_notes(&self, transaction_id: &str) -> Result<String, UpstreamError> {
            Ok(self
                .notes
                .lock()
                .unwrap()
                .get(transaction_id)
                .cloned()
                .unwrap_or_default())
        }
    }
}
