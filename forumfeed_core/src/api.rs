use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Response, Url};

use crate::config::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::models::{FeedResponse, VoteCounts, VoteRequest, VoteType};
use crate::signature::QuerySignature;

/// The remote feed backend, as seen by the synchronization engines.
#[async_trait]
pub trait FeedApi: Send + Sync {
    /// `GET /posts` for one page of `signature`, starting after `cursor`.
    async fn fetch_page(
        &self,
        signature: &QuerySignature,
        cursor: Option<&str>,
        limit: usize,
    ) -> FeedResult<FeedResponse>;

    /// `POST /posts/:id/vote`.
    async fn submit_vote(
        &self,
        post_id: &str,
        voter_id: &str,
        vote_type: VoteType,
    ) -> FeedResult<VoteCounts>;
}

#[derive(Clone)]
pub struct HttpFeedApi {
    base_url: String,
    client: Client,
}

impl HttpFeedApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let base = sanitize_base_url(base_url.into())?;
        let client = Client::builder()
            .user_agent(concat!("forumfeed/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base,
            client,
        })
    }

    pub fn from_config(config: &FeedConfig) -> anyhow::Result<Self> {
        Self::new(config.api_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> FeedResult<Url> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|err| FeedError::validation(format!("invalid URL {joined}: {err}")))
    }

    /// `/posts/{id}/vote` with the id escaped as a single path segment.
    fn vote_url(&self, post_id: &str) -> FeedResult<Url> {
        let mut url = self.url("/posts")?;
        url.path_segments_mut()
            .map_err(|()| FeedError::validation(format!("base URL {} cannot hold a path", self.base_url)))?
            .push(post_id)
            .push("vote");
        Ok(url)
    }
}

#[async_trait]
impl FeedApi for HttpFeedApi {
    async fn fetch_page(
        &self,
        signature: &QuerySignature,
        cursor: Option<&str>,
        limit: usize,
    ) -> FeedResult<FeedResponse> {
        let url = self.url("/posts")?;
        let mut query = signature.query_pairs();
        query.push(("limit", limit.to_string()));
        if let Some(cursor) = cursor {
            query.push(("lastId", cursor.to_string()));
        }
        tracing::debug!(%signature, cursor = ?cursor, limit, "fetching feed page");
        let response = self.client.get(url).query(&query).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    async fn submit_vote(
        &self,
        post_id: &str,
        voter_id: &str,
        vote_type: VoteType,
    ) -> FeedResult<VoteCounts> {
        let url = self.vote_url(post_id)?;
        let request = VoteRequest {
            vote_type,
            user_id: voter_id.to_string(),
        };
        tracing::debug!(post_id, voter_id, %vote_type, "submitting vote");
        let response = self.client.post(url).json(&request).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }
}

/// Turns a non-2xx answer into a `FeedError` carrying the response body.
async fn ensure_success(response: Response) -> FeedResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read body".to_string());
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(FeedError::status(status.as_u16(), message))
}

fn sanitize_base_url(mut base: String) -> anyhow::Result<String> {
    base = base.trim().to_string();
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{base}");
    }
    while base.ends_with('/') {
        base.pop();
    }
    let _ = Url::parse(&base).context("invalid base URL")?;
    Ok(base)
}
