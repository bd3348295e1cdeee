//! Remote forum API client.
//!
//! Defines the [`ForumApi`] trait used by the syncer and an HTTP
//! implementation, [`HttpForumApi`], for Discourse-compatible JSON
//! endpoints:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | [`list_page`](ForumApi::list_page) | `GET {base_url}{listing_path}?page=N` |
//! | [`fetch_thread`](ForumApi::fetch_thread) | `GET {base_url}/t/{id}.json?print=true` |
//!
//! # Authentication
//!
//! Public forums need no credentials. When `forum.api_key_env` is set, the
//! named environment variable must exist; its value is sent as `Api-Key`,
//! along with `Api-Username` from `forum.api_username_env` (default
//! `system`).
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, …)
//! - Other 4xx → fail immediately
//! - Network errors → retry

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use forum_harness_core::models::{ItemSummary, Post, Thread};

use crate::config::ForumConfig;

/// One page of the remote listing.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub items: Vec<ItemSummary>,
    /// Whether the API advertises a further page.
    pub has_more: bool,
}

/// The remote discussion forum.
#[async_trait]
pub trait ForumApi: Send + Sync {
    /// Fetch listing page `page` (0-based).
    async fn list_page(&self, page: u32) -> Result<ListingPage>;

    /// Fetch the full thread for `item_id`, posts in ascending order.
    async fn fetch_thread(&self, item_id: i64) -> Result<Thread>;
}

/// [`ForumApi`] over HTTP.
pub struct HttpForumApi {
    client: reqwest::Client,
    base_url: String,
    listing_path: String,
    max_retries: u32,
}

impl HttpForumApi {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Fails if `forum.api_key_env` names a variable that is not set, or if
    /// the HTTP client cannot be constructed.
    pub fn new(config: &ForumConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(var) = &config.api_key_env {
            let key = std::env::var(var)
                .map_err(|_| anyhow!("{} environment variable not set (forum.api_key_env)", var))?;
            let username = match &config.api_username_env {
                Some(u) => std::env::var(u)
                    .map_err(|_| anyhow!("{} environment variable not set (forum.api_username_env)", u))?,
                None => "system".to_string(),
            };
            headers.insert("Api-Key", HeaderValue::from_str(&key)?);
            headers.insert("Api-Username", HeaderValue::from_str(&username)?);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            listing_path: config.listing_path.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            debug!(url, attempt, "forum request");
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body = response.text().await?;
                        return serde_json::from_str(&body)
                            .with_context(|| format!("malformed payload from {}", url));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("forum API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("forum API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("forum request failed after retries")))
    }
}

#[async_trait]
impl ForumApi for HttpForumApi {
    async fn list_page(&self, page: u32) -> Result<ListingPage> {
        let url = format!("{}{}?page={}", self.base_url, self.listing_path, page);
        let raw: RawListing = self.get_json(&url).await?;
        Ok(raw.into_page())
    }

    async fn fetch_thread(&self, item_id: i64) -> Result<Thread> {
        let url = format!("{}/t/{}.json?print=true", self.base_url, item_id);
        let raw: RawThread = self.get_json(&url).await?;
        raw.into_thread()
    }
}

// ============ Wire format ============

#[derive(Debug, Deserialize)]
struct RawListing {
    topic_list: RawTopicList,
}

#[derive(Debug, Deserialize)]
struct RawTopicList {
    #[serde(default)]
    topics: Vec<RawTopic>,
    #[serde(default)]
    more_topics_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    /// Includes the opening post, so it moves on every new reply.
    posts_count: i64,
    #[serde(default)]
    last_posted_at: Option<String>,
    #[serde(default)]
    bumped_at: Option<String>,
    #[serde(default)]
    highest_post_number: Option<i64>,
}

impl RawListing {
    fn into_page(self) -> ListingPage {
        let has_more = self.topic_list.more_topics_url.is_some();
        let items = self
            .topic_list
            .topics
            .into_iter()
            .map(|t| ItemSummary {
                item_id: t.id,
                title: t.title,
                reply_count: t.posts_count,
                // An empty value never parses, which forces a refetch.
                last_activity_at: t.last_posted_at.or(t.bumped_at).unwrap_or_default(),
                highest_reply_seq: t.highest_post_number,
            })
            .collect();
        ListingPage { items, has_more }
    }
}

#[derive(Debug, Deserialize)]
struct RawThread {
    id: i64,
    title: String,
    post_stream: RawPostStream,
}

#[derive(Debug, Deserialize)]
struct RawPostStream {
    posts: Vec<RawPost>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    post_number: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    raw: Option<String>,
    #[serde(default)]
    cooked: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl RawThread {
    fn into_thread(self) -> Result<Thread> {
        if self.post_stream.posts.is_empty() {
            bail!("thread {} has no posts", self.id);
        }
        let mut posts: Vec<Post> = self
            .post_stream
            .posts
            .into_iter()
            .map(|p| Post {
                seq: p.post_number,
                author: p.username.unwrap_or_default(),
                body: p.raw.or(p.cooked).unwrap_or_default(),
                created_at: p.created_at,
            })
            .collect();
        posts.sort_by_key(|p| p.seq);

        Ok(Thread {
            item_id: self.id,
            title: self.title,
            posts,
        })
    }
}
