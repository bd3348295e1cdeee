//! In-process fakes for the forum API and the analysis service.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use forum_harness::analysis::AnalysisRequest;
use forum_harness::analyzer::AnalysisService;
use forum_harness::forum::{ForumApi, ListingPage};
use forum_harness::models::{ItemSummary, Post, Thread};

pub fn summary(item_id: i64, reply_count: i64, last_activity_at: &str) -> ItemSummary {
    ItemSummary {
        item_id,
        title: Some(format!("Thread {}", item_id)),
        reply_count,
        last_activity_at: last_activity_at.to_string(),
        highest_reply_seq: Some(reply_count),
    }
}

pub fn thread(item_id: i64, posts: usize) -> Thread {
    Thread {
        item_id,
        title: format!("Thread {}", item_id),
        posts: (1..=posts as i64)
            .map(|seq| Post {
                seq,
                author: format!("user{}", seq),
                body: format!("post {} of thread {}", seq, item_id),
                created_at: None,
            })
            .collect(),
    }
}

/// Forum with scripted listing pages and threads.
#[derive(Default)]
pub struct FakeForum {
    pages: Mutex<Vec<Vec<ItemSummary>>>,
    threads: Mutex<HashMap<i64, Thread>>,
    broken: Mutex<HashSet<i64>>,
    failing_page: Mutex<Option<u32>>,
    fetches: Mutex<Vec<i64>>,
}

impl FakeForum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pages(&self, pages: Vec<Vec<ItemSummary>>) {
        *self.pages.lock().unwrap() = pages;
    }

    pub fn set_thread(&self, thread: Thread) {
        self.threads.lock().unwrap().insert(thread.item_id, thread);
    }

    /// Answer fetches for `item_id` with `thread`, whatever its own id.
    pub fn serve_as(&self, item_id: i64, thread: Thread) {
        self.threads.lock().unwrap().insert(item_id, thread);
    }

    /// Make `fetch_thread` fail for this item.
    pub fn break_item(&self, item_id: i64) {
        self.broken.lock().unwrap().insert(item_id);
    }

    pub fn fail_listing_page(&self, page: u32) {
        *self.failing_page.lock().unwrap() = Some(page);
    }

    pub fn fetches(&self) -> Vec<i64> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn clear_fetches(&self) {
        self.fetches.lock().unwrap().clear();
    }
}

#[async_trait]
impl ForumApi for FakeForum {
    async fn list_page(&self, page: u32) -> Result<ListingPage> {
        if *self.failing_page.lock().unwrap() == Some(page) {
            bail!("listing unavailable");
        }
        let pages = self.pages.lock().unwrap();
        let items = pages.get(page as usize).cloned().unwrap_or_default();
        Ok(ListingPage {
            items,
            has_more: (page as usize) + 1 < pages.len(),
        })
    }

    async fn fetch_thread(&self, item_id: i64) -> Result<Thread> {
        self.fetches.lock().unwrap().push(item_id);
        if self.broken.lock().unwrap().contains(&item_id) {
            bail!("HTTP 500 for thread {}", item_id);
        }
        self.threads
            .lock()
            .unwrap()
            .get(&item_id)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404 for thread {}", item_id))
    }
}

/// A scripted reply from the fake analysis service.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    Fail,
    Hang,
}

pub fn analysis_json(category: &str, questions: &[&str]) -> String {
    let records: Vec<serde_json::Value> = questions
        .iter()
        .map(|q| serde_json::json!({ "question": q, "answer": "yes", "tags": ["t"] }))
        .collect();
    serde_json::json!({ "category": category, "records": records }).to_string()
}

/// Analysis service that answers from per-item scripts, falling back to a
/// valid single-record response.
#[derive(Default)]
pub struct FakeService {
    scripts: Mutex<HashMap<i64, VecDeque<Reply>>>,
    always: Mutex<HashMap<i64, Reply>>,
    calls: Mutex<Vec<i64>>,
    delay: Option<Duration>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Queue one reply for the next call on `item_id`.
    pub fn script(&self, item_id: i64, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(item_id)
            .or_default()
            .push_back(reply);
    }

    /// Reply the same way to every call on `item_id`.
    pub fn always(&self, item_id: i64, reply: Reply) {
        self.always.lock().unwrap().insert(item_id, reply);
    }

    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisService for FakeService {
    fn model_name(&self) -> &str {
        "fake-model"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.item_id);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.item_id)
            .and_then(|q| q.pop_front());
        let reply = scripted.or_else(|| self.always.lock().unwrap().get(&request.item_id).cloned());

        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Fail) => bail!("HTTP 503 from analysis service"),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                bail!("unreachable")
            }
            None => Ok(analysis_json(
                "question",
                &[&format!("what about thread {}?", request.item_id)],
            )),
        }
    }
}
