//! Core data models used throughout Forum Harness.
//!
//! These types represent the forum items, their sync metadata, the raw
//! captured threads, and the analysis results that flow through the
//! sync → analyze pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Summary of one item as reported by the remote listing endpoint.
///
/// Cheap to obtain (one listing page carries many of them) and carries
/// the change signals compared by [`crate::change::detect_change`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub item_id: i64,
    pub title: Option<String>,
    pub reply_count: i64,
    /// Timestamp of the most recent reply, verbatim from the listing.
    pub last_activity_at: String,
    pub highest_reply_seq: Option<i64>,
}

/// Last-known change signals for an item, written only by the syncer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub item_id: i64,
    pub reply_count: i64,
    pub last_activity_at: String,
    pub highest_reply_seq: Option<i64>,
    /// Unix seconds of the fetch that produced this row.
    pub synced_at: i64,
}

impl SyncMetadata {
    /// Mirror the summary fields that triggered a successful fetch.
    pub fn from_summary(summary: &ItemSummary, synced_at: i64) -> Self {
        Self {
            item_id: summary.item_id,
            reply_count: summary.reply_count,
            last_activity_at: summary.last_activity_at.clone(),
            highest_reply_seq: summary.highest_reply_seq,
            synced_at,
        }
    }
}

/// One post within a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub seq: i64,
    pub author: String,
    pub body: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A full discussion thread as fetched from the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub item_id: i64,
    pub title: String,
    /// Posts in ascending `seq` order.
    pub posts: Vec<Post>,
}

impl Thread {
    /// SHA-256 over the canonical JSON encoding of the thread.
    ///
    /// Used to tell whether an existing analysis was produced from the
    /// content currently stored.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }
}

/// The captured body of an item as last fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    pub item_id: i64,
    pub thread: Thread,
    pub content_hash: String,
    pub fetched_at: i64,
}

impl RawContent {
    pub fn new(thread: Thread, fetched_at: i64) -> Self {
        let content_hash = thread.content_hash();
        Self {
            item_id: thread.item_id,
            thread,
            content_hash,
            fetched_at,
        }
    }
}

/// Fixed set of categories the analysis service may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Question,
    BugReport,
    FeatureRequest,
    HowTo,
    Discussion,
    Announcement,
    Feedback,
    Other,
}

impl Category {
    pub fn all() -> &'static [Category] {
        &[
            Category::Question,
            Category::BugReport,
            Category::FeatureRequest,
            Category::HowTo,
            Category::Discussion,
            Category::Announcement,
            Category::Feedback,
            Category::Other,
        ]
    }

    /// Parse a category label, accepting a few common spellings.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "question" | "q&a" | "qa" => Some(Category::Question),
            "bug_report" | "bug" => Some(Category::BugReport),
            "feature_request" | "feature" => Some(Category::FeatureRequest),
            "how_to" | "howto" | "tutorial" => Some(Category::HowTo),
            "discussion" => Some(Category::Discussion),
            "announcement" | "announce" => Some(Category::Announcement),
            "feedback" => Some(Category::Feedback),
            "other" => Some(Category::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Question => "question",
            Category::BugReport => "bug_report",
            Category::FeatureRequest => "feature_request",
            Category::HowTo => "how_to",
            Category::Discussion => "discussion",
            Category::Announcement => "announcement",
            Category::Feedback => "feedback",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted entry, e.g. a question and the answer the thread gave it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub question: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Structured analysis output for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub item_id: i64,
    pub category: Category,
    /// Insertion order from the analysis response.
    pub records: Vec<AnalysisRecord>,
    pub model: String,
    /// `content_hash` of the raw content this result was derived from.
    pub source_hash: String,
    pub analyzed_at: i64,
}

/// Reference to a unit of analysis work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRef {
    pub item_id: i64,
    pub title: String,
    pub fetched_at: i64,
}

/// Which raw items count as analysis work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkFilter {
    /// No analysis, or an analysis of different content than is stored now.
    Unanalyzed,
    /// No analysis, or one written before the given unix timestamp.
    AnalyzedBefore(i64),
    /// Every raw item.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Pipeline stage at which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Store,
    Load,
    Call,
    Parse,
    Save,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Fetch => "fetch",
            FailureStage::Store => "store",
            FailureStage::Load => "load",
            FailureStage::Call => "call",
            FailureStage::Parse => "parse",
            FailureStage::Save => "save",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(FailureStage::Fetch),
            "store" => Some(FailureStage::Store),
            "load" => Some(FailureStage::Load),
            "call" => Some(FailureStage::Call),
            "parse" => Some(FailureStage::Parse),
            "save" => Some(FailureStage::Save),
            _ => None,
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most recent analysis failure recorded for an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisFailure {
    pub item_id: i64,
    pub stage: FailureStage,
    pub message: String,
    pub raw_response: Option<String>,
    pub failed_at: i64,
}

/// Persisted summary of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRunRecord {
    pub mode: String,
    pub pages: u64,
    pub fetched: u64,
    pub skipped: u64,
    pub failed: u64,
    pub started_at: i64,
    pub finished_at: i64,
}
