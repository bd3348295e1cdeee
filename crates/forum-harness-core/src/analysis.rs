//! Analysis request construction and response parsing.
//!
//! The analysis service receives an [`AnalysisRequest`] built from a
//! thread's title and ordered post bodies, and answers with a JSON object
//! of the form:
//!
//! ```json
//! { "category": "question", "records": [ { "question": "...", "answer": "..." } ] }
//! ```
//!
//! Services are not always disciplined about returning a bare JSON body,
//! so [`parse_analysis_response`] also accepts text that wraps the object
//! in a fenced code block.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{AnalysisRecord, Category, Thread};

/// Payload sent to the analysis service for one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    pub item_id: i64,
    pub title: String,
    pub posts: Vec<RequestPost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestPost {
    pub seq: i64,
    pub author: String,
    pub body: String,
}

impl AnalysisRequest {
    pub fn from_thread(thread: &Thread) -> Self {
        Self {
            item_id: thread.item_id,
            title: thread.title.clone(),
            posts: thread
                .posts
                .iter()
                .map(|p| RequestPost {
                    seq: p.seq,
                    author: p.author.clone(),
                    body: p.body.clone(),
                })
                .collect(),
        }
    }

    /// Plain-text rendering for chat-style services.
    pub fn render_text(&self) -> String {
        let mut out = format!("Title: {}\n", self.title);
        for post in &self.posts {
            out.push_str(&format!("\n#{} {}:\n{}\n", post.seq, post.author, post.body.trim()));
        }
        out
    }
}

/// Successfully parsed analysis response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnalysis {
    pub category: Category,
    pub records: Vec<AnalysisRecord>,
}

#[derive(Debug, Error)]
pub enum ResponseParseError {
    #[error("response contains no JSON object or fenced JSON block")]
    NoJson,
    #[error("response JSON does not match the expected schema: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    category: String,
    records: Vec<AnalysisRecord>,
}

/// Parse a service response into a category and ordered records.
pub fn parse_analysis_response(text: &str) -> Result<ParsedAnalysis, ResponseParseError> {
    let trimmed = text.trim();
    let json_text = if trimmed.starts_with('{') {
        trimmed
    } else {
        extract_fenced_json(trimmed).ok_or(ResponseParseError::NoJson)?
    };

    let raw: RawAnalysis = serde_json::from_str(json_text)?;
    let category = Category::parse(&raw.category)
        .ok_or_else(|| ResponseParseError::UnknownCategory(raw.category.clone()))?;

    Ok(ParsedAnalysis {
        category,
        records: raw.records,
    })
}

/// Return the contents of the first fenced code block that looks like JSON.
///
/// Both ```` ```json ```` and bare ```` ``` ```` fences are recognized;
/// the block must start with `{` once trimmed.
pub fn extract_fenced_json(text: &str) -> Option<&str> {
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        // Skip the info string (e.g. "json") up to the end of the fence line.
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
        let info = after[..body_start].trim();
        let body = &after[body_start..];
        let end = body.find("```")?;
        let block = body[..end].trim();
        if (info.is_empty() || info.eq_ignore_ascii_case("json")) && block.starts_with('{') {
            return Some(block);
        }
        rest = &body[end + 3..];
    }
    None
}
