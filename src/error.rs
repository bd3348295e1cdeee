//! Per-item error taxonomy.
//!
//! These errors never abort a run on their own: the syncer and the batch
//! coordinator catch them at the loop boundary and turn them into report
//! entries. Run-level failures (datastore unreachable, bad config) travel
//! as `anyhow::Error`.

use thiserror::Error;

use forum_harness_core::models::FailureStage;

/// Failure while syncing one item.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network/HTTP error or malformed thread payload.
    #[error("fetch failed for item {item_id}: {message}")]
    FetchFailed { item_id: i64, message: String },

    /// The fetched thread could not be written.
    #[error("store failed for item {item_id}: {message}")]
    StoreFailed { item_id: i64, message: String },
}

impl SyncError {
    pub fn item_id(&self) -> i64 {
        match self {
            SyncError::FetchFailed { item_id, .. } | SyncError::StoreFailed { item_id, .. } => {
                *item_id
            }
        }
    }

    pub fn stage(&self) -> FailureStage {
        match self {
            SyncError::FetchFailed { .. } => FailureStage::Fetch,
            SyncError::StoreFailed { .. } => FailureStage::Store,
        }
    }
}

/// Failure while analyzing one item.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The item was handed out without raw content.
    #[error("no raw content stored for item {0}")]
    MissingRawContent(i64),

    #[error("failed to load raw content for item {item_id}: {message}")]
    LoadFailed { item_id: i64, message: String },

    /// Transport error, non-success status, or timeout.
    #[error("analysis call failed for item {item_id}: {message}")]
    CallFailed { item_id: i64, message: String },

    /// The call succeeded but the response did not match the schema.
    #[error("analysis response for item {item_id} could not be parsed: {message}")]
    ParseFailed {
        item_id: i64,
        message: String,
        raw_response: String,
    },

    #[error("failed to save analysis for item {item_id}: {message}")]
    SaveFailed { item_id: i64, message: String },
}

impl AnalysisError {
    pub fn item_id(&self) -> i64 {
        match self {
            AnalysisError::MissingRawContent(item_id) => *item_id,
            AnalysisError::LoadFailed { item_id, .. }
            | AnalysisError::CallFailed { item_id, .. }
            | AnalysisError::ParseFailed { item_id, .. }
            | AnalysisError::SaveFailed { item_id, .. } => *item_id,
        }
    }

    pub fn stage(&self) -> FailureStage {
        match self {
            AnalysisError::MissingRawContent(_) | AnalysisError::LoadFailed { .. } => {
                FailureStage::Load
            }
            AnalysisError::CallFailed { .. } => FailureStage::Call,
            AnalysisError::ParseFailed { .. } => FailureStage::Parse,
            AnalysisError::SaveFailed { .. } => FailureStage::Save,
        }
    }

    /// The service response, kept for parse failures.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            AnalysisError::ParseFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Only transport-level failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::CallFailed { .. })
    }
}
