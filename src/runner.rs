//! Per-item analysis.
//!
//! [`AnalysisRunner::analyze`] takes one item through
//! load → request → parse → save. Nothing is written unless the response
//! parsed, and the save replaces any prior result in full. The runner
//! makes exactly one service call; retry policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use forum_harness_core::analysis::{parse_analysis_response, AnalysisRequest};
use forum_harness_core::models::AnalysisResult;
use forum_harness_core::store::Store;

use crate::analyzer::AnalysisService;
use crate::error::AnalysisError;

/// Progress of one item through the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Loaded,
    Requested,
    ParseOk,
    ParseFailed,
    Saved,
    SaveFailed,
}

#[derive(Clone)]
pub struct AnalysisRunner {
    store: Arc<dyn Store>,
    service: Arc<dyn AnalysisService>,
    timeout: Duration,
}

impl AnalysisRunner {
    pub fn new(store: Arc<dyn Store>, service: Arc<dyn AnalysisService>, timeout: Duration) -> Self {
        Self {
            store,
            service,
            timeout,
        }
    }

    pub async fn analyze(&self, item_id: i64) -> Result<AnalysisResult, AnalysisError> {
        let raw = self
            .store
            .get_raw_content(item_id)
            .await
            .map_err(|e| AnalysisError::LoadFailed {
                item_id,
                message: format!("{:#}", e),
            })?
            .ok_or(AnalysisError::MissingRawContent(item_id))?;
        transition(item_id, AnalysisStage::Loaded);

        let request = AnalysisRequest::from_thread(&raw.thread);
        let response = match tokio::time::timeout(self.timeout, self.service.analyze(&request)).await
        {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                return Err(AnalysisError::CallFailed {
                    item_id,
                    message: format!("{:#}", e),
                })
            }
            Err(_) => {
                return Err(AnalysisError::CallFailed {
                    item_id,
                    message: format!("timed out after {}s", self.timeout.as_secs()),
                })
            }
        };
        transition(item_id, AnalysisStage::Requested);

        let parsed = match parse_analysis_response(&response) {
            Ok(p) => p,
            Err(e) => {
                transition(item_id, AnalysisStage::ParseFailed);
                return Err(AnalysisError::ParseFailed {
                    item_id,
                    message: e.to_string(),
                    raw_response: response,
                });
            }
        };
        transition(item_id, AnalysisStage::ParseOk);

        let result = AnalysisResult {
            item_id,
            category: parsed.category,
            records: parsed.records,
            model: self.service.model_name().to_string(),
            source_hash: raw.content_hash,
            analyzed_at: Utc::now().timestamp(),
        };

        if let Err(e) = self.store.replace_analysis(&result).await {
            transition(item_id, AnalysisStage::SaveFailed);
            return Err(AnalysisError::SaveFailed {
                item_id,
                message: format!("{:#}", e),
            });
        }
        transition(item_id, AnalysisStage::Saved);

        Ok(result)
    }
}

fn transition(item_id: i64, stage: AnalysisStage) {
    debug!(item_id, ?stage, "analysis stage");
}
