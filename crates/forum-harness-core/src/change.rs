//! Change detection between a remote listing summary and stored metadata.
//!
//! The listing endpoint is cheap (one request per page of summaries) while
//! a full thread fetch costs one request per item. [`needs_fetch`] decides
//! whether the expensive path is required.
//!
//! # Comparison order
//!
//! 1. No stored metadata → fetch.
//! 2. `reply_count` differs → fetch.
//! 3. `last_activity_at` differs as an instant → fetch. If either side
//!    fails to parse the item is treated as changed.
//! 4. `highest_reply_seq` differs (only when both sides carry it) → fetch.
//!
//! ```rust
//! use forum_harness_core::change::needs_fetch;
//! use forum_harness_core::models::ItemSummary;
//!
//! let remote = ItemSummary {
//!     item_id: 1,
//!     title: None,
//!     reply_count: 3,
//!     last_activity_at: "2024-05-01T10:00:00Z".into(),
//!     highest_reply_seq: None,
//! };
//! assert!(needs_fetch(&remote, None));
//! ```

use chrono::{DateTime, Utc};

use crate::models::{ItemSummary, SyncMetadata};

/// Why an item needs a full fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReason {
    New,
    ReplyCount { stored: i64, remote: i64 },
    LastActivity,
    UnparseableActivity,
    HighestReplySeq { stored: i64, remote: i64 },
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeReason::New => "new",
            ChangeReason::ReplyCount { .. } => "reply_count",
            ChangeReason::LastActivity => "last_activity",
            ChangeReason::UnparseableActivity => "unparseable_activity",
            ChangeReason::HighestReplySeq { .. } => "highest_reply_seq",
        }
    }
}

/// Returns the first difference found, or `None` when the item is unchanged.
pub fn detect_change(remote: &ItemSummary, stored: Option<&SyncMetadata>) -> Option<ChangeReason> {
    let stored = match stored {
        Some(s) => s,
        None => return Some(ChangeReason::New),
    };

    if stored.reply_count != remote.reply_count {
        return Some(ChangeReason::ReplyCount {
            stored: stored.reply_count,
            remote: remote.reply_count,
        });
    }

    match (
        parse_instant(&stored.last_activity_at),
        parse_instant(&remote.last_activity_at),
    ) {
        (Some(a), Some(b)) if a == b => {}
        (Some(_), Some(_)) => return Some(ChangeReason::LastActivity),
        _ => return Some(ChangeReason::UnparseableActivity),
    }

    if let (Some(s), Some(r)) = (stored.highest_reply_seq, remote.highest_reply_seq) {
        if s != r {
            return Some(ChangeReason::HighestReplySeq {
                stored: s,
                remote: r,
            });
        }
    }

    None
}

/// True when the remote item must be fetched in full.
pub fn needs_fetch(remote: &ItemSummary, stored: Option<&SyncMetadata>) -> bool {
    detect_change(remote, stored).is_some()
}

/// Parse a timestamp into a canonical UTC instant.
///
/// Accepts RFC 3339 (any offset, optional fractional seconds) and plain
/// integer unix seconds.
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    s.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
