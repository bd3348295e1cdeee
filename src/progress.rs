//! Sync and analysis progress reporting.
//!
//! Reports observable progress during `fh sync` and `fh analyze` so users see
//! which listing page is being scanned and how many items have been analyzed.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A listing page was processed by the syncer.
    SyncPage {
        page: u32,
        items: u64,
        fetched: u64,
        skipped: u64,
    },
    /// An analysis attempt finished. `total` is unknown when draining.
    Analyzed {
        n: u64,
        total: Option<u64>,
        item_id: i64,
        ok: bool,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "analyze  12 / 50 items  (item 4211 ok)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::SyncPage {
                page,
                items,
                fetched,
                skipped,
            } => format!(
                "sync  page {}  {} items  ({} fetched, {} unchanged)\n",
                page,
                format_number(*items),
                format_number(*fetched),
                format_number(*skipped)
            ),
            ProgressEvent::Analyzed {
                n,
                total,
                item_id,
                ok,
            } => {
                let status = if *ok { "ok" } else { "failed" };
                match total {
                    Some(t) => format!(
                        "analyze  {} / {} items  (item {} {})\n",
                        format_number(*n),
                        format_number(*t),
                        item_id,
                        status
                    ),
                    None => format!(
                        "analyze  {} items  (item {} {})\n",
                        format_number(*n),
                        item_id,
                        status
                    ),
                }
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::SyncPage {
                page,
                items,
                fetched,
                skipped,
            } => serde_json::json!({
                "event": "progress",
                "phase": "sync",
                "page": page,
                "items": items,
                "fetched": fetched,
                "skipped": skipped
            }),
            ProgressEvent::Analyzed {
                n,
                total,
                item_id,
                ok,
            } => serde_json::json!({
                "event": "progress",
                "phase": "analyze",
                "n": n,
                "total": total,
                "item_id": item_id,
                "ok": ok
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> std::sync::Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}
