//! Structured allocator lifecycle records.
//!
//! Every allocator decision can leave an [`AllocatorLogRecord`] behind,
//! stamped with a monotonic decision id and a snapshot of the heap counters.
//! Records are kept in memory and drained by the caller; nothing is printed.

use serde::Serialize;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    /// Parse from string (case-insensitive). Unknown values map to `Info`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" | "off" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Heap counters captured with every record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapSnapshot {
    /// Arena length in bytes.
    pub heap_size: usize,
    /// Number of allocated blocks.
    pub live_blocks: usize,
    /// Total size of allocated blocks, overhead included.
    pub live_bytes: usize,
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    pub level: AllocatorLogLevel,
    /// API symbol (`malloc`, `free`, `calloc`, `realloc`, `check`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `heap_grow`, ...).
    pub event: &'static str,
    /// Payload offset involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size-class bucket involved in the event.
    pub bucket: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    #[serde(flatten)]
    pub snapshot: HeapSnapshot,
}

/// In-memory sink for lifecycle records.
#[derive(Debug, Clone)]
pub struct LifecycleLog {
    min_level: AllocatorLogLevel,
    next_decision_id: u64,
    records: Vec<AllocatorLogRecord>,
}

impl LifecycleLog {
    #[must_use]
    pub fn new(min_level: AllocatorLogLevel) -> Self {
        Self {
            min_level,
            next_decision_id: 1,
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn enabled(&self, level: AllocatorLogLevel) -> bool {
        level >= self.min_level
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        bucket: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
        snapshot: HeapSnapshot,
    ) {
        if !self.enabled(level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        self.records.push(AllocatorLogRecord {
            decision_id,
            trace_id: format!("segalloc::{symbol}::{decision_id:016x}"),
            level,
            symbol,
            event,
            ptr,
            size,
            bucket,
            outcome,
            details: details.into(),
            snapshot,
        });
    }

    #[must_use]
    pub fn records(&self) -> &[AllocatorLogRecord] {
        &self.records
    }

    pub fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        std::mem::take(&mut self.records)
    }

    /// Renders the buffered records as JSON lines.
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}
