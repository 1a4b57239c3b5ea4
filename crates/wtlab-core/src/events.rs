//! Observability sink for channel activity.
//!
//! Every component receives an `Arc<dyn EventSink>` instead of reaching for
//! global state. The sink gets two kinds of events: log entries (ordered,
//! append-only) and per-channel counter increments. Both are called from
//! many tasks at once, so appends go through an unbounded channel and
//! counters are plain atomics. Unrelated streams never contend on a lock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

/// An immutable log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    pub severity: Severity,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Info)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Warning)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Error)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Success)
    }
}

/// The logical channel types multiplexed over one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Datagram,
    Bidirectional,
    Unidirectional,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::Datagram,
        ChannelKind::Bidirectional,
        ChannelKind::Unidirectional,
    ];

    fn index(self) -> usize {
        match self {
            ChannelKind::Datagram => 0,
            ChannelKind::Bidirectional => 1,
            ChannelKind::Unidirectional => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Datagram => "datagram",
            ChannelKind::Bidirectional => "bidirectional",
            ChannelKind::Unidirectional => "unidirectional",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives log entries and counter increments from the channel engine.
pub trait EventSink: Send + Sync {
    /// Append a log entry.
    fn on_log(&self, entry: LogEntry);

    /// Increment the counter for `kind`, returning the new value.
    fn on_count(&self, kind: ChannelKind) -> u64;
}

/// Per-channel-type event counters.
#[derive(Debug, Default)]
pub struct ChannelCounters {
    counts: [AtomicU64; 3],
}

impl ChannelCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, kind: ChannelKind) -> u64 {
        self.counts[kind.index()].fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self, kind: ChannelKind) -> u64 {
        self.counts[kind.index()].load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        for c in &self.counts {
            c.store(0, Ordering::Release);
        }
    }

    /// Snapshot of all three counters in `ChannelKind::ALL` order.
    pub fn snapshot(&self) -> [(ChannelKind, u64); 3] {
        ChannelKind::ALL.map(|k| (k, self.get(k)))
    }
}

/// Ordered, append-only log sequence.
///
/// Appends never block: they are queued on an unbounded channel. Readers
/// drain the queue into the stored sequence before enumerating.
pub struct LogBook {
    tx: mpsc::UnboundedSender<LogEntry>,
    inner: Mutex<LogBookInner>,
}

struct LogBookInner {
    rx: mpsc::UnboundedReceiver<LogEntry>,
    entries: Vec<LogEntry>,
}

impl LogBook {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            inner: Mutex::new(LogBookInner {
                rx,
                entries: Vec::new(),
            }),
        }
    }

    pub fn append(&self, entry: LogEntry) {
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.tx.send(entry);
    }

    /// Current sequence, in emission order.
    pub fn entries(&self) -> Vec<LogEntry> {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let LogBookInner { rx, entries } = &mut *inner;
        while let Ok(entry) = rx.try_recv() {
            entries.push(entry);
        }
        entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, queued or stored. Used when a new connection
    /// attempt begins.
    pub fn clear(&self) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        while inner.rx.try_recv().is_ok() {}
        inner.entries.clear();
    }
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new()
    }
}

fn trace_entry(entry: &LogEntry) {
    match entry.severity {
        Severity::Info => info!("{}", entry.message),
        Severity::Success => info!(success = true, "{}", entry.message),
        Severity::Warning => warn!("{}", entry.message),
        Severity::Error => error!("{}", entry.message),
    }
}

/// Process-log sink: forwards entries to `tracing` and keeps counters.
#[derive(Debug, Default)]
pub struct TracingSink {
    counters: ChannelCounters,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> &ChannelCounters {
        &self.counters
    }
}

impl EventSink for TracingSink {
    fn on_log(&self, entry: LogEntry) {
        trace_entry(&entry);
    }

    fn on_count(&self, kind: ChannelKind) -> u64 {
        self.counters.increment(kind)
    }
}

/// Sink that records everything for later enumeration (UI log panel,
/// CLI summary, tests) and mirrors entries to `tracing`.
#[derive(Default)]
pub struct Observer {
    log: LogBook,
    counters: ChannelCounters,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> &LogBook {
        &self.log
    }

    pub fn counters(&self) -> &ChannelCounters {
        &self.counters
    }

    pub fn count(&self, kind: ChannelKind) -> u64 {
        self.counters.get(kind)
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    /// Zero the counters and clear the log.
    pub fn reset(&self) {
        self.counters.reset();
        self.log.clear();
    }
}

impl EventSink for Observer {
    fn on_log(&self, entry: LogEntry) {
        trace_entry(&entry);
        self.log.append(entry);
    }

    fn on_count(&self, kind: ChannelKind) -> u64 {
        self.counters.increment(kind)
    }
}

/// Render a chunk the way the log panel shows it: `1,2,3`.
pub fn format_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
