//! Bounded in-memory log shared between producers and the web UI.
//!
//! Any task may push lines; readers page through them with the sequence
//! number of the last entry they saw. When the ring is full the oldest entry
//! is overwritten and simply disappears from later reads.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub const DEFAULT_CAPACITY: usize = 256;
/// Maximum bytes kept per line.
pub const DEFAULT_LINE_LEN: usize = 160;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub sequence: u32,
    pub text: String,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    last_sequence: u32,
}

#[derive(Clone)]
pub struct LogRing {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    line_len: usize,
}

impl LogRing {
    pub fn new(capacity: usize, line_len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                last_sequence: 0,
            })),
            capacity: capacity.max(1),
            line_len,
        }
    }

    /// Appends a line and returns its sequence number.
    pub fn push_line(&self, text: &str) -> u32 {
        let text = truncate_on_char_boundary(text, self.line_len).to_string();

        // 日志写入不应因锁中毒而中断，直接取回内部数据
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.last_sequence = inner.last_sequence.saturating_add(1);
        let sequence = inner.last_sequence;

        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(LogEntry { sequence, text });
        sequence
    }

    /// Entries with `sequence > since`, oldest first.
    pub fn entries_since(&self, since: u32) -> Vec<LogEntry> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner
            .entries
            .iter()
            .filter(|e| e.sequence > since)
            .cloned()
            .collect()
    }

    pub fn last_sequence(&self) -> u32 {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).last_sequence
    }

    /// A `tracing` layer that mirrors every event into this ring.
    pub fn layer(&self) -> LogRingLayer {
        LogRingLayer { ring: self.clone() }
    }
}

fn truncate_on_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Forwards formatted `tracing` events into a [`LogRing`].
///
/// Lines look like `INFO petbot_net_core::supervisor: Connected ssid=Home`.
pub struct LogRingLayer {
    ring: LogRing,
}

impl<S: Subscriber> Layer<S> for LogRingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let mut line = format!("{} {}: {}", meta.level(), meta.target(), visitor.message);
        line.push_str(&visitor.fields);
        self.ring.push_line(&line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
