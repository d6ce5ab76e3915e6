//! Audit trail of gate decisions and dangerous commands.
//!
//! Audit events are ordinary `tracing` events emitted with target
//! [`AUDIT_TARGET`]. [`AuditLog`] is a layer that keeps the most recent ones
//! in a bounded ring buffer; [`AuditReader`] takes snapshots of it for the
//! IPC `/audit` route.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// `tracing` target of every audit event.
pub const AUDIT_TARGET: &str = "plcwarden::audit";

/// A single captured audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// Seconds since the log was created.
    pub elapsed_secs: f64,
    pub level: String,
    /// Value of the `event` field, e.g. `armed` or `refused_not_armed`.
    pub event: String,
    pub message: String,
    /// Remaining structured fields, rendered as text.
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug)]
struct AuditBuffer {
    entries: VecDeque<AuditEntry>,
    capacity: usize,
    next_seq: u64,
    start: Instant,
}

impl AuditBuffer {
    fn push(&mut self, level: String, visitor: AuditVisitor) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.next_seq += 1;
        self.entries.push_back(AuditEntry {
            seq: self.next_seq,
            elapsed_secs: self.start.elapsed().as_secs_f64(),
            level,
            event: visitor.event,
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// A `tracing` layer that captures audit events into a shared ring buffer.
#[derive(Debug, Clone)]
pub struct AuditLog {
    buffer: Arc<Mutex<AuditBuffer>>,
}

impl AuditLog {
    /// Create a log that keeps at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(AuditBuffer {
                entries: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                next_seq: 0,
                start: Instant::now(),
            })),
        }
    }

    pub fn reader(&self) -> AuditReader {
        AuditReader {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<S: Subscriber> Layer<S> for AuditLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() != AUDIT_TARGET {
            return;
        }

        let mut visitor = AuditVisitor::default();
        event.record(&mut visitor);

        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(metadata.level().to_string(), visitor);
        }
    }
}

/// Read handle for the audit buffer.
#[derive(Debug, Clone)]
pub struct AuditReader {
    buffer: Arc<Mutex<AuditBuffer>>,
}

impl AuditReader {
    /// Snapshot of all retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .map(|buf| buf.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Entries with a sequence number greater than `seq`.
    pub fn since(&self, seq: u64) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .map(|buf| buf.entries.iter().filter(|e| e.seq > seq).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct AuditVisitor {
    event: String,
    message: String,
    fields: BTreeMap<String, String>,
}

impl AuditVisitor {
    fn record(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "event" => self.event = value,
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for AuditVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }
}
