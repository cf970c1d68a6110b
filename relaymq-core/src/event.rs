//! Operational event logging.
//!
//! Events are fire-and-forget: an [`EventLogger`] never reports failure back
//! to the code that raised the event. Each [`LogMessage`] carries a stable
//! id so operators can match on it regardless of the rendered text.

use parking_lot::Mutex;
use std::fmt;

/// The broker object an event is about, e.g. `[txn(12)]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogSubject(String);

impl LogSubject {
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    pub fn transaction(connection_id: u64, transaction_id: u64) -> Self {
        Self(format!("[con({})/txn({})]", connection_id, transaction_id))
    }

    pub fn keystore(name: &str) -> Self {
        Self(format!("[ks({})]", name))
    }

    pub fn broker() -> Self {
        Self("[broker]".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single operational event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    id: &'static str,
    text: String,
}

impl LogMessage {
    /// A transaction's uncommitted content first exceeded its ceiling.
    pub fn flow_to_disk_active(total: u64, ceiling: u64) -> Self {
        Self {
            id: "TXN-1005",
            text: format!(
                "Flow to disk active: uncommitted message size {} bytes exceeds threshold {} bytes",
                total, ceiling
            ),
        }
    }

    pub fn keystore_create(name: &str) -> Self {
        Self {
            id: "KST-1001",
            text: format!("Create {}", name),
        }
    }

    pub fn keystore_close(name: &str) -> Self {
        Self {
            id: "KST-1003",
            text: format!("Close {}", name),
        }
    }

    /// A certificate expires within the warning window. A negative day count
    /// means it has already expired.
    pub fn keystore_expiring(alias: &str, days: i64, expiry: &str) -> Self {
        Self {
            id: "KST-1004",
            text: format!(
                "Certificate {} will expire in {} days on {}",
                alias, days, expiry
            ),
        }
    }

    pub fn broker_state_changed(from: &str, to: &str) -> Self {
        Self {
            id: "BRK-1001",
            text: format!("State changed from {} to {}", from, to),
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self.id, self.text)
    }
}

/// Sink for operational events.
pub trait EventLogger: Send + Sync {
    fn message(&self, subject: &LogSubject, message: LogMessage);
}

/// Emits events as `tracing` records on the `relaymq::event` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLogger;

impl EventLogger for TracingEventLogger {
    fn message(&self, subject: &LogSubject, message: LogMessage) {
        tracing::info!(
            target: "relaymq::event",
            message_id = message.id(),
            subject = subject.as_str(),
            "{} {}",
            subject,
            message
        );
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryEventLogger {
    events: Mutex<Vec<(LogSubject, LogMessage)>>,
}

impl MemoryEventLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(LogSubject, LogMessage)> {
        self.events.lock().clone()
    }

    /// Returns how many recorded events carry `id`.
    pub fn count(&self, id: &str) -> usize {
        self.events.lock().iter().filter(|(_, m)| m.id() == id).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventLogger for MemoryEventLogger {
    fn message(&self, subject: &LogSubject, message: LogMessage) {
        self.events.lock().push((subject.clone(), message));
    }
}
