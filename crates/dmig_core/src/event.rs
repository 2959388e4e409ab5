use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

/// Severity of a run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Typed event categories the runner emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Setup,
    MigrationStatus,
    ScriptOutput,
    MigrationError,
    HttpJsonPostStatus,
    Done,
}

/// One structured status record on the run event stream.
///
/// Serialises to a flat JSON object for log shippers. The timestamp is
/// omitted entirely under the `no_time` option so two identical runs
/// produce byte-identical streams.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub level: EventLevel,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub machine_name: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RunEvent {
    pub fn new(
        level: EventLevel,
        kind: EventKind,
        machine_name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            level,
            kind,
            machine_name: machine_name.into(),
            msg: msg.into(),
            args: None,
            count: None,
            duration_ms: None,
            timestamp: None,
        }
    }

    pub fn setup(machine_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, EventKind::Setup, machine_name, msg)
    }

    pub fn status(machine_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(
            EventLevel::Info,
            EventKind::MigrationStatus,
            machine_name,
            msg,
        )
    }

    pub fn error(machine_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(
            EventLevel::Error,
            EventKind::MigrationError,
            machine_name,
            msg,
        )
    }

    pub fn done(machine_name: impl Into<String>, count: u64, duration_ms: u64) -> Self {
        let mut event = Self::new(EventLevel::Info, EventKind::Done, machine_name, "done");
        event.count = Some(count);
        event.duration_ms = Some(duration_ms);
        event
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }
}

/// Consumer of the structured event stream. Implementations must tolerate
/// being called from the runner thread while a migration is mid-stream.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RunEvent) {}
}

/// Routes events onto the `log` facade, for embedders without a UI.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: RunEvent) {
        let level = match event.level {
            EventLevel::Debug => log::Level::Debug,
            EventLevel::Info => log::Level::Info,
            EventLevel::Warn => log::Level::Warn,
            EventLevel::Error => log::Level::Error,
        };
        log::log!(level, "[{}] {:?}: {}", event.machine_name, event.kind, event.msg);
    }
}

/// Forwards events over a channel to a UI thread.
pub struct ChannelSink {
    tx: Mutex<Sender<RunEvent>>,
}

impl ChannelSink {
    pub fn new(tx: Sender<RunEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: RunEvent) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(event);
        }
    }
}

/// Captures events in memory; the test and golden-file sink.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<RunEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// The stream rendered as JSON lines, for byte-stable comparisons.
    pub fn as_json_lines(&self) -> String {
        self.events()
            .iter()
            .filter_map(|event| serde_json::to_string(event).ok())
            .map(|line| line + "\n")
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_flat_with_type_field() {
        let event = RunEvent::done("people", 2, 0);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"level":"info","type":"Done","machine_name":"people","msg":"done","count":2,"duration_ms":0}"#
        );
    }

    #[test]
    fn omitted_timestamp_stays_out_of_the_json() {
        let event = RunEvent::status("people", "row");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("timestamp"));

        let mut stamped = RunEvent::status("people", "row");
        stamped.timestamp = Some(Utc::now());
        let json = serde_json::to_string(&stamped).unwrap();
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn memory_sink_preserves_emission_order() {
        let sink = MemorySink::new();
        sink.emit(RunEvent::setup("m", "one"));
        sink.emit(RunEvent::status("m", "two"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].msg, "one");
        assert_eq!(events[1].msg, "two");
    }
}
