use dmig_core::{EventKind, EventLevel, EventSink, RunEvent};
use std::io::Write;
use std::sync::Mutex;

/// Serialises every event as one JSON object per line (log-out mode).
pub struct JsonLineSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLineSink<W> {
    fn emit(&self, event: RunEvent) {
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
            let _ = writer.flush();
        }
    }
}

/// Renders events as plain lines for interactive use.
pub struct HumanSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> HumanSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> EventSink for HumanSink<W> {
    fn emit(&self, event: RunEvent) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };

        let _ = match event.kind {
            EventKind::Done => writeln!(
                writer,
                "[{}] done: {} records in {}ms",
                event.machine_name,
                event.count.unwrap_or(0),
                event.duration_ms.unwrap_or(0)
            ),
            _ => {
                let prefix = match event.level {
                    EventLevel::Error => "error: ",
                    EventLevel::Warn => "warning: ",
                    _ => "",
                };
                writeln!(writer, "[{}] {}{}", event.machine_name, prefix, event.msg)
            }
        };
        let _ = writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_one_object_per_event() {
        let sink = JsonLineSink::new(Vec::new());
        sink.emit(RunEvent::status("people", "row"));
        sink.emit(RunEvent::done("people", 2, 0));

        let output = String::from_utf8(sink.writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""type":"MigrationStatus""#));
        assert!(lines[1].contains(r#""type":"Done""#));
        assert!(lines[1].contains(r#""count":2"#));
    }

    #[test]
    fn human_lines_show_machine_name_and_counts() {
        let sink = HumanSink::new(Vec::new());
        sink.emit(RunEvent::error("people", "boom"));
        sink.emit(RunEvent::done("people", 3, 12));

        let output = String::from_utf8(sink.writer.into_inner().unwrap()).unwrap();
        assert_eq!(
            output,
            "[people] error: boom\n[people] done: 3 records in 12ms\n"
        );
    }
}
