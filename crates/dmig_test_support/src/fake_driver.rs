use dmig_core::{ConfigMap, CoreError, Driver, Record, RecordStream, SourceEstimate};
use std::any::Any;
use std::sync::{Arc, Mutex};

/// A source driver that replays a fixed list of records.
///
/// Registered through a factory closure capturing the records, so tests
/// control exactly what a migration sees without touching a real store.
pub struct ScriptedSource {
    records: Vec<Record>,
    /// When set, the stream fails after this many records.
    fail_after: Option<usize>,
}

impl ScriptedSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            fail_after: None,
        }
    }

    pub fn failing_after(records: Vec<Record>, good: usize) -> Self {
        Self {
            records,
            fail_after: Some(good),
        }
    }
}

impl Driver for ScriptedSource {
    fn configure(&mut self, _config: &ConfigMap) -> Result<(), CoreError> {
        Ok(())
    }

    fn stream_out(&mut self, _query: &str, _args: &[String]) -> Result<RecordStream, CoreError> {
        match self.fail_after {
            None => Ok(RecordStream::from_records(self.records.clone())),
            Some(good) => {
                let records: Vec<Record> = self.records.iter().take(good).cloned().collect();
                let (producer, stream) = RecordStream::bounded();
                std::thread::spawn(move || {
                    for record in records {
                        if !producer.send(record) {
                            return;
                        }
                    }
                    producer.fail(CoreError::source_read("scripted failure"));
                });
                Ok(stream)
            }
        }
    }

    fn write_in(
        &mut self,
        _query: &str,
        _args: &[String],
        _record: &Record,
    ) -> Result<(), CoreError> {
        Err(CoreError::not_supported("scripted source is read-only"))
    }

    fn expected_out(&mut self) -> Result<SourceEstimate, CoreError> {
        Ok(SourceEstimate::exactly(self.records.len() as u64))
    }

    fn has_out_query(&self) -> bool {
        false
    }

    fn has_in_query(&self) -> bool {
        false
    }

    fn has_count_query(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One accepted `write_in` call.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub query: String,
    pub args: Vec<String>,
    pub record: Record,
}

/// Shared view into what a [`RecordingSink`] accepted.
#[derive(Clone, Default)]
pub struct SinkLog {
    inner: Arc<Mutex<SinkLogInner>>,
}

#[derive(Default)]
struct SinkLogInner {
    writes: Vec<WriteCall>,
    done_calls: usize,
    init_calls: usize,
}

impl SinkLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes.len()
    }

    pub fn done_calls(&self) -> usize {
        self.inner.lock().unwrap().done_calls
    }

    pub fn init_calls(&self) -> usize {
        self.inner.lock().unwrap().init_calls
    }
}

/// A destination driver that records every call for later assertions.
pub struct RecordingSink {
    log: SinkLog,
    /// When set, every `write_in` fails with this message.
    fail_writes: Option<String>,
}

impl RecordingSink {
    pub fn new(log: SinkLog) -> Self {
        Self {
            log,
            fail_writes: None,
        }
    }

    pub fn failing(log: SinkLog, message: impl Into<String>) -> Self {
        Self {
            log,
            fail_writes: Some(message.into()),
        }
    }
}

impl Driver for RecordingSink {
    fn configure(&mut self, _config: &ConfigMap) -> Result<(), CoreError> {
        Ok(())
    }

    fn init(&mut self) {
        self.log.inner.lock().unwrap().init_calls += 1;
    }

    fn stream_out(&mut self, _query: &str, _args: &[String]) -> Result<RecordStream, CoreError> {
        Err(CoreError::not_supported("recording sink is write-only"))
    }

    fn write_in(&mut self, query: &str, args: &[String], record: &Record) -> Result<(), CoreError> {
        if let Some(message) = &self.fail_writes {
            return Err(CoreError::destination_write(message.clone()));
        }

        self.log.inner.lock().unwrap().writes.push(WriteCall {
            query: query.to_string(),
            args: args.to_vec(),
            record: record.clone(),
        });
        Ok(())
    }

    fn done(&mut self) -> Result<(), CoreError> {
        self.log.inner.lock().unwrap().done_calls += 1;
        Ok(())
    }

    fn has_out_query(&self) -> bool {
        false
    }

    fn has_in_query(&self) -> bool {
        true
    }

    fn has_count_query(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
