use crate::{ConfigMap, CoreError, Driver, Record, RecordStream};
use std::any::Any;

/// Pass-through sink that logs every call instead of writing anywhere.
/// The destination of choice under `--dry-run` wiring and in smoke tests.
#[derive(Default)]
pub struct DebugDriver {
    writes: u64,
}

impl DebugDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl Driver for DebugDriver {
    fn configure(&mut self, _config: &ConfigMap) -> Result<(), CoreError> {
        Ok(())
    }

    fn init(&mut self) {
        self.writes = 0;
    }

    fn stream_out(&mut self, query: &str, _args: &[String]) -> Result<RecordStream, CoreError> {
        log::info!("[debug driver] out: {}", query);
        Ok(RecordStream::from_records(Vec::new()))
    }

    fn write_in(&mut self, query: &str, args: &[String], record: &Record) -> Result<(), CoreError> {
        self.writes += 1;
        log::info!(
            "[debug driver] in #{}: query={} args={:?} columns={}",
            self.writes,
            query,
            args,
            record.len()
        );
        Ok(())
    }

    fn done(&mut self) -> Result<(), CoreError> {
        log::info!("[debug driver] done after {} writes", self.writes);
        Ok(())
    }

    fn has_out_query(&self) -> bool {
        true
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
