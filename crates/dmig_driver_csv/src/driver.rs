use dmig_core::{ConfigMap, CoreError, Driver, Record, RecordStream};
use std::any::Any;
use std::fs::File;
use std::path::PathBuf;
use std::thread;

/// Streaming CSV source.
///
/// The first line of the file establishes the column names; each following
/// row becomes one text-valued record. The query string and args are
/// ignored. Reading happens on a producer thread so the file is consumed at
/// the pipeline's pace.
#[derive(Default)]
pub struct CsvDriver {
    file_path: Option<PathBuf>,
}

impl CsvDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for CsvDriver {
    fn configure(&mut self, config: &ConfigMap) -> Result<(), CoreError> {
        self.file_path = Some(PathBuf::from(config.require_str("filePath")?));
        Ok(())
    }

    fn stream_out(&mut self, _query: &str, _args: &[String]) -> Result<RecordStream, CoreError> {
        let path = self
            .file_path
            .clone()
            .ok_or(CoreError::NotConfigured("csv"))?;

        let file = File::open(&path)?;
        let mut reader = csv::Reader::from_reader(file);
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| CoreError::source_read(format!("{}: bad header: {}", path.display(), e)))?
            .iter()
            .map(str::to_string)
            .collect();

        let (producer, stream) = RecordStream::bounded();

        thread::spawn(move || {
            for row in reader.records() {
                let row = match row {
                    Ok(row) => row,
                    Err(e) => {
                        producer.fail(CoreError::source_read(format!(
                            "{}: {}",
                            path.display(),
                            e
                        )));
                        return;
                    }
                };

                let record: Record = headers
                    .iter()
                    .zip(row.iter())
                    .map(|(column, cell)| (column.clone(), cell.into()))
                    .collect();

                if !producer.send(record) {
                    log::debug!("csv reader for {} detached early", path.display());
                    return;
                }
            }
        });

        Ok(stream)
    }

    fn write_in(
        &mut self,
        _query: &str,
        _args: &[String],
        _record: &Record,
    ) -> Result<(), CoreError> {
        Err(CoreError::not_supported("CSV write is not implemented"))
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

#[cfg(test)]
mod tests {
    use super::*;
    use dmig_core::Value;
    use std::io::Write;

    fn csv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn configured(path: &std::path::Path) -> CsvDriver {
        let mut config = ConfigMap::new();
        config.insert("filePath", path.to_string_lossy().to_string());
        let mut driver = CsvDriver::new();
        driver.configure(&config).unwrap();
        driver
    }

    #[test]
    fn streams_rows_keyed_by_header() {
        let file = csv_file("id,name\n1,Alice\n2,Bob\n");
        let mut driver = configured(file.path());

        let records: Vec<Record> = driver
            .stream_out("", &[])
            .unwrap()
            .map(Result::unwrap)
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("id").and_then(Value::as_str), Some("1"));
        assert_eq!(records[0].get("name").and_then(Value::as_str), Some("Alice"));
        assert_eq!(records[1].get("name").and_then(Value::as_str), Some("Bob"));
    }

    #[test]
    fn quoted_cells_keep_commas() {
        let file = csv_file("id,note\n1,\"hello, world\"\n");
        let mut driver = configured(file.path());

        let records: Vec<Record> = driver
            .stream_out("", &[])
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            records[0].get("note").and_then(Value::as_str),
            Some("hello, world")
        );
    }

    #[test]
    fn header_only_file_is_an_empty_stream() {
        let file = csv_file("id,name\n");
        let mut driver = configured(file.path());
        assert_eq!(driver.stream_out("", &[]).unwrap().count(), 0);
    }

    #[test]
    fn missing_file_fails_at_stream_open() {
        let mut config = ConfigMap::new();
        config.insert("filePath", "/nonexistent/people.csv");
        let mut driver = CsvDriver::new();
        driver.configure(&config).unwrap();

        assert!(driver.stream_out("", &[]).is_err());
    }

    #[test]
    fn ragged_row_surfaces_as_stream_error() {
        let file = csv_file("id,name\n1,Alice\n2\n");
        let mut driver = configured(file.path());

        let items: Vec<Result<Record, CoreError>> =
            driver.stream_out("", &[]).unwrap().collect();
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(CoreError::SourceRead(_))));
    }

    #[test]
    fn write_is_not_implemented() {
        let file = csv_file("id\n");
        let mut driver = configured(file.path());
        let err = driver.write_in("", &[], &Record::new()).unwrap_err();
        assert!(matches!(err, CoreError::NotSupported(_)));
    }

    #[test]
    fn missing_file_path_key_fails_configure() {
        let mut driver = CsvDriver::new();
        let err = driver.configure(&ConfigMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::MissingConfigKey { key } if key == "filePath"));
    }
}
