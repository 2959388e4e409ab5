use crate::{ConfigMap, CoreError, Driver, Record, RecordStream};
use std::any::Any;

/// Turns the positional run-time args into a single record by zipping them
/// against the configured argument names. Used to seed a migration whose
/// real work happens in the transformation script.
#[derive(Default)]
pub struct ArgsetDriver {
    names: Option<Vec<String>>,
}

impl ArgsetDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for ArgsetDriver {
    fn configure(&mut self, config: &ConfigMap) -> Result<(), CoreError> {
        self.names = Some(config.require_str_list("args")?);
        Ok(())
    }

    fn stream_out(&mut self, _query: &str, args: &[String]) -> Result<RecordStream, CoreError> {
        let names = self
            .names
            .as_ref()
            .ok_or(CoreError::NotConfigured("argset"))?;

        let mut record = Record::new();
        for (name, arg) in names.iter().zip(args) {
            record.set(name.clone(), arg.clone());
        }

        Ok(RecordStream::from_records(vec![record]))
    }

    fn write_in(
        &mut self,
        _query: &str,
        _args: &[String],
        _record: &Record,
    ) -> Result<(), CoreError> {
        Err(CoreError::not_supported("argset is a source-only driver"))
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
    use crate::Value;

    fn configured(names: &[&str]) -> ArgsetDriver {
        let mut config = ConfigMap::new();
        config.insert(
            "args",
            Value::List(names.iter().map(|n| Value::from(*n)).collect()),
        );
        let mut driver = ArgsetDriver::new();
        driver.configure(&config).unwrap();
        driver
    }

    #[test]
    fn zips_names_against_args() {
        let mut driver = configured(&["days", "limit"]);
        let args = vec!["30".to_string(), "100".to_string()];

        let records: Vec<Record> = driver
            .stream_out("", &args)
            .unwrap()
            .map(Result::unwrap)
            .collect();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("days").and_then(Value::as_str), Some("30"));
        assert_eq!(records[0].get("limit").and_then(Value::as_str), Some("100"));
    }

    #[test]
    fn surplus_args_are_ignored() {
        let mut driver = configured(&["only"]);
        let args = vec!["a".to_string(), "b".to_string()];

        let records: Vec<Record> = driver
            .stream_out("", &args)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(records[0].len(), 1);
    }

    #[test]
    fn unconfigured_out_fails() {
        let mut driver = ArgsetDriver::new();
        assert!(driver.stream_out("", &[]).is_err());
    }

    #[test]
    fn write_is_unsupported() {
        let mut driver = configured(&["x"]);
        let err = driver.write_in("", &[], &Record::new()).unwrap_err();
        assert!(matches!(err, CoreError::NotSupported(_)));
    }

    #[test]
    fn missing_args_key_is_a_config_error() {
        let mut driver = ArgsetDriver::new();
        let err = driver.configure(&ConfigMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::MissingConfigKey { key } if key == "args"));
    }
}
