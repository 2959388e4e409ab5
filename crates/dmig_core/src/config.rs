use crate::{CoreError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque driver configuration: a string-keyed tree of dynamically typed
/// values, as parsed from the project file. Drivers pull what they need
/// through the typed accessors inside `configure`, so a bad project file
/// fails at setup rather than mid-stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap(BTreeMap<String, Value>);

impl ConfigMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Required string value.
    pub fn require_str(&self, key: &str) -> Result<&str, CoreError> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| CoreError::BadConfigType {
            key: key.to_string(),
            expected: "text",
            actual: value.type_name(),
        })
    }

    /// Required integer, accepting quoted digits.
    pub fn require_i64(&self, key: &str) -> Result<i64, CoreError> {
        let value = self.require(key)?;
        value.as_i64().ok_or_else(|| CoreError::BadConfigType {
            key: key.to_string(),
            expected: "int",
            actual: value.type_name(),
        })
    }

    pub fn require_u16(&self, key: &str) -> Result<u16, CoreError> {
        let n = self.require_i64(key)?;
        u16::try_from(n).map_err(|_| CoreError::BadConfigType {
            key: key.to_string(),
            expected: "port number",
            actual: "int",
        })
    }

    /// Required list of strings.
    pub fn require_str_list(&self, key: &str) -> Result<Vec<String>, CoreError> {
        let value = self.require(key)?;
        let items = value.as_list().ok_or_else(|| CoreError::BadConfigType {
            key: key.to_string(),
            expected: "list",
            actual: value.type_name(),
        })?;

        items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    CoreError::BadConfigType {
                        key: key.to_string(),
                        expected: "list of text",
                        actual: item.type_name(),
                    }
                })
            })
            .collect()
    }

    /// Optional nested mapping (e.g. a `credentials` block).
    pub fn get_map(&self, key: &str) -> Result<Option<&BTreeMap<String, Value>>, CoreError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_map()
                .map(Some)
                .ok_or_else(|| CoreError::BadConfigType {
                    key: key.to_string(),
                    expected: "map",
                    actual: value.type_name(),
                }),
        }
    }

    fn require(&self, key: &str) -> Result<&Value, CoreError> {
        self.0.get(key).ok_or_else(|| CoreError::missing_key(key))
    }
}

impl FromIterator<(String, Value)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
