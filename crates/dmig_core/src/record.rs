use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One unit of data flowing through a migration: a column-name to value
/// mapping. Insertion order is irrelevant; iteration is deterministic
/// (sorted by column name), which keeps rendered queries and event streams
/// byte-stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A record paired with the positional args that accompanied it into a
/// destination driver; the unit the collector driver stores and replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultCollectionItem {
    pub record: Record,
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_and_replace() {
        let mut record = Record::new();
        record.set("id", "1");
        record.set("name", "Alice");
        assert_eq!(record.get("id").and_then(Value::as_str), Some("1"));

        record.set("id", 2i64);
        assert_eq!(record.get("id").and_then(|v| v.as_i64()), Some(2));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn iteration_is_sorted_by_column() {
        let mut record = Record::new();
        record.set("zeta", "z");
        record.set("alpha", "a");
        let columns: Vec<&str> = record.columns().collect();
        assert_eq!(columns, vec!["alpha", "zeta"]);
    }

    #[test]
    fn serialises_as_plain_map() {
        let mut record = Record::new();
        record.set("id", "1");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"id":"1"}"#);
    }
}
