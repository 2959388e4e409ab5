use dmig_core::chrono::{TimeZone, Utc};
use dmig_core::{ConfigMap, CoreError, Driver, Record, RecordStream, Value};
use scylla::frame::response::result::CqlValue;
use scylla::query::Query;
use scylla::retry_policy::DefaultRetryPolicy;
use scylla::statement::Consistency;
use scylla::transport::Compression;
use scylla::{ExecutionProfile, Session, SessionBuilder};
use std::any::Any;
use std::sync::Arc;
use std::thread;
use tokio::runtime::{Handle, Runtime};

/// Consistency levels this driver accepts in its configuration.
const CONSISTENCY_NAMES: &str = "Any, One, LocalOne, LocalQuorum, Quorum, All";

/// Map a configured consistency name onto the wire enum.
pub fn consistency_from_name(name: &str) -> Option<Consistency> {
    match name {
        "Any" => Some(Consistency::Any),
        "One" => Some(Consistency::One),
        "LocalOne" => Some(Consistency::LocalOne),
        "LocalQuorum" => Some(Consistency::LocalQuorum),
        "Quorum" => Some(Consistency::Quorum),
        "All" => Some(Consistency::All),
        _ => None,
    }
}

/// Cassandra/CQL driver.
///
/// The cluster session is token-aware, compresses frames with LZ4, retries
/// through the driver's default policy, and pins the configured consistency
/// level. The async client lives behind a driver-owned runtime so the
/// pipeline stays synchronous.
#[derive(Default)]
pub struct CassandraDriver {
    state: Option<CassandraState>,
}

struct CassandraState {
    runtime: Runtime,
    session: Arc<Session>,
    consistency: Consistency,
}

#[derive(Debug)]
struct CassandraConfig {
    nodes: Vec<String>,
    keyspace: String,
    consistency: Consistency,
    credentials: Option<(String, String)>,
}

fn extract_config(config: &ConfigMap) -> Result<CassandraConfig, CoreError> {
    let nodes: Vec<String> = config
        .require_str("clusterList")?
        .split(',')
        .map(|node| node.trim().to_string())
        .filter(|node| !node.is_empty())
        .collect();
    if nodes.is_empty() {
        return Err(CoreError::missing_key("clusterList"));
    }

    let consistency_name = config.require_str("consistency")?;
    let consistency =
        consistency_from_name(consistency_name).ok_or_else(|| CoreError::BadConfigType {
            key: "consistency".to_string(),
            expected: CONSISTENCY_NAMES,
            actual: "text",
        })?;

    let credentials = match config.get_map("credentials")? {
        Some(block) => {
            let username = block
                .get("username")
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::missing_key("credentials.username"))?;
            let password = block
                .get("password")
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::missing_key("credentials.password"))?;
            Some((username.to_string(), password.to_string()))
        }
        None => None,
    };

    Ok(CassandraConfig {
        nodes,
        keyspace: config.require_str("keyspace")?.to_string(),
        consistency,
        credentials,
    })
}

/// Convert one CQL cell to the pipeline value type, keeping native typing
/// where the pipeline has a counterpart.
fn cql_to_value(value: &CqlValue) -> Value {
    match value {
        CqlValue::Empty => Value::Null,
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::Text(s.clone()),
        CqlValue::Boolean(b) => Value::Bool(*b),
        CqlValue::TinyInt(i) => Value::Int(*i as i64),
        CqlValue::SmallInt(i) => Value::Int(*i as i64),
        CqlValue::Int(i) => Value::Int(*i as i64),
        CqlValue::BigInt(i) => Value::Int(*i),
        CqlValue::Counter(c) => Value::Int(c.0),
        CqlValue::Float(f) => Value::Float(*f as f64),
        CqlValue::Double(d) => Value::Float(*d),
        CqlValue::Blob(bytes) => Value::Bytes(bytes.clone()),
        CqlValue::Uuid(u) => Value::Text(u.to_string()),
        CqlValue::Timeuuid(u) => Value::Text(u.to_string()),
        CqlValue::Inet(addr) => Value::Text(addr.to_string()),
        CqlValue::Timestamp(ts) => match Utc.timestamp_millis_opt(ts.0).single() {
            Some(dt) => Value::DateTime(dt),
            None => Value::Text(ts.0.to_string()),
        },
        CqlValue::List(items) | CqlValue::Set(items) => {
            Value::List(items.iter().map(cql_to_value).collect())
        }
        CqlValue::Tuple(items) => Value::List(
            items
                .iter()
                .map(|item| item.as_ref().map(cql_to_value).unwrap_or(Value::Null))
                .collect(),
        ),
        CqlValue::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (cql_to_value(k).to_display_string(), cql_to_value(v)))
                .collect(),
        ),
        other => Value::Text(format!("{:?}", other)),
    }
}

impl CassandraDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<&CassandraState, CoreError> {
        self.state.as_ref().ok_or(CoreError::NotConfigured("cassandra"))
    }

    fn statement(&self, query: &str) -> Result<Query, CoreError> {
        let mut statement = Query::new(query.to_string());
        statement.set_consistency(self.state()?.consistency);
        Ok(statement)
    }
}

impl Driver for CassandraDriver {
    fn configure(&mut self, config: &ConfigMap) -> Result<(), CoreError> {
        let cfg = extract_config(config)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| CoreError::connect(e.to_string()))?;

        log::debug!(
            "cassandra driver connecting to {:?} keyspace {}",
            cfg.nodes,
            cfg.keyspace
        );

        let profile = ExecutionProfile::builder()
            .consistency(cfg.consistency)
            .retry_policy(Box::new(DefaultRetryPolicy::new()))
            .build();

        let session = runtime.block_on(async {
            let mut builder = SessionBuilder::new()
                .known_nodes(&cfg.nodes)
                .compression(Some(Compression::Lz4))
                .default_execution_profile_handle(profile.into_handle())
                .use_keyspace(&cfg.keyspace, false);

            if let Some((username, password)) = &cfg.credentials {
                builder = builder.user(username, password);
            }

            builder.build().await
        });

        let session = session.map_err(|e| CoreError::connect(e.to_string()))?;

        self.state = Some(CassandraState {
            runtime,
            session: Arc::new(session),
            consistency: cfg.consistency,
        });
        Ok(())
    }

    fn stream_out(&mut self, query: &str, args: &[String]) -> Result<RecordStream, CoreError> {
        let statement = self.statement(query)?;
        let state = self.state()?;
        let session = state.session.clone();
        let handle: Handle = state.runtime.handle().clone();
        let args: Vec<String> = args.to_vec();

        let (producer, stream) = RecordStream::bounded();

        thread::spawn(move || {
            let result = handle.block_on(session.query(statement, args.as_slice()));

            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    producer.fail(CoreError::source_read(e.to_string()));
                    return;
                }
            };

            let columns: Vec<String> = result
                .col_specs
                .iter()
                .map(|spec| spec.name.clone())
                .collect();

            for row in result.rows.unwrap_or_default() {
                let mut record = Record::new();
                for (column, cell) in columns.iter().zip(row.columns.iter()) {
                    let value = cell.as_ref().map(cql_to_value).unwrap_or(Value::Null);
                    record.set(column.clone(), value);
                }

                if !producer.send(record) {
                    log::debug!("cassandra row stream detached early");
                    return;
                }
            }
        });

        Ok(stream)
    }

    fn write_in(&mut self, query: &str, args: &[String], _record: &Record) -> Result<(), CoreError> {
        let statement = self.statement(query)?;
        let state = self.state()?;
        let session = state.session.clone();

        state
            .runtime
            .block_on(session.query(statement, args))
            .map(|_| ())
            .map_err(|e| CoreError::destination_write(e.to_string()))
    }

    fn has_out_query(&self) -> bool {
        true
    }

    fn has_in_query(&self) -> bool {
        true
    }

    fn has_count_query(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scylla::frame::value::{Counter, CqlTimestamp};

    #[test]
    fn consistency_lookup_covers_the_supported_levels() {
        for name in ["Any", "One", "LocalOne", "LocalQuorum", "Quorum", "All"] {
            assert!(consistency_from_name(name).is_some(), "{name}");
        }
        assert!(consistency_from_name("EachQuorum").is_none());
        assert!(consistency_from_name("quorum").is_none());
    }

    fn base_config() -> ConfigMap {
        let mut config = ConfigMap::new();
        config.insert("clusterList", "n1.example.com, n2.example.com");
        config.insert("keyspace", "migrations");
        config.insert("consistency", "LocalQuorum");
        config
    }

    #[test]
    fn cluster_list_splits_and_trims() {
        let cfg = extract_config(&base_config()).unwrap();
        assert_eq!(cfg.nodes, vec!["n1.example.com", "n2.example.com"]);
        assert_eq!(cfg.keyspace, "migrations");
        assert_eq!(cfg.consistency, Consistency::LocalQuorum);
        assert!(cfg.credentials.is_none());
    }

    #[test]
    fn unknown_consistency_is_rejected() {
        let mut config = base_config();
        config.insert("consistency", "Eventually");
        let err = extract_config(&config).unwrap_err();
        assert!(matches!(err, CoreError::BadConfigType { key, .. } if key == "consistency"));
    }

    #[test]
    fn credentials_require_both_halves() {
        let mut config = base_config();
        config.insert(
            "credentials",
            Value::Map(
                [("username".to_string(), Value::from("cass"))]
                    .into_iter()
                    .collect(),
            ),
        );
        let err = extract_config(&config).unwrap_err();
        assert!(
            matches!(err, CoreError::MissingConfigKey { key } if key == "credentials.password")
        );
    }

    #[test]
    fn cql_cells_keep_native_types() {
        assert_eq!(cql_to_value(&CqlValue::Boolean(true)), Value::Bool(true));
        assert_eq!(cql_to_value(&CqlValue::BigInt(9)), Value::Int(9));
        assert_eq!(cql_to_value(&CqlValue::Counter(Counter(3))), Value::Int(3));
        assert_eq!(
            cql_to_value(&CqlValue::Text("cql".into())),
            Value::Text("cql".into())
        );
        assert_eq!(
            cql_to_value(&CqlValue::Blob(vec![1, 2, 3])),
            Value::Bytes(vec![1, 2, 3])
        );

        match cql_to_value(&CqlValue::Timestamp(CqlTimestamp(0))) {
            Value::DateTime(dt) => assert_eq!(dt.timestamp(), 0),
            other => panic!("expected datetime, got {other:?}"),
        }
    }

    #[test]
    fn collections_map_to_lists_and_maps() {
        let list = CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]);
        assert_eq!(
            cql_to_value(&list),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );

        let map = CqlValue::Map(vec![(CqlValue::Text("k".into()), CqlValue::Int(7))]);
        let converted = cql_to_value(&map);
        assert_eq!(converted.as_map().unwrap()["k"], Value::Int(7));
    }
}
