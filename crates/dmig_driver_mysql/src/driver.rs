use dmig_core::{ConfigMap, CoreError, Driver, Record, RecordStream, Value};
use mysql::prelude::Queryable;
use mysql::{Opts, OptsBuilder, Params, Pool};
use std::any::Any;
use std::thread;

/// Relational SQL driver over the MySQL wire protocol.
///
/// `configure` builds a connection pool and verifies it with a liveness
/// probe; `stream_out` runs the parameterised source query on a producer
/// thread and scans every row into a string-valued record keyed by column
/// name; `write_in` executes a parameterised statement with positional
/// args.
#[derive(Default)]
pub struct MysqlDriver {
    pool: Option<Pool>,
}

struct MysqlConfig {
    host: String,
    port: u16,
    database: String,
    username: String,
    password: Option<String>,
}

fn extract_config(config: &ConfigMap) -> Result<MysqlConfig, CoreError> {
    let password = match config.get_map("credentials")? {
        Some(credentials) => credentials
            .get("password")
            .and_then(Value::as_str)
            .map(str::to_string),
        None => None,
    };

    Ok(MysqlConfig {
        host: config.require_str("host")?.to_string(),
        port: config.require_u16("port")?,
        database: config.require_str("databaseName")?.to_string(),
        username: config.require_str("username")?.to_string(),
        password,
    })
}

fn positional_params(args: &[String]) -> Params {
    if args.is_empty() {
        return Params::Empty;
    }
    Params::Positional(args.iter().map(|arg| mysql::Value::from(arg.as_str())).collect())
}

/// Scan one wire value into its query-parameter text form. The record
/// contract for this driver is string-valued cells.
fn cell_to_value(value: &mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Bytes(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        mysql::Value::Int(i) => Value::Text(i.to_string()),
        mysql::Value::UInt(u) => Value::Text(u.to_string()),
        mysql::Value::Float(f) => Value::Text(f.to_string()),
        mysql::Value::Double(d) => Value::Text(d.to_string()),
        mysql::Value::Date(year, month, day, hour, min, sec, _micro) => Value::Text(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            year, month, day, hour, min, sec
        )),
        mysql::Value::Time(negative, _days, hours, minutes, seconds, _micro) => Value::Text(
            format!(
                "{}{:02}:{:02}:{:02}",
                if *negative { "-" } else { "" },
                hours,
                minutes,
                seconds
            ),
        ),
    }
}

impl MysqlDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self) -> Result<&Pool, CoreError> {
        self.pool.as_ref().ok_or(CoreError::NotConfigured("mysql"))
    }
}

impl Driver for MysqlDriver {
    fn configure(&mut self, config: &ConfigMap) -> Result<(), CoreError> {
        let cfg = extract_config(config)?;

        log::debug!(
            "mysql driver connecting to {}:{}/{}",
            cfg.host,
            cfg.port,
            cfg.database
        );

        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(cfg.host))
            .tcp_port(cfg.port)
            .db_name(Some(cfg.database))
            .user(Some(cfg.username))
            .pass(cfg.password)
            .into();

        let pool = Pool::new(opts).map_err(|e| CoreError::connect(e.to_string()))?;

        // Liveness probe: a pool constructs lazily, so fault the first
        // connection now rather than mid-stream.
        let mut conn = pool
            .get_conn()
            .map_err(|e| CoreError::connect(e.to_string()))?;
        conn.query_drop("SELECT 1")
            .map_err(|e| CoreError::connect(e.to_string()))?;

        self.pool = Some(pool);
        Ok(())
    }

    fn stream_out(&mut self, query: &str, args: &[String]) -> Result<RecordStream, CoreError> {
        let pool = self.pool()?.clone();
        let query = query.to_string();
        let params = positional_params(args);

        let (producer, stream) = RecordStream::bounded();

        thread::spawn(move || {
            let mut conn = match pool.get_conn() {
                Ok(conn) => conn,
                Err(e) => {
                    producer.fail(CoreError::source_read(e.to_string()));
                    return;
                }
            };

            let result = match conn.exec_iter(query.as_str(), params) {
                Ok(result) => result,
                Err(e) => {
                    producer.fail(CoreError::source_read(e.to_string()));
                    return;
                }
            };

            for row in result {
                let row = match row {
                    Ok(row) => row,
                    Err(e) => {
                        producer.fail(CoreError::source_read(e.to_string()));
                        return;
                    }
                };

                let columns = row.columns_ref();
                let mut record = Record::new();
                for (i, column) in columns.iter().enumerate() {
                    let cell = row
                        .as_ref(i)
                        .map(cell_to_value)
                        .unwrap_or(Value::Null);
                    record.set(column.name_str().into_owned(), cell);
                }

                if !producer.send(record) {
                    log::debug!("mysql row stream detached early");
                    return;
                }
            }
        });

        Ok(stream)
    }

    fn write_in(&mut self, query: &str, args: &[String], _record: &Record) -> Result<(), CoreError> {
        let pool = self.pool()?;
        let mut conn = pool
            .get_conn()
            .map_err(|e| CoreError::destination_write(e.to_string()))?;

        conn.exec_drop(query, positional_params(args))
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
