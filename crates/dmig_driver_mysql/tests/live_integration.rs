//! Live tests against a local MySQL server.
//!
//! Ignored by default; run with a server on 127.0.0.1:3306 that has a
//! `dmig_test` database and a `migrator`/`migrator` account:
//!
//! ```sh
//! cargo test -p dmig_driver_mysql -- --ignored
//! ```

use dmig_core::{ConfigMap, Driver, Record, Value};
use dmig_driver_mysql::MysqlDriver;

fn live_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("host", "127.0.0.1");
    config.insert("port", 3306i64);
    config.insert("databaseName", "dmig_test");
    config.insert("username", "migrator");
    config.insert(
        "credentials",
        Value::Map(
            [("password".to_string(), Value::from("migrator"))]
                .into_iter()
                .collect(),
        ),
    );
    config
}

fn connect() -> MysqlDriver {
    let mut driver = MysqlDriver::new();
    driver.configure(&live_config()).expect("configure+ping");
    driver
}

#[test]
#[ignore = "requires a local MySQL server"]
fn round_trip_through_a_scratch_table() {
    let mut driver = connect();

    driver
        .write_in(
            "CREATE TABLE IF NOT EXISTS dmig_people (id INT PRIMARY KEY, name VARCHAR(64))",
            &[],
            &Record::new(),
        )
        .unwrap();
    driver
        .write_in("DELETE FROM dmig_people", &[], &Record::new())
        .unwrap();

    driver
        .write_in(
            "INSERT INTO dmig_people (id, name) VALUES (?, ?)",
            &["1".to_string(), "Alice".to_string()],
            &Record::new(),
        )
        .unwrap();
    driver.done().unwrap();

    let records: Vec<Record> = driver
        .stream_out("SELECT id, name FROM dmig_people WHERE id = ?", &["1".to_string()])
        .unwrap()
        .map(Result::unwrap)
        .collect();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("id").and_then(Value::as_str), Some("1"));
    assert_eq!(records[0].get("name").and_then(Value::as_str), Some("Alice"));
}

#[test]
#[ignore = "requires a local MySQL server"]
fn bad_query_surfaces_as_stream_error() {
    let mut driver = connect();
    let items: Vec<_> = driver
        .stream_out("SELECT nope FROM not_a_table", &[])
        .unwrap()
        .collect();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_err());
}
