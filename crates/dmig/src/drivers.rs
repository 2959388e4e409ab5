use dmig_core::DriverRegistry;
use dmig_core::drivers::{ArgsetDriver, CollectorDriver, CollectorStore, DebugDriver};
use dmig_driver_cassandra::CassandraDriver;
use dmig_driver_csv::CsvDriver;
use dmig_driver_mysql::MysqlDriver;

/// The registry with every built-in driver. Built once at startup; the
/// collector store handle is shared into each collector instance.
pub fn builtin_registry(collectors: &CollectorStore) -> DriverRegistry {
    let mut registry = DriverRegistry::new();

    registry.register("csv", || Box::new(CsvDriver::new()));
    registry.register("mysql", || Box::new(MysqlDriver::new()));
    registry.register("cassandra", || Box::new(CassandraDriver::new()));
    registry.register("argset", || Box::new(ArgsetDriver::new()));
    registry.register("debug", || Box::new(DebugDriver::new()));

    let store = collectors.clone();
    registry.register("collector", move || {
        Box::new(CollectorDriver::new(store.clone()))
    });

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtin_drivers_register() {
        let registry = builtin_registry(&CollectorStore::new());
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec!["argset", "cassandra", "collector", "csv", "debug", "mysql"]
        );

        for name in names {
            assert!(registry.create(name).is_ok(), "{name}");
        }
    }
}
