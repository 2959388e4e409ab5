use dmig_core::{Component, ConfigMap, Database, Migration, Project, Record};
use std::io::Write;

pub fn record(pairs: &[(&str, &str)]) -> Record {
    let mut record = Record::new();
    for (column, value) in pairs {
        record.set(*column, *value);
    }
    record
}

pub fn project_named(machine_name: &str) -> Project {
    Project {
        component: Component::new("Project", machine_name),
        ..Project::default()
    }
}

pub fn migration(
    machine_name: &str,
    source_db: &str,
    destination_db: &str,
    destination_query: &str,
) -> Migration {
    Migration {
        component: Component::new("Migration", machine_name),
        source_db: source_db.to_string(),
        destination_db: destination_db.to_string(),
        destination_query: destination_query.to_string(),
        ..Migration::default()
    }
}

pub fn csv_database(machine_name: &str, file_path: &str) -> Database {
    let mut configuration = ConfigMap::new();
    configuration.insert("filePath", file_path);
    Database {
        component: Component::new("Database", machine_name),
        driver: "csv".to_string(),
        configuration,
        ..Database::default()
    }
}

pub fn collector_database(machine_name: &str, collection_key: &str) -> Database {
    let mut configuration = ConfigMap::new();
    configuration.insert("collectionKey", collection_key);
    Database {
        component: Component::new("Database", machine_name),
        driver: "collector".to_string(),
        configuration,
        ..Database::default()
    }
}

/// A database bound to whatever driver name the test registered.
pub fn scripted_database(machine_name: &str, driver: &str) -> Database {
    Database {
        component: Component::new("Database", machine_name),
        driver: driver.to_string(),
        ..Database::default()
    }
}

/// Write a CSV fixture into a temp file and return its handle.
pub fn csv_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp csv");
    file.write_all(contents.as_bytes()).expect("write csv");
    file.flush().expect("flush csv");
    file
}
