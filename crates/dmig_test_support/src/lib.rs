//! Fakes and fixtures shared by the workspace's tests.

mod fake_driver;
mod fixtures;

pub use fake_driver::{RecordingSink, ScriptedSource, SinkLog, WriteCall};
pub use fixtures::{
    collector_database, csv_database, csv_file, migration, project_named, record, scripted_database,
};
