mod driver;

pub use driver::{CassandraDriver, consistency_from_name};
