mod driver;

pub use driver::MysqlDriver;
