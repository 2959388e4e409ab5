mod driver;

pub use driver::CsvDriver;
