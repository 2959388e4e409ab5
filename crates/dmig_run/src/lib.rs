//! The migration runner: pulls records from a source driver, pushes them
//! through the optional transformation script and the destination query
//! template, and hands the result to the destination driver.

mod error;
mod http;
mod runner;
mod template;

pub use error::RunError;
pub use http::{HttpPostError, HttpPoster};
pub use runner::{MAX_RUN_DEPTH, RunOptions, RunResult, Runner, SharedDriver};
pub use template::QueryTemplate;
