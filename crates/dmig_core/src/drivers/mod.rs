//! Built-in in-memory drivers: adapters that need no external store.

mod argset;
mod collector;
mod debug;

pub use argset::ArgsetDriver;
pub use collector::{CollectorDriver, CollectorStore};
pub use debug::DebugDriver;
