//! Embedded Lua host for per-record transformation scripts.
//!
//! One [`ScriptHost`] exists per migration invocation. Context-wide
//! bindings (`run`, `persistVal`, storage, uuid, output) are installed
//! once; the per-record bindings (`getRecord`, `sendRecord`, `sendArgs`,
//! `skip`, `finish`) are re-installed before every evaluation, and the
//! script source is evaluated anew for each record.
//!
//! Lua reserves the word `end`, so the binding that terminates a migration
//! is named `finish`.

mod convert;
mod host;

pub use convert::{lua_to_value, record_to_table, table_to_record, value_to_lua};
pub use host::{NoopHooks, RecordOutcome, ScriptHooks, ScriptHost, ScriptOutputLevel};

use thiserror::Error;

/// Script host failures. Evaluation errors are fatal for the migration.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script evaluation failed: {0}")]
    Eval(#[from] mlua::Error),

    #[error("script state poisoned")]
    Poisoned,
}
