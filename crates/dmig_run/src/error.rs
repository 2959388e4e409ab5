use dmig_core::CoreError;
use dmig_lua::ScriptError;
use dmig_ssh::TunnelError;
use thiserror::Error;

/// Everything that can end a migration run.
///
/// Setup and streaming errors are fatal for the current migration: the
/// runner emits a `MigrationError` event, stops the loop, and returns the
/// error. Partial destination writes are not rolled back.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no migration found for {0}")]
    MigrationNotFound(String),

    #[error("no source database found for {0}")]
    SourceDbNotFound(String),

    #[error("no destination database found for {0}")]
    DestinationDbNotFound(String),

    #[error("no tunnel found for {0}")]
    TunnelNotFound(String),

    #[error("tunnel setup failed: {0}")]
    TunnelSetup(#[from] TunnelError),

    #[error("expecting {expected} args and got {got}")]
    ArgCountMismatch { expected: usize, got: usize },

    #[error("destination query template failed to parse: {0}")]
    TemplateParse(#[source] minijinja::Error),

    #[error("destination query render failed: {0}")]
    TemplateRender(#[source] minijinja::Error),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Driver(#[from] CoreError),

    /// A migration re-entered itself through script `run()` recursion.
    #[error("migration {0} is already running; recursive invocation refused")]
    RecursiveMigration(String),

    #[error("run recursion exceeded {max} levels")]
    DepthExceeded { max: usize },

    #[error("run cancelled")]
    Cancelled,
}
