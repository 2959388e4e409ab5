use thiserror::Error;

/// Errors produced by drivers, configuration parsing, and the registry.
///
/// Every driver operation funnels into this type so the runner can treat
/// heterogeneous stores uniformly. Streaming errors carry the message only;
/// the runner attaches migration context when it emits events.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The registry has no factory under the requested driver name.
    #[error("no such driver: {0}")]
    UnknownDriver(String),

    /// A required configuration key is absent.
    #[error("missing config key {key}")]
    MissingConfigKey { key: String },

    /// A configuration key holds a value of the wrong type.
    #[error("config key {key} expects {expected}, got {actual}")]
    BadConfigType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// An operation was invoked before `configure` succeeded.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// The driver does not implement the requested operation.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Failed to reach or authenticate against the backing store.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The source stream failed mid-read.
    #[error("source read failed: {0}")]
    SourceRead(String),

    /// The destination rejected a write.
    #[error("destination write failed: {0}")]
    DestinationWrite(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingConfigKey { key: key.into() }
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    pub fn source_read(msg: impl Into<String>) -> Self {
        Self::SourceRead(msg.into())
    }

    pub fn destination_write(msg: impl Into<String>) -> Self {
        Self::DestinationWrite(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }
}
