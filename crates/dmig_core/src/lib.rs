mod config;
mod driver;
mod error;
mod event;
mod project;
mod record;
mod value;

pub mod drivers;

pub use config::ConfigMap;
pub use driver::{
    Driver, DriverFactory, DriverRegistry, RecordStream, STREAM_BUFFER, SourceEstimate,
    StreamProducer,
};
pub use error::CoreError;
pub use event::{
    ChannelSink, EventKind, EventLevel, EventSink, LogSink, MemorySink, NullSink, RunEvent,
};
pub use project::{
    Component, Database, Endpoint, Migration, Project, Tunnel, TunnelAuth, valid_machine_name,
};
pub use record::{Record, ResultCollectionItem};
pub use value::Value;

pub use chrono;
