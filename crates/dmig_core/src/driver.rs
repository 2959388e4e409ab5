use crate::{ConfigMap, CoreError, Record};
use std::any::Any;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

/// How many records a source producer may run ahead of the consumer.
///
/// One slot gives rendezvous-with-slack semantics: the producer blocks as
/// soon as the runner falls behind, so an aborted run stops pulling from the
/// backing store almost immediately.
pub const STREAM_BUFFER: usize = 1;

/// Estimated size of a source stream, used by progress consumers.
/// `known = false` permits indefinite streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceEstimate {
    pub known: bool,
    pub count: u64,
}

impl SourceEstimate {
    pub fn unknown() -> Self {
        Self {
            known: false,
            count: 0,
        }
    }

    pub fn exactly(count: u64) -> Self {
        Self { known: true, count }
    }
}

/// Uniform contract for pluggable stores.
///
/// A driver is created by the registry, `configure`d once with its opaque
/// configuration, `init`ed at the start of every run it participates in,
/// and then used as a producer (`stream_out`), a consumer (`write_in` +
/// `done`), or both. Implementations must not panic the runner: stream
/// errors travel as `Err` items and close the stream.
pub trait Driver: Send {
    /// Accept and validate the opaque configuration, acquiring any backing
    /// resources (connections, pools, file handles).
    fn configure(&mut self, config: &ConfigMap) -> Result<(), CoreError>;

    /// Reset per-run state. Called at the start of each run, including for
    /// cached instances.
    fn init(&mut self) {}

    /// Producer side: a finite, forward-only, non-restartable stream of
    /// records. Closing the stream signals end of input.
    fn stream_out(&mut self, query: &str, args: &[String]) -> Result<RecordStream, CoreError>;

    /// Consumer side: accept a rendered query plus the record and args.
    /// May buffer internally, but must flush by `done`.
    fn write_in(&mut self, query: &str, args: &[String], record: &Record) -> Result<(), CoreError>;

    /// Terminal flush for consumers; no `write_in` may follow.
    fn done(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Optional progress hint for the producer side.
    fn expected_out(&mut self) -> Result<SourceEstimate, CoreError> {
        Ok(SourceEstimate::unknown())
    }

    /// Whether `stream_out` meaningfully uses its query string.
    fn has_out_query(&self) -> bool;

    /// Whether `write_in` meaningfully uses its query string.
    fn has_in_query(&self) -> bool;

    /// Whether the store supports a count query for progress estimation.
    fn has_count_query(&self) -> bool;

    /// Concrete-type escape hatch; the runner uses it to pick up collector
    /// output from recursive runs.
    fn as_any(&self) -> &dyn Any;
}

impl std::fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Driver")
    }
}

enum StreamInner {
    Ready(VecDeque<Record>),
    Channel(Receiver<Result<Record, CoreError>>),
}

/// A lazy, forward-only sequence of records.
///
/// Channel-backed streams are fed by a producer thread through a bounded
/// channel (`STREAM_BUFFER` slots); dropping the stream detaches the
/// producer, whose next send fails and ends it.
pub struct RecordStream {
    inner: StreamInner,
}

impl RecordStream {
    /// An already-materialised stream (argset, collector replay).
    pub fn from_records(records: Vec<Record>) -> Self {
        Self {
            inner: StreamInner::Ready(records.into()),
        }
    }

    /// A bounded producer/consumer pair. The producer half is moved into
    /// the driver's reader thread.
    pub fn bounded() -> (StreamProducer, RecordStream) {
        let (tx, rx) = sync_channel(STREAM_BUFFER);
        (
            StreamProducer { tx },
            Self {
                inner: StreamInner::Channel(rx),
            },
        )
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            StreamInner::Ready(records) => records.pop_front().map(Ok),
            StreamInner::Channel(rx) => rx.recv().ok(),
        }
    }
}

/// Sending half of a bounded record stream.
pub struct StreamProducer {
    tx: SyncSender<Result<Record, CoreError>>,
}

impl StreamProducer {
    /// Send one record. Returns `false` when the consumer has gone away,
    /// which producers treat as end of interest.
    pub fn send(&self, record: Record) -> bool {
        self.tx.send(Ok(record)).is_ok()
    }

    /// Report a mid-stream failure. The consumer sees the error as the
    /// final item; the producer should return afterwards.
    pub fn fail(&self, err: CoreError) {
        // Best effort: if the consumer is gone there is nobody to tell.
        match self.tx.try_send(Err(err)) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(item)) => {
                let _ = self.tx.send(item);
            }
        }
    }
}

/// Factory function producing a fresh, unconfigured driver.
pub type DriverFactory = Box<dyn Fn() -> Box<dyn Driver> + Send + Sync>;

/// Driver name to factory map.
///
/// Built once at startup by the embedding application and shared read-only
/// from then on; the runner only ever calls `create`.
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Driver> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiate a new driver by name.
    pub fn create(&self, name: &str) -> Result<Box<dyn Driver>, CoreError> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(CoreError::UnknownDriver(name.to_string())),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
