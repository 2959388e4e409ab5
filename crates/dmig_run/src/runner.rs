use crate::{HttpPoster, QueryTemplate, RunError};
use dmig_core::chrono::{DateTime, Utc};
use dmig_core::drivers::CollectorDriver;
use dmig_core::{
    Database, Driver, DriverRegistry, EventKind, EventLevel, EventSink, Project,
    ResultCollectionItem, RunEvent,
};
use dmig_lua::{ScriptHooks, ScriptHost, ScriptOutputLevel};
use dmig_ssh::TunnelManager;
use dmig_storage::StoreManager;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Recursive `run()` invocations deeper than this fail instead of
/// exhausting the stack.
pub const MAX_RUN_DEPTH: usize = 32;

/// Grace period after starting a tunnel, letting the forwarder finish its
/// handshake before the first driver connection goes through it.
const TUNNEL_GRACE: Duration = Duration::from_secs(2);

/// Options for one runner instance.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Traverse the source (and script) without writing to the destination.
    pub dry_run: bool,
    /// Emit per-record and setup-detail events.
    pub verbose: bool,
    /// Suppress everything below errors except the terminal `Done`.
    pub quiet: bool,
    /// Omit timestamps and zero durations for byte-stable output.
    pub no_time: bool,
    /// Stop after this many destination writes; 0 means unlimited.
    pub limit: u64,
    /// Directory holding the persistent KV files.
    pub path: PathBuf,
}

/// A driver slot in the runner's cache. Slots lock independently so a
/// recursive run touches only its own migration's drivers.
pub type SharedDriver = Arc<Mutex<Box<dyn Driver>>>;

/// What `run` returns. The driver handles are the live cache slots; a
/// recursive caller reads its child's collector output through
/// `destination_driver`.
pub struct RunResult {
    pub machine_name: String,
    pub source_args: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub count: u64,
    pub duration: Duration,
    pub source_driver: SharedDriver,
    pub destination_driver: SharedDriver,
}

impl std::fmt::Debug for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunResult")
            .field("machine_name", &self.machine_name)
            .field("source_args", &self.source_args)
            .field("started_at", &self.started_at)
            .field("count", &self.count)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RecursionGuard {
    visited: HashSet<String>,
    depth: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs migrations for one project.
///
/// The runner owns the driver cache, the recursion guard, and the cancel
/// flag; the registry, tunnel manager, and event sink are shared in. One
/// runner value drives one migration invocation at a time (scripts may
/// recurse through it synchronously).
pub struct Runner {
    project: Project,
    registry: Arc<DriverRegistry>,
    tunnels: Arc<TunnelManager>,
    stores: StoreManager,
    events: Arc<dyn EventSink>,
    options: RunOptions,
    drivers: Mutex<HashMap<(String, String), SharedDriver>>,
    guard: Mutex<RecursionGuard>,
    cancel: Arc<AtomicBool>,
    http: HttpPoster,
}

impl Runner {
    pub fn new(
        project: Project,
        registry: Arc<DriverRegistry>,
        tunnels: Arc<TunnelManager>,
        events: Arc<dyn EventSink>,
        options: RunOptions,
    ) -> Self {
        let stores = StoreManager::new(options.path.clone(), project.component.machine_name.clone());
        Self {
            project,
            registry,
            tunnels,
            stores,
            events,
            options,
            drivers: Mutex::new(HashMap::new()),
            guard: Mutex::new(RecursionGuard::default()),
            cancel: Arc::new(AtomicBool::new(false)),
            http: HttpPoster::new(),
        }
    }

    /// Shared cancel flag. Setting it stops the run at the next record
    /// boundary; the destination still gets a best-effort `done`.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// The persistent KV stores this runner has opened. Embedders flush
    /// them before exit so fire-and-forget `persistVal` writes land.
    pub fn stores(&self) -> &StoreManager {
        &self.stores
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run a migration by machine name with its positional source args.
    pub fn run(self: &Arc<Self>, machine_name: &str, args: &[String]) -> Result<RunResult, RunError> {
        {
            let mut guard = lock(&self.guard);
            guard.visited.clear();
            guard.depth = 0;
        }
        self.run_inner(machine_name, args)
    }

    /// Shared entry for top-level and recursive invocations: recursion
    /// guard bookkeeping plus the error event on failure.
    fn run_inner(self: &Arc<Self>, machine_name: &str, args: &[String]) -> Result<RunResult, RunError> {
        {
            let mut guard = lock(&self.guard);
            if guard.visited.contains(machine_name) {
                let err = RunError::RecursiveMigration(machine_name.to_string());
                self.emit(RunEvent::error(machine_name, err.to_string()));
                return Err(err);
            }
            if guard.depth >= MAX_RUN_DEPTH {
                let err = RunError::DepthExceeded { max: MAX_RUN_DEPTH };
                self.emit(RunEvent::error(machine_name, err.to_string()));
                return Err(err);
            }
            guard.visited.insert(machine_name.to_string());
            guard.depth += 1;
        }

        let result = self.execute(machine_name, args);

        {
            let mut guard = lock(&self.guard);
            guard.visited.remove(machine_name);
            guard.depth = guard.depth.saturating_sub(1);
        }

        if let Err(err) = &result {
            self.emit(RunEvent::error(machine_name, err.to_string()));
        }
        result
    }

    fn execute(self: &Arc<Self>, machine_name: &str, args: &[String]) -> Result<RunResult, RunError> {
        let started = Instant::now();
        let started_at = if self.options.no_time {
            None
        } else {
            Some(Utc::now())
        };

        self.emit(
            RunEvent::setup(machine_name, format!("running migration {}", machine_name))
                .with_args(args.to_vec()),
        );
        if self.options.dry_run {
            self.emit(RunEvent::setup(
                machine_name,
                "dry run: no data will be migrated",
            ));
        }

        let migration = self
            .project
            .migration(machine_name)
            .ok_or_else(|| RunError::MigrationNotFound(machine_name.to_string()))?
            .clone();

        let source_db = self
            .project
            .database(&migration.source_db)
            .ok_or_else(|| RunError::SourceDbNotFound(migration.source_db.clone()))?
            .clone();
        self.ensure_tunnel(machine_name, &source_db)?;
        let source = self.driver_for(machine_name, &source_db)?;

        if migration.source_query_n_args != args.len() {
            return Err(RunError::ArgCountMismatch {
                expected: migration.source_query_n_args,
                got: args.len(),
            });
        }

        if self.options.verbose {
            self.emit(RunEvent::setup(
                machine_name,
                format!(
                    "source query expects {} args, received {}",
                    migration.source_query_n_args,
                    args.len()
                ),
            ));

            if let Some(count) = self.estimate_source(&source, &migration, args) {
                self.emit(RunEvent::setup(machine_name, "source size known").with_count(count));
            }
        }

        let stream = lock(&source)
            .stream_out(&migration.source_query, args)
            .map_err(RunError::Driver)?;

        let destination_db = self
            .project
            .database(&migration.destination_db)
            .ok_or_else(|| RunError::DestinationDbNotFound(migration.destination_db.clone()))?
            .clone();
        let destination = self.driver_for(machine_name, &destination_db)?;

        let template =
            QueryTemplate::compile(&migration.destination_query).map_err(RunError::TemplateParse)?;

        let script = if migration.transformation_script.is_empty() {
            None
        } else {
            let hooks = Arc::new(RunnerHooks {
                runner: self.clone(),
                migration: machine_name.to_string(),
            });
            Some(ScriptHost::new(
                migration.transformation_script.clone(),
                machine_name,
                hooks,
            )?)
        };

        self.emit(RunEvent::setup(
            machine_name,
            format!(
                "migrating from {} to {}",
                migration.source_db, migration.destination_db
            ),
        ));

        let mut count: u64 = 0;

        for item in stream {
            if self.cancelled() {
                if let Err(e) = lock(&destination).done() {
                    log::error!("destination done after cancel failed: {}", e);
                }
                return Err(RunError::Cancelled);
            }

            let mut record = item.map_err(RunError::Driver)?;
            let mut destination_args: Vec<String> = Vec::new();

            if let Some(host) = &script {
                let outcome = host.eval_record(record)?;

                if outcome.finish {
                    self.emit(RunEvent::status(machine_name, "script ended the migration"));
                    break;
                }
                if outcome.skip {
                    if self.options.verbose {
                        self.emit(RunEvent::status(machine_name, "script skipped a record"));
                    }
                    continue;
                }

                record = outcome.record;
                destination_args = outcome.args;
            }

            if self.options.dry_run {
                count += 1;
                continue;
            }

            let rendered = template.render(&record).map_err(RunError::TemplateRender)?;

            lock(&destination)
                .write_in(&rendered, &destination_args, &record)
                .map_err(RunError::Driver)?;
            count += 1;

            if self.options.verbose {
                self.emit(
                    RunEvent::status(machine_name, "record migrated")
                        .with_args(destination_args.clone())
                        .with_count(count),
                );
            }

            if self.options.limit > 0 && count >= self.options.limit {
                self.emit(
                    RunEvent::status(machine_name, "record limit reached").with_count(count),
                );
                break;
            }
        }

        lock(&destination).done().map_err(RunError::Driver)?;

        let duration = if self.options.no_time {
            Duration::ZERO
        } else {
            started.elapsed()
        };
        self.emit(RunEvent::done(machine_name, count, duration.as_millis() as u64));

        Ok(RunResult {
            machine_name: machine_name.to_string(),
            source_args: args.to_vec(),
            started_at,
            count,
            duration,
            source_driver: source,
            destination_driver: destination,
        })
    }

    /// Progress estimate for the source: the driver's own hint first, the
    /// migration's count query as the fallback. Best effort, verbose only.
    fn estimate_source(
        &self,
        source: &SharedDriver,
        migration: &dmig_core::Migration,
        args: &[String],
    ) -> Option<u64> {
        let mut driver = lock(source);

        if let Ok(estimate) = driver.expected_out()
            && estimate.known
        {
            return Some(estimate.count);
        }

        if migration.source_count_query.is_empty() || !driver.has_count_query() {
            return None;
        }

        let stream = driver
            .stream_out(&migration.source_count_query, args)
            .map_err(|e| log::warn!("count query failed: {}", e))
            .ok()?;
        drop(driver);

        stream
            .take(1)
            .next()?
            .ok()?
            .iter()
            .next()
            .and_then(|(_, value)| value.as_i64())
            .and_then(|count| u64::try_from(count).ok())
    }

    /// Driver cache lookup keyed by `(migration, database)`. A hit is
    /// re-`init`ed; a miss is created through the registry, configured,
    /// and `init`ed.
    fn driver_for(&self, migration: &str, db: &Database) -> Result<SharedDriver, RunError> {
        let key = (migration.to_string(), db.component.machine_name.clone());

        {
            let cache = lock(&self.drivers);
            if let Some(slot) = cache.get(&key) {
                lock(slot).init();
                return Ok(slot.clone());
            }
        }

        if self.options.verbose {
            self.emit(RunEvent::setup(
                migration,
                format!(
                    "configuring {} driver for {}",
                    db.driver, db.component.machine_name
                ),
            ));
        }

        let mut driver = self.registry.create(&db.driver)?;
        driver.configure(&db.configuration)?;
        driver.init();

        let slot: SharedDriver = Arc::new(Mutex::new(driver));
        lock(&self.drivers).insert(key, slot.clone());
        Ok(slot)
    }

    /// Bring up the database's tunnel when it names one. Only a freshly
    /// started forwarder gets the handshake grace sleep.
    fn ensure_tunnel(&self, migration: &str, db: &Database) -> Result<(), RunError> {
        if db.tunnel.is_empty() {
            return Ok(());
        }

        let tunnel = self
            .project
            .tunnel(&db.tunnel)
            .ok_or_else(|| RunError::TunnelNotFound(db.tunnel.clone()))?;

        let created = self.tunnels.ensure(tunnel)?;
        if created {
            self.emit(RunEvent::setup(
                migration,
                format!("tunnel {} started, waiting for handshake", db.tunnel),
            ));
            thread::sleep(TUNNEL_GRACE);
        }
        Ok(())
    }

    fn emit(&self, mut event: RunEvent) {
        if self.options.quiet
            && event.level != EventLevel::Error
            && event.kind != EventKind::Done
        {
            return;
        }
        if !self.options.no_time {
            event.timestamp = Some(Utc::now());
        }
        self.events.emit(event);
    }
}

/// The runner-side implementation of the script host's hook seam.
struct RunnerHooks {
    runner: Arc<Runner>,
    migration: String,
}

impl ScriptHooks for RunnerHooks {
    fn run_migration(&self, machine_name: &str, args: Vec<String>) -> Vec<ResultCollectionItem> {
        match self.runner.run_inner(machine_name, &args) {
            Ok(result) => {
                let guard = lock(&result.destination_driver);
                match guard.as_any().downcast_ref::<CollectorDriver>() {
                    Some(collector) => collector.collection(),
                    None => {
                        self.runner.emit(RunEvent::new(
                            EventLevel::Warn,
                            EventKind::ScriptOutput,
                            &self.migration,
                            format!("run() for {} did not output to a collector", machine_name),
                        ));
                        Vec::new()
                    }
                }
            }
            Err(err) => {
                // The child already emitted its MigrationError; tell the
                // parent script's audience and move on with nothing.
                self.runner.emit(RunEvent::new(
                    EventLevel::Error,
                    EventKind::ScriptOutput,
                    &self.migration,
                    format!("run({}) failed: {}", machine_name, err),
                ));
                Vec::new()
            }
        }
    }

    fn persist_val(&self, migration: &str, key: &str, fallback: &str) -> String {
        let store = match self.runner.stores.for_migration(migration) {
            Ok(store) => store,
            Err(err) => {
                self.runner.emit(RunEvent::new(
                    EventLevel::Error,
                    EventKind::ScriptOutput,
                    &self.migration,
                    format!("persistVal open failed: {}", err),
                ));
                return fallback.to_string();
            }
        };

        match store.persist_val(key, fallback) {
            Ok(value) => value,
            Err(err) => {
                self.runner.emit(RunEvent::new(
                    EventLevel::Error,
                    EventKind::ScriptOutput,
                    &self.migration,
                    format!("persistVal read failed: {}", err),
                ));
                fallback.to_string()
            }
        }
    }

    fn http_json_post(&self, url: &str, payload: &str) {
        match self.runner.http.post_json(url, payload) {
            Ok(status) => {
                self.runner.emit(RunEvent::new(
                    EventLevel::Info,
                    EventKind::HttpJsonPostStatus,
                    &self.migration,
                    format!("POST {} -> {}", url, status),
                ));
            }
            Err(err) => {
                self.runner.emit(RunEvent::new(
                    EventLevel::Error,
                    EventKind::HttpJsonPostStatus,
                    &self.migration,
                    format!("POST {} failed: {}", url, err),
                ));
            }
        }
    }

    fn script_output(&self, level: ScriptOutputLevel, message: String) {
        let level = match level {
            ScriptOutputLevel::Debug => EventLevel::Debug,
            ScriptOutputLevel::Info => EventLevel::Info,
            ScriptOutputLevel::Error => EventLevel::Error,
        };
        self.runner.emit(RunEvent::new(
            level,
            EventKind::ScriptOutput,
            &self.migration,
            message,
        ));
    }
}
