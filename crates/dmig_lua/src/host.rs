use crate::convert::{lua_to_value, record_to_table, table_to_record, value_to_lua};
use crate::ScriptError;
use dmig_core::{Record, ResultCollectionItem};
use mlua::{Lua, Table, Value as LuaValue};
use std::sync::{Arc, Mutex};

/// Severity of a script-originated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutputLevel {
    Debug,
    Info,
    Error,
}

/// Host operations a script can reach. Implemented by the runner; the
/// script host itself stays ignorant of migrations, storage engines, and
/// HTTP.
pub trait ScriptHooks: Send + Sync {
    /// Synchronously run a sibling migration and return its collector
    /// output. Errors surface as events and an empty collection.
    fn run_migration(&self, machine_name: &str, args: Vec<String>) -> Vec<ResultCollectionItem>;

    /// Stable value mapping; see the storage crate's `persist_val`.
    fn persist_val(&self, migration: &str, key: &str, fallback: &str) -> String;

    /// Fire a JSON POST. Failures are reported out of band, never raised
    /// into the script.
    fn http_json_post(&self, url: &str, payload: &str);

    /// Route a `print`/`dump` message to the event stream.
    fn script_output(&self, level: ScriptOutputLevel, message: String);
}

/// Hooks that swallow everything; for tests and detached evaluation.
pub struct NoopHooks;

impl ScriptHooks for NoopHooks {
    fn run_migration(&self, _machine_name: &str, _args: Vec<String>) -> Vec<ResultCollectionItem> {
        Vec::new()
    }

    fn persist_val(&self, _migration: &str, _key: &str, fallback: &str) -> String {
        fallback.to_string()
    }

    fn http_json_post(&self, _url: &str, _payload: &str) {}

    fn script_output(&self, _level: ScriptOutputLevel, _message: String) {}
}

/// What one evaluation decided about its record.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub record: Record,
    pub args: Vec<String>,
    pub skip: bool,
    /// The script asked to terminate the migration normally. Wins over
    /// `skip`: the current record is not written.
    pub finish: bool,
}

#[derive(Default)]
struct Scratch {
    record: Record,
    args: Vec<String>,
    skip: bool,
    finish: bool,
}

/// One Lua context bound to one migration invocation.
pub struct ScriptHost {
    lua: Lua,
    script: String,
    scratch: Arc<Mutex<Scratch>>,
}

fn lua_value_to_string(value: &LuaValue) -> String {
    match value {
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        other => lua_to_value(other).to_display_string(),
    }
}

fn args_from_table(table: &Table) -> Vec<String> {
    table
        .clone()
        .sequence_values::<LuaValue>()
        .flatten()
        .map(|item| lua_value_to_string(&item))
        .collect()
}

impl ScriptHost {
    /// Create the context and install the context-wide bindings.
    pub fn new(
        script: impl Into<String>,
        migration: impl Into<String>,
        hooks: Arc<dyn ScriptHooks>,
    ) -> Result<Self, ScriptError> {
        let lua = Lua::new();
        let migration = migration.into();
        let storage: Arc<Mutex<Record>> = Arc::new(Mutex::new(Record::new()));
        let globals = lua.globals();

        {
            let migration = migration.clone();
            globals.set(
                "getMigration",
                lua.create_function(move |_, ()| Ok(migration.clone()))?,
            )?;
        }

        globals.set(
            "getUuid",
            lua.create_function(|_, ()| Ok(uuid::Uuid::new_v4().to_string()))?,
        )?;

        {
            let storage = storage.clone();
            globals.set(
                "getStorage",
                lua.create_function(move |lua, ()| {
                    let storage = storage.lock().map_err(|_| poisoned())?;
                    record_to_table(lua, &storage)
                })?,
            )?;
        }

        {
            let storage = storage.clone();
            globals.set(
                "sendStorage",
                lua.create_function(move |_, table: Table| {
                    let mut storage = storage.lock().map_err(|_| poisoned())?;
                    *storage = table_to_record(&table);
                    Ok(())
                })?,
            )?;
        }

        {
            let hooks = hooks.clone();
            globals.set(
                "persistVal",
                lua.create_function(
                    move |_, (migration, key, fallback): (String, String, String)| {
                        Ok(hooks.persist_val(&migration, &key, &fallback))
                    },
                )?,
            )?;
        }

        {
            let hooks = hooks.clone();
            globals.set(
                "run",
                lua.create_function(move |lua, (name, args): (String, Option<Table>)| {
                    let args = args.as_ref().map(args_from_table).unwrap_or_default();
                    let items = hooks.run_migration(&name, args);

                    let collection = lua.create_table()?;
                    for (i, item) in items.iter().enumerate() {
                        let entry = lua.create_table()?;
                        entry.set("record", record_to_table(lua, &item.record)?)?;
                        let arg_table = lua.create_table()?;
                        for (j, arg) in item.args.iter().enumerate() {
                            arg_table.set(j + 1, arg.as_str())?;
                        }
                        entry.set("args", arg_table)?;
                        collection.set(i + 1, entry)?;
                    }
                    Ok(collection)
                })?,
            )?;
        }

        {
            let hooks = hooks.clone();
            globals.set(
                "httpJsonPost",
                lua.create_function(move |_, (url, payload): (String, String)| {
                    hooks.http_json_post(&url, &payload);
                    Ok(())
                })?,
            )?;
        }

        {
            let hooks = hooks.clone();
            globals.set(
                "dump",
                lua.create_function(move |_, value: LuaValue| {
                    let dumped = serde_json::to_string_pretty(&lua_to_value(&value))
                        .unwrap_or_else(|_| "<unserialisable>".to_string());
                    hooks.script_output(ScriptOutputLevel::Debug, dumped);
                    Ok(())
                })?,
            )?;
        }

        {
            let hooks = hooks.clone();
            globals.set(
                "print",
                lua.create_function(move |_, value: LuaValue| {
                    hooks.script_output(ScriptOutputLevel::Info, lua_value_to_string(&value));
                    Ok(())
                })?,
            )?;
        }

        Ok(Self {
            lua,
            script: script.into(),
            scratch: Arc::new(Mutex::new(Scratch::default())),
        })
    }

    /// Evaluate the script against one record.
    ///
    /// The per-record bindings are re-installed, the scratch state reset,
    /// and the full script source evaluated.
    pub fn eval_record(&self, record: Record) -> Result<RecordOutcome, ScriptError> {
        {
            let mut scratch = self.scratch.lock().map_err(|_| ScriptError::Poisoned)?;
            *scratch = Scratch {
                record,
                args: Vec::new(),
                skip: false,
                finish: false,
            };
        }

        self.install_record_bindings()?;
        self.lua.load(&self.script).exec()?;

        let scratch = self.scratch.lock().map_err(|_| ScriptError::Poisoned)?;
        Ok(RecordOutcome {
            record: scratch.record.clone(),
            args: scratch.args.clone(),
            skip: scratch.skip,
            finish: scratch.finish,
        })
    }

    fn install_record_bindings(&self) -> Result<(), ScriptError> {
        let globals = self.lua.globals();

        {
            let scratch = self.scratch.clone();
            globals.set(
                "getRecord",
                self.lua.create_function(move |lua, ()| {
                    let scratch = scratch.lock().map_err(|_| poisoned())?;
                    record_to_table(lua, &scratch.record)
                })?,
            )?;
        }

        {
            let scratch = self.scratch.clone();
            globals.set(
                "sendRecord",
                self.lua.create_function(move |_, table: Table| {
                    let mut scratch = scratch.lock().map_err(|_| poisoned())?;
                    scratch.record = table_to_record(&table);
                    Ok(())
                })?,
            )?;
        }

        {
            let scratch = self.scratch.clone();
            globals.set(
                "sendArgs",
                self.lua.create_function(move |_, table: Table| {
                    let mut scratch = scratch.lock().map_err(|_| poisoned())?;
                    scratch.args = args_from_table(&table);
                    Ok(())
                })?,
            )?;
        }

        {
            let scratch = self.scratch.clone();
            globals.set(
                "skip",
                self.lua.create_function(move |_, ()| {
                    let mut scratch = scratch.lock().map_err(|_| poisoned())?;
                    scratch.skip = true;
                    Ok(())
                })?,
            )?;
        }

        {
            let scratch = self.scratch.clone();
            globals.set(
                "finish",
                self.lua.create_function(move |_, ()| {
                    let mut scratch = scratch.lock().map_err(|_| poisoned())?;
                    scratch.finish = true;
                    Ok(())
                })?,
            )?;
        }

        Ok(())
    }
}

fn poisoned() -> mlua::Error {
    mlua::Error::external("script state poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmig_core::Value;
    use std::sync::Mutex as StdMutex;

    fn record(id: &str, name: &str) -> Record {
        let mut r = Record::new();
        r.set("id", id);
        r.set("name", name);
        r
    }

    fn host(script: &str) -> ScriptHost {
        ScriptHost::new(script, "people", Arc::new(NoopHooks)).unwrap()
    }

    #[test]
    fn empty_script_passes_the_record_through() {
        let host = host("");
        let outcome = host.eval_record(record("1", "Alice")).unwrap();
        assert!(!outcome.skip);
        assert!(!outcome.finish);
        assert!(outcome.args.is_empty());
        assert_eq!(outcome.record, record("1", "Alice"));
    }

    #[test]
    fn skip_marks_only_matching_records() {
        let host = host(r#"if getRecord().id == "1" then skip() end"#);

        assert!(host.eval_record(record("1", "Alice")).unwrap().skip);
        assert!(!host.eval_record(record("2", "Bob")).unwrap().skip);
    }

    #[test]
    fn finish_terminates_and_wins_over_skip() {
        let host = host("skip() finish()");
        let outcome = host.eval_record(record("1", "Alice")).unwrap();
        assert!(outcome.finish);
        assert!(outcome.skip);
    }

    #[test]
    fn send_record_replaces_wholesale() {
        let host = host(r#"sendRecord({ id = getRecord().id, upper = "YES" })"#);
        let outcome = host.eval_record(record("7", "Grace")).unwrap();

        assert_eq!(outcome.record.get("id").and_then(Value::as_str), Some("7"));
        assert_eq!(
            outcome.record.get("upper").and_then(Value::as_str),
            Some("YES")
        );
        assert!(!outcome.record.contains("name"));
    }

    #[test]
    fn send_args_sets_the_destination_args() {
        let host = host(r#"sendArgs({ getRecord().id, "fixed", 3 })"#);
        let outcome = host.eval_record(record("9", "Ada")).unwrap();
        assert_eq!(outcome.args, vec!["9", "fixed", "3"]);
    }

    #[test]
    fn args_reset_between_evaluations() {
        let host = host(r#"if getRecord().id == "1" then sendArgs({ "only-once" }) end"#);

        assert_eq!(
            host.eval_record(record("1", "a")).unwrap().args,
            vec!["only-once"]
        );
        assert!(host.eval_record(record("2", "b")).unwrap().args.is_empty());
    }

    #[test]
    fn storage_survives_across_records() {
        let script = r#"
            local s = getStorage()
            s.seen = (s.seen or 0) + 1
            sendStorage(s)
            sendArgs({ s.seen })
        "#;
        let host = host(script);

        assert_eq!(host.eval_record(record("1", "a")).unwrap().args, vec!["1"]);
        assert_eq!(host.eval_record(record("2", "b")).unwrap().args, vec!["2"]);
    }

    #[test]
    fn uuid_and_migration_name_are_bound() {
        let host = host("sendArgs({ getUuid(), getMigration() })");
        let outcome = host.eval_record(record("1", "a")).unwrap();

        assert_eq!(outcome.args.len(), 2);
        assert_eq!(outcome.args[0].len(), 36);
        assert_eq!(outcome.args[0].matches('-').count(), 4);
        assert_eq!(outcome.args[1], "people");
    }

    #[test]
    fn syntax_errors_surface_as_eval_errors() {
        let host = host("this is not lua");
        assert!(matches!(
            host.eval_record(record("1", "a")),
            Err(ScriptError::Eval(_))
        ));
    }

    struct CapturingHooks {
        runs: StdMutex<Vec<(String, Vec<String>)>>,
        output: StdMutex<Vec<(ScriptOutputLevel, String)>>,
        posts: StdMutex<Vec<(String, String)>>,
    }

    impl CapturingHooks {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                runs: StdMutex::new(Vec::new()),
                output: StdMutex::new(Vec::new()),
                posts: StdMutex::new(Vec::new()),
            })
        }
    }

    impl ScriptHooks for CapturingHooks {
        fn run_migration(
            &self,
            machine_name: &str,
            args: Vec<String>,
        ) -> Vec<ResultCollectionItem> {
            self.runs
                .lock()
                .unwrap()
                .push((machine_name.to_string(), args));

            let mut child = Record::new();
            child.set("id", "from-child");
            vec![ResultCollectionItem {
                record: child,
                args: vec!["carried".to_string()],
            }]
        }

        fn persist_val(&self, _migration: &str, key: &str, _fallback: &str) -> String {
            format!("stored-{key}")
        }

        fn http_json_post(&self, url: &str, payload: &str) {
            self.posts
                .lock()
                .unwrap()
                .push((url.to_string(), payload.to_string()));
        }

        fn script_output(&self, level: ScriptOutputLevel, message: String) {
            self.output.lock().unwrap().push((level, message));
        }
    }

    #[test]
    fn run_returns_the_child_collection() {
        let hooks = CapturingHooks::new();
        let script = r#"
            local items = run("children", { "x", "y" })
            sendArgs({ items[1].record.id, items[1].args[1], #items })
        "#;
        let host = ScriptHost::new(script, "parent", hooks.clone()).unwrap();
        let outcome = host.eval_record(record("1", "a")).unwrap();

        assert_eq!(outcome.args, vec!["from-child", "carried", "1"]);
        let runs = hooks.runs.lock().unwrap();
        assert_eq!(
            *runs,
            vec![("children".to_string(), vec!["x".to_string(), "y".to_string()])]
        );
    }

    #[test]
    fn persist_val_round_trips_through_hooks() {
        let hooks = CapturingHooks::new();
        let host = ScriptHost::new(
            r#"sendArgs({ persistVal(getMigration(), "uid", "fallback") })"#,
            "people",
            hooks,
        )
        .unwrap();
        let outcome = host.eval_record(record("1", "a")).unwrap();
        assert_eq!(outcome.args, vec!["stored-uid"]);
    }

    #[test]
    fn print_and_post_reach_the_hooks() {
        let hooks = CapturingHooks::new();
        let script = r#"
            print("hello from lua")
            httpJsonPost("http://example.com/sink", "{\"ok\":true}")
        "#;
        let host = ScriptHost::new(script, "people", hooks.clone()).unwrap();
        host.eval_record(record("1", "a")).unwrap();

        let output = hooks.output.lock().unwrap();
        assert_eq!(
            *output,
            vec![(ScriptOutputLevel::Info, "hello from lua".to_string())]
        );
        let posts = hooks.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "http://example.com/sink");
    }
}
