use crate::args::{Cli, Command, ComponentKind, RunArgs};
use crate::{drivers, events, project_file};
use dmig_core::drivers::CollectorStore;
use dmig_core::{EventSink, Project};
use dmig_run::{RunOptions, Runner};
use dmig_ssh::{HostKeyPolicy, TunnelManager};
use std::path::PathBuf;
use std::sync::Arc;

/// Execute the parsed command line; returns the process exit code.
pub fn dispatch(cli: Cli) -> i32 {
    let Cli {
        project,
        directory,
        insecure_host_keys,
        command,
    } = cli;

    let project = match project_file::load_project(&directory, &project) {
        Ok(project) => project,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    match command {
        Command::Run(args) => run(project, directory, insecure_host_keys, args),
        Command::List { kind } => {
            list(&project, kind);
            0
        }
        Command::Describe { kind, machine_name } => describe(&project, kind, &machine_name),
    }
}

fn run(project: Project, directory: PathBuf, insecure_host_keys: bool, args: RunArgs) -> i32 {
    let collectors = CollectorStore::new();
    let registry = Arc::new(drivers::builtin_registry(&collectors));

    let policy = if insecure_host_keys {
        HostKeyPolicy::AcceptAny
    } else {
        HostKeyPolicy::KnownHosts
    };
    let tunnels = Arc::new(TunnelManager::new(policy));

    let sink: Arc<dyn EventSink> = if args.log_out {
        Arc::new(events::JsonLineSink::new(std::io::stdout()))
    } else {
        Arc::new(events::HumanSink::new(std::io::stdout()))
    };

    let options = RunOptions {
        dry_run: args.dry_run,
        verbose: args.verbose,
        quiet: args.quiet,
        no_time: args.no_time,
        limit: args.limit,
        path: directory,
    };

    let runner = Arc::new(Runner::new(project, registry, tunnels, sink, options));
    let result = runner.run(&args.migration, &args.args);

    // Land fire-and-forget persistVal writes before the process exits.
    runner.stores().flush_all();

    match result {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("migration failed: {err}");
            1
        }
    }
}

fn list(project: &Project, kind: ComponentKind) {
    match kind {
        ComponentKind::Databases => {
            for (machine_name, database) in &project.databases {
                println!("{}\t{}\t{}", machine_name, database.driver, database.component.name);
            }
        }
        ComponentKind::Tunnels => {
            for (machine_name, tunnel) in &project.tunnels {
                println!(
                    "{}\t{} -> {} via {}",
                    machine_name, tunnel.local, tunnel.remote, tunnel.server
                );
            }
        }
        ComponentKind::Migrations => {
            for (machine_name, migration) in &project.migrations {
                println!(
                    "{}\t{} -> {}",
                    machine_name, migration.source_db, migration.destination_db
                );
            }
        }
    }
}

fn describe(project: &Project, kind: ComponentKind, machine_name: &str) -> i32 {
    let rendered = match kind {
        ComponentKind::Databases => project
            .database(machine_name)
            .and_then(|db| serde_yaml::to_string(db).ok()),
        ComponentKind::Tunnels => project
            .tunnel(machine_name)
            .and_then(|tunnel| serde_yaml::to_string(tunnel).ok()),
        ComponentKind::Migrations => project
            .migration(machine_name)
            .and_then(|migration| serde_yaml::to_string(migration).ok()),
    };

    match rendered {
        Some(text) => {
            println!("{text}");
            0
        }
        None => {
            eprintln!("no such component: {machine_name}");
            1
        }
    }
}
