mod args;
mod commands;
mod drivers;
mod events;
mod project_file;

use clap::Parser;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = args::Cli::parse();
    std::process::exit(commands::dispatch(cli));
}
