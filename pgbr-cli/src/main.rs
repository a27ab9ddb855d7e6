//! Thin binary: parses arguments, sets up logging, and dispatches into the
//! engine crates. The CLI surface itself (full option grammar, help
//! renderer, config-file loader) stays a stub; library crates return
//! `pgbr_types::Error` and this is the one place that turns a failure into
//! an `anyhow::Error` with a process exit code.

mod cli;
mod commands;
mod pgclient_local;

use clap::Parser;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = cli::Cli::parse();

    let result = match &cli.command {
        cli::Command::Backup(args) => commands::run_backup(&cli, args),
        cli::Command::Restore(args) => commands::run_restore(&cli, args),
        cli::Command::Stop(args) => commands::run_stop(&cli, args),
        cli::Command::Start => commands::run_start(&cli),
    };

    if let Err(err) = result {
        log::error!("{err:#}");
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}
