#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod console;
mod error_fmt;
mod journal;
mod logging;
mod rt;
mod service;

use clap::Parser;

use crate::cli::{Cli, Commands, JSON_MODE, json_mode};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn dispatch(cli: Cli) -> eyre::Result<()> {
    let cfg = counter_config::load_file(&cli.config)?;
    let level = cli
        .log_level
        .clone()
        .or_else(|| cfg.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    logging::init(cli.json, &level, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    match cli.cmd {
        Commands::Run {
            no_console,
            rt,
            rt_prio,
            rt_lock,
        } => service::run(&cfg, cli.json, no_console, (rt, rt_prio, rt_lock)),
        Commands::SelfCheck => service::self_check(&cfg, cli.json),
        Commands::Snapshot => service::snapshot(&cfg),
        Commands::Health => service::health(&cfg, cli.json),
    }
}

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(e) = dispatch(cli) {
        if json_mode() {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        tracing::error!(error = %e, "counter exited with an error");
        std::process::exit(exit_code_for_error(&e));
    }
}
