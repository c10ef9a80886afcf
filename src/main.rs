/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{io, path::PathBuf, process::ExitCode, thread};

use clap::Parser;
use guardian_keeper::{
    config::{Environment, KeeperConfig},
    keeper::{KeeperError, KeeperSpec},
};
use log::LevelFilter;

/// Rotates duty leadership over the guardian committee and sends the scheduled maintenance transactions
/// while this node is on duty.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Keeper configuration (JSON).
    #[arg(long, default_value = "./config.json")]
    config: PathBuf,

    /// Task list (JSON).
    #[arg(long, default_value = "./tasks.json")]
    tasks: PathBuf,

    /// Directory of contract ABIs, one `<name>.json` file per ABI.
    #[arg(long, default_value = "./abi")]
    abi_dir: PathBuf,

    /// One of off, error, warn, info, debug, trace.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let Ok(level) = args.log_level.parse::<LevelFilter>() else {
        eprintln!("unknown log level: {}", args.log_level);
        return ExitCode::FAILURE;
    };
    if let Err(err) = setup_logger(level) {
        eprintln!("cannot set up logging: {}", err);
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), KeeperError> {
    let config = KeeperConfig::load(&args.config)?;
    let environment = Environment::from_env();
    log::info!(
        "starting keeper {} for node {}",
        env!("CARGO_PKG_VERSION"),
        config.node_orbs_address
    );

    let keeper = KeeperSpec::from_config(&config, &environment, &args.tasks, &args.abi_dir)?.start();
    keeper.join();
    Ok(())
}

fn setup_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{:?}][{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                thread::current().id(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stdout())
        .apply()
}
