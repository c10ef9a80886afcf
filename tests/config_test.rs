use std::{
    fs,
    path::{Path, PathBuf},
};

use guardian_keeper::{
    config::{Environment, KeeperConfig},
    keeper::{KeeperError, KeeperSpec},
    types::data_types::EpochIndex,
};
use log::LevelFilter;

mod common;

use crate::common::logging::setup_logger;

const DEBUG_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

fn demos() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos")
}

fn environment(vars: &'static [(&'static str, &'static str)]) -> Environment {
    Environment::from_vars(|name| {
        vars.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    })
}

#[test]
fn demo_configuration_builds_a_keeper() {
    setup_logger(LevelFilter::Info);

    let config = KeeperConfig::load(&demos().join("config.json")).unwrap();
    assert_eq!(config.networks.len(), 2);
    assert_eq!(config.tx_max_retries, 5);
    // Defaulted.
    assert_eq!(config.gas_limit, 2_000_000);

    let environment = environment(&[]);
    assert!(!environment.production);
    let spec = KeeperSpec::from_config(
        &config,
        &environment,
        &demos().join("tasks.json"),
        &demos().join("abi"),
    );
    let keeper = match spec {
        Ok(spec) => spec.into_keeper_loop(),
        Err(err) => panic!("{}", err),
    };
    assert_eq!(keeper.state().epoch_index(), EpochIndex::new(0));
    assert_eq!(keeper.state().leader_state().leader_index, None);
    // Outside production, transactions are never broadcast.
    assert!(keeper.state().lifecycle().config().dry_run);
}

#[test]
fn debug_mode_needs_a_private_key() {
    setup_logger(LevelFilter::Info);
    let config = KeeperConfig::load(&demos().join("config.json")).unwrap();

    let result = KeeperSpec::from_config(
        &config,
        &environment(&[("KEEPER_DEBUG", "1")]),
        &demos().join("tasks.json"),
        &demos().join("abi"),
    );
    assert!(matches!(result, Err(KeeperError::MissingDebugKey)));

    let result = KeeperSpec::from_config(
        &config,
        &environment(&[
            ("KEEPER_DEBUG", "true"),
            ("KEEPER_DEBUG_PRIVATE_KEY", DEBUG_KEY),
            ("KEEPER_ENV", "production"),
        ]),
        &demos().join("tasks.json"),
        &demos().join("abi"),
    );
    let keeper = match result {
        Ok(spec) => spec.into_keeper_loop(),
        Err(err) => panic!("{}", err),
    };
    assert!(!keeper.state().lifecycle().config().dry_run);
}

#[test]
fn task_naming_an_unknown_network_is_a_startup_error() {
    setup_logger(LevelFilter::Info);
    let config = KeeperConfig::load(&demos().join("config.json")).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let tasks = dir.path().join("tasks.json");
    fs::write(
        &tasks,
        r#"{ "tasks": [ { "name": "harvest", "intervalEpochs": 1, "networks": ["fantom"],
             "addresses": ["0x1111111111111111111111111111111111111111"], "abi": "vault",
             "send": [ { "method": "harvest" } ] } ] }"#,
    )
    .unwrap();

    let result = KeeperSpec::from_config(&config, &environment(&[]), &tasks, &demos().join("abi"));
    assert!(matches!(result, Err(KeeperError::Tasks(_))));
}
