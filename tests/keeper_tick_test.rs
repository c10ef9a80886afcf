use std::{collections::BTreeMap, time::Duration};

use alloy_primitives::B256;
use guardian_keeper::{
    chain::ChainClient,
    epoch_clock::EpochClock,
    keeper::{KeeperLoop, KeeperSpec},
    management::ManagementError,
    tx::pending::{CallKey, PendingTransaction},
    types::{
        data_types::{DwellLength, OrbsAddress, TxHash},
        task::TaskDefinition,
    },
};
use log::LevelFilter;

mod common;

use crate::common::{
    fixtures::{
        abis, committee, epoch, fast_tx_config, harvest_tasks, harvest_tasks_on, orbs_address,
        random_signer, time_in_epoch, EPOCH_DURATION, NETWORK, OTHER_VAULT, VAULT,
    },
    logging::setup_logger,
    mock_chain::MockChain,
    mock_management::MockManagement,
    mock_status::MemoryStatusSink,
};

const NAMES: [&str; 3] = ["guardian-a", "guardian-b", "guardian-c"];

struct Harness {
    keeper: KeeperLoop,
    chain: MockChain,
    management: MockManagement,
    status: MemoryStatusSink,
}

fn harness(node: OrbsAddress, tasks: Vec<TaskDefinition>) -> Harness {
    harness_with(node, tasks, 1)
}

fn harness_with(node: OrbsAddress, tasks: Vec<TaskDefinition>, status_write_every_ticks: u64) -> Harness {
    setup_logger(LevelFilter::Debug);

    let chain = MockChain::new();
    let management = MockManagement::new(committee(&NAMES, 1_000));
    let status = MemoryStatusSink::default();

    let mut chains: BTreeMap<String, Box<dyn ChainClient>> = BTreeMap::new();
    chains.insert(NETWORK.to_string(), Box::new(chain.clone()));

    let keeper = KeeperSpec::builder()
        .epoch_clock(EpochClock::new(EPOCH_DURATION).unwrap())
        .dwell_length(DwellLength::new(1))
        .node_orbs_address(node)
        .tasks(tasks)
        .abis(abis())
        .committee_source(management.clone())
        .chains(chains)
        .signer(random_signer())
        .status_sink(status.clone())
        .tx_config(fast_tx_config(3))
        .status_write_every_ticks(status_write_every_ticks)
        .build()
        .into_keeper_loop();

    Harness {
        keeper,
        chain,
        management,
        status,
    }
}

#[test]
fn only_the_leader_sends_transactions() {
    // guardian-b leads epochs 1, 4, 7, ...
    let mut h = harness(orbs_address(1), harvest_tasks(1));

    // 1. Epoch 0 belongs to guardian-a.
    let report = h.keeper.tick_at(time_in_epoch(0));
    assert_eq!(report.tick, 1);
    assert_eq!(report.epoch_index, epoch(0));
    assert!(!report.is_leader);
    assert!(report.executed_tasks.is_empty());
    assert!(report.errors.is_empty());
    assert_eq!(h.chain.sent(), 0);

    let document = h.status.last().unwrap();
    assert_eq!(document.status, "tickCount: 1, leaderName: guardian-a");
    assert_eq!(document.error, None);
    assert_eq!(document.payload.my_node_name.as_deref(), Some("guardian-b"));
    assert!(document.payload.in_committee);
    assert!(!document.payload.is_leader);
    assert_eq!(document.payload.balances[NETWORK], "1000000000000000000");

    // 2. Epoch 1 belongs to this keeper: the due task is executed.
    let report = h.keeper.tick_at(time_in_epoch(1));
    assert!(report.is_leader);
    assert_eq!(report.executed_tasks, vec!["harvest"]);
    assert!(report.errors.is_empty());
    assert_eq!(h.chain.sent(), 1);

    let document = h.status.last().unwrap();
    assert_eq!(document.payload.leader_name.as_deref(), Some("guardian-b"));
    assert_eq!(document.payload.success_tx.len(), 1);
    assert!(document.payload.success_tx[0].contains("harvest"));
    assert!(document.payload.pending_tx.is_empty());

    // 3. A second tick in the same epoch does not execute the task again.
    let report = h
        .keeper
        .tick_at(time_in_epoch(1) + Duration::from_secs(10));
    assert!(report.is_leader);
    assert!(report.executed_tasks.is_empty());
    assert_eq!(h.chain.sent(), 1);
}

#[test]
fn tasks_run_only_in_due_epochs() {
    let mut h = harness(orbs_address(1), harvest_tasks(2));

    // Leader in epoch 1, but the task is due every 2 epochs.
    let report = h.keeper.tick_at(time_in_epoch(1));
    assert!(report.is_leader);
    assert!(report.executed_tasks.is_empty());

    // Leader in epoch 4, which is a task epoch.
    let report = h.keeper.tick_at(time_in_epoch(4));
    assert!(report.is_leader);
    assert_eq!(report.executed_tasks, vec!["harvest"]);
    assert_eq!(h.chain.sent(), 1);
}

#[test]
fn losing_leadership_clears_task_schedules() {
    let mut h = harness(orbs_address(1), harvest_tasks(1));

    h.keeper.tick_at(time_in_epoch(1));
    assert_eq!(
        h.keeper
            .state()
            .scheduler()
            .run_state("harvest")
            .map(|run| run.last_run_epoch),
        Some(epoch(1))
    );

    let report = h.keeper.tick_at(time_in_epoch(2));
    assert!(!report.is_leader);
    assert!(h.keeper.state().scheduler().is_empty());

    let report = h.keeper.tick_at(time_in_epoch(4));
    assert!(report.is_leader);
    assert_eq!(report.executed_tasks, vec!["harvest"]);
    assert_eq!(h.chain.sent(), 2);
}

#[test]
fn failed_refresh_keeps_the_last_view_and_skips_tasks() {
    let mut h = harness(orbs_address(1), harvest_tasks(1));
    h.keeper.tick_at(time_in_epoch(0));

    // 1. The management service goes away.
    h.management
        .respond(Err(ManagementError::Network("connection refused".to_string())));
    let report = h.keeper.tick_at(time_in_epoch(1));
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("committee refresh"));
    assert!(report.executed_tasks.is_empty());
    assert!(report.status_written);
    assert_eq!(h.chain.sent(), 0);
    assert_eq!(h.keeper.state().committee_view().len(), 3);

    let document = h.status.last().unwrap();
    assert!(document.error.unwrap().contains("connection refused"));
    assert_eq!(document.payload.tick_count, 2);
    assert!(document.payload.management_staleness_seconds.is_some());
    assert_eq!(document.payload.recent_errors.len(), 1);

    // 2. Data that goes back in time is rejected the same way.
    h.management.respond(Ok(committee(&NAMES, 999)));
    let report = h.keeper.tick_at(time_in_epoch(1));
    assert!(report.errors[0].contains("back in time"));
    assert_eq!(h.keeper.state().committee_view().ref_time(), 1_000);

    // 3. Once it recovers, the keeper catches up within the same epoch.
    h.management.respond(Ok(committee(&NAMES, 1_060)));
    let report = h.keeper.tick_at(time_in_epoch(1));
    assert!(report.errors.is_empty());
    assert_eq!(report.executed_tasks, vec!["harvest"]);
    assert_eq!(h.status.last().unwrap().error, None);
}

#[test]
fn task_with_a_transaction_in_flight_does_not_start() {
    let mut h = harness(orbs_address(1), harvest_tasks_on(1, &[VAULT, OTHER_VAULT]));
    let key = CallKey {
        task_name: "harvest".to_string(),
        network: NETWORK.to_string(),
        contract_address: VAULT.parse().unwrap(),
        method: "harvest".to_string(),
        params: "null".to_string(),
    };
    h.keeper.state_mut().lifecycle_mut().pending_mut().insert(
        key.clone(),
        PendingTransaction {
            tx_hash: TxHash::new(B256::repeat_byte(1)),
            task_name: "harvest".to_string(),
            submitted_at_epoch: epoch(0),
        },
    );

    // 1. Neither address is called while the first call is unresolved.
    let report = h.keeper.tick_at(time_in_epoch(1));
    assert!(report.executed_tasks.is_empty());
    assert_eq!(report.blocked_tasks, vec!["harvest"]);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("in flight"));
    assert_eq!(h.chain.sent(), 0);
    assert!(h.keeper.state().scheduler().run_state("harvest").is_none());
    assert_eq!(h.status.last().unwrap().payload.pending_tx.len(), 1);

    // 2. Once it resolves, the task runs in the same epoch and calls both addresses.
    h.keeper
        .state_mut()
        .lifecycle_mut()
        .pending_mut()
        .remove(&key);
    let report = h
        .keeper
        .tick_at(time_in_epoch(1) + Duration::from_secs(10));
    assert_eq!(report.executed_tasks, vec!["harvest"]);
    assert!(report.blocked_tasks.is_empty());
    assert!(report.errors.is_empty());
    assert_eq!(h.chain.sent(), 2);
}

#[test]
fn failed_call_is_recorded_and_the_tick_goes_on() {
    let mut h = harness(orbs_address(1), harvest_tasks(1));
    h.chain.with(|chain| chain.revert = true);

    let report = h.keeper.tick_at(time_in_epoch(1));
    assert_eq!(report.executed_tasks, vec!["harvest"]);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("reverted"));
    // Reverts are final: no second attempt.
    assert_eq!(h.chain.sent(), 1);

    let document = h.status.last().unwrap();
    assert!(document.error.is_some());
    assert_eq!(document.payload.fail_tx.len(), 1);
    assert!(document.payload.success_tx.is_empty());
}

#[test]
fn node_outside_the_topology_never_leads() {
    let mut h = harness(orbs_address(9), harvest_tasks(1));

    for epoch_index in 0..6 {
        let report = h.keeper.tick_at(time_in_epoch(epoch_index));
        assert!(!report.is_leader);
        assert!(report.executed_tasks.is_empty());
    }
    assert_eq!(h.chain.sent(), 0);
    assert!(h.keeper.state().guardian().is_none());

    let document = h.status.last().unwrap();
    assert_eq!(document.payload.my_node_name, None);
    assert!(!document.payload.in_committee);
}

#[test]
fn status_is_written_every_n_ticks_and_after_failures() {
    let mut h = harness_with(orbs_address(0), Vec::new(), 3);

    h.keeper.tick_at(time_in_epoch(1));
    h.keeper.tick_at(time_in_epoch(1));
    assert_eq!(h.status.writes(), 0);

    let report = h.keeper.tick_at(time_in_epoch(1));
    assert!(report.status_written);
    assert_eq!(h.status.writes(), 1);

    h.management
        .respond(Err(ManagementError::Parse("truncated".to_string())));
    let report = h.keeper.tick_at(time_in_epoch(1));
    assert!(report.status_written);
    assert_eq!(h.status.writes(), 2);
}
