use std::{
    collections::{HashMap, HashSet},
    time::{Duration, SystemTime},
};

use guardian_keeper::{
    chain::abi::{Abi, AbiStore},
    signer::local::LocalSigner,
    tx::TxLifecycleConfig,
    types::{
        committee::{CommitteeMember, CommitteeView},
        data_types::{EpochIndex, OrbsAddress},
        task::{parse_tasks, TaskDefinition},
    },
};
use k256::ecdsa::SigningKey;
use rand_core::OsRng;

pub(crate) const EPOCH_DURATION: Duration = Duration::from_secs(60);

pub(crate) const NETWORK: &str = "bsc";

pub(crate) const VAULT: &str = "0x5555555555555555555555555555555555555555";

/// The Orbs address of the `i`th guardian of [`committee`].
pub(crate) fn orbs_address(i: usize) -> OrbsAddress {
    format!("{:040x}", 0xaa00 + i).parse().unwrap()
}

/// A committee of guardians named `names`, in that order, all of them in the topology. Guardian `i` has
/// Ethereum address `i + 1`.
pub(crate) fn committee(names: &[&str], ref_time: u64) -> CommitteeView {
    let members: Vec<CommitteeMember> = names
        .iter()
        .enumerate()
        .map(|(i, name)| CommitteeMember {
            name: name.to_string(),
            eth_address: format!("{:040x}", i + 1).parse().unwrap(),
            orbs_address: Some(orbs_address(i)),
        })
        .collect();
    let topology: HashMap<OrbsAddress, CommitteeMember> = members
        .iter()
        .enumerate()
        .map(|(i, member)| (orbs_address(i), member.clone()))
        .collect();
    CommitteeView::new(members, topology, ref_time, ref_time / 12, SystemTime::now())
}

/// Some time inside `epoch`.
pub(crate) fn time_in_epoch(epoch: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + EPOCH_DURATION * epoch as u32 + Duration::from_secs(7)
}

pub(crate) fn abis() -> AbiStore {
    let vault: Abi = serde_json::from_str(
        r#"[
            { "type": "function", "name": "harvest", "inputs": [] },
            { "type": "function", "name": "rebalance",
              "inputs": [ { "name": "pool", "type": "address" }, { "name": "weight", "type": "uint256" } ] }
        ]"#,
    )
    .unwrap();
    AbiStore::from_entries([("vault".to_string(), vault)])
}

/// A second vault, for tasks that call more than one contract.
pub(crate) const OTHER_VAULT: &str = "0x6666666666666666666666666666666666666666";

/// One task calling `harvest()` on [`VAULT`] every `interval_epochs` epochs.
pub(crate) fn harvest_tasks(interval_epochs: u64) -> Vec<TaskDefinition> {
    harvest_tasks_on(interval_epochs, &[VAULT])
}

/// One task calling `harvest()` on each of `addresses`, in order, every `interval_epochs` epochs.
pub(crate) fn harvest_tasks_on(interval_epochs: u64, addresses: &[&str]) -> Vec<TaskDefinition> {
    let addresses = addresses
        .iter()
        .map(|address| format!("\"{}\"", address))
        .collect::<Vec<_>>()
        .join(", ");
    let tasks = format!(
        r#"{{ "tasks": [
            {{ "name": "harvest", "intervalEpochs": {}, "networks": ["{}"], "addresses": [{}],
               "abi": "vault", "send": [ {{ "method": "harvest" }} ] }}
        ] }}"#,
        interval_epochs, NETWORK, addresses
    );
    let networks: HashSet<String> = [NETWORK.to_string()].into_iter().collect();
    parse_tasks(&tasks, EPOCH_DURATION, &networks, &abis()).unwrap()
}

pub(crate) fn random_signer() -> LocalSigner {
    LocalSigner::from_signing_key(SigningKey::random(&mut OsRng))
}

/// Lifecycle timings short enough for tests.
pub(crate) fn fast_tx_config(max_retries: u32) -> TxLifecycleConfig {
    TxLifecycleConfig::builder()
        .max_retries(max_retries)
        .receipt_poll_interval(Duration::from_millis(1))
        .receipt_timeout(Duration::from_millis(20))
        .retry_backoff(Duration::from_millis(1))
        .build()
}

pub(crate) fn epoch(int: u64) -> EpochIndex {
    EpochIndex::new(int)
}
