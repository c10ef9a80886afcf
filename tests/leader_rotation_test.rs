use std::collections::BTreeMap;

use guardian_keeper::{
    chain::ChainClient,
    epoch_clock::EpochClock,
    keeper::{KeeperLoop, KeeperSpec},
    leader::select_leader,
    types::data_types::{DwellLength, EpochIndex},
};
use log::LevelFilter;

mod common;

use crate::common::{
    fixtures::{
        abis, committee, fast_tx_config, harvest_tasks, orbs_address, random_signer,
        time_in_epoch, EPOCH_DURATION, NETWORK,
    },
    logging::setup_logger,
    mock_chain::MockChain,
    mock_management::MockManagement,
    mock_status::MemoryStatusSink,
};

const NAMES: [&str; 4] = ["guardian-a", "guardian-b", "guardian-c", "guardian-d"];

fn keeper(node: usize, dwell_length: u32, chain: &MockChain) -> KeeperLoop {
    let mut chains: BTreeMap<String, Box<dyn ChainClient>> = BTreeMap::new();
    chains.insert(NETWORK.to_string(), Box::new(chain.clone()));

    KeeperSpec::builder()
        .epoch_clock(EpochClock::new(EPOCH_DURATION).unwrap())
        .dwell_length(DwellLength::new(dwell_length))
        .node_orbs_address(orbs_address(node))
        .tasks(harvest_tasks(1))
        .abis(abis())
        .committee_source(MockManagement::new(committee(&NAMES, 1_000)))
        .chains(chains)
        .signer(random_signer())
        .status_sink(MemoryStatusSink::default())
        .tx_config(fast_tx_config(1))
        .build()
        .into_keeper_loop()
}

#[test]
fn exactly_one_keeper_leads_each_epoch() {
    setup_logger(LevelFilter::Info);

    // 1. Start one keeper per guardian, all sharing the same chain, with terms of 2 epochs.
    let chain = MockChain::new();
    let mut keepers: Vec<KeeperLoop> = (0..NAMES.len()).map(|node| keeper(node, 2, &chain)).collect();

    // 2. Tick every keeper through 3 full rotations.
    for epoch in 0..24 {
        let leaders: Vec<usize> = keepers
            .iter_mut()
            .enumerate()
            .filter_map(|(node, keeper)| keeper.tick_at(time_in_epoch(epoch)).is_leader.then_some(node))
            .collect();

        let expected = select_leader(EpochIndex::new(epoch), DwellLength::new(2), NAMES.len())
            .unwrap()
            .int();
        assert_eq!(leaders, vec![expected], "epoch {}", epoch);
        assert_eq!(expected, (epoch as usize / 2) % NAMES.len());

        // Every keeper agrees on who leads.
        for keeper in &keepers {
            assert_eq!(
                keeper.state().leader_state().leader_name(),
                Some(NAMES[expected])
            );
        }
    }

    // 3. Only the leader of each epoch executed the per-epoch task.
    assert_eq!(chain.sent(), 24);
}
