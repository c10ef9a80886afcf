/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The guardian roster as reported by the management service.
//!
//! A [`CommitteeView`] is an immutable snapshot. Every successful refresh builds a new one and swaps it
//! in whole (see [`crate::management`]), so readers never observe a half-updated roster.

use std::{
    collections::HashMap,
    time::SystemTime,
};

use serde::Serialize;

use super::data_types::{EthAddress, OrbsAddress};

/// A member of the ordered committee. The position of a member in [`CommitteeView::committee`] is what
/// the leader rotation indexes into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommitteeMember {
    pub name: String,
    pub eth_address: EthAddress,
    pub orbs_address: Option<OrbsAddress>,
}

/// Refreshable snapshot of the guardian roster, plus the management service's reference point.
#[derive(Clone, Debug)]
pub struct CommitteeView {
    committee: Vec<CommitteeMember>,
    topology: HashMap<OrbsAddress, CommitteeMember>,
    ref_time: u64,
    ref_block: u64,
    last_poll_time: SystemTime,
}

impl CommitteeView {
    /// Create a new `CommitteeView`. `committee` order is preserved exactly as given.
    pub fn new(
        committee: Vec<CommitteeMember>,
        topology: HashMap<OrbsAddress, CommitteeMember>,
        ref_time: u64,
        ref_block: u64,
        last_poll_time: SystemTime,
    ) -> Self {
        Self {
            committee,
            topology,
            ref_time,
            ref_block,
            last_poll_time,
        }
    }

    /// A view with no committee and no topology. Leadership is undetermined while this is the current view.
    pub fn empty() -> Self {
        Self::new(Vec::new(), HashMap::new(), 0, 0, SystemTime::UNIX_EPOCH)
    }

    pub fn committee(&self) -> &[CommitteeMember] {
        &self.committee
    }

    pub fn len(&self) -> usize {
        self.committee.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committee.is_empty()
    }

    pub fn member(&self, index: usize) -> Option<&CommitteeMember> {
        self.committee.get(index)
    }

    pub fn ref_time(&self) -> u64 {
        self.ref_time
    }

    pub fn ref_block(&self) -> u64 {
        self.ref_block
    }

    /// When the management service was last successfully polled to build this view.
    pub fn last_poll_time(&self) -> SystemTime {
        self.last_poll_time
    }

    /// Look up the topology entry of the node identified by `orbs_address`.
    ///
    /// Returns `None` if the node is not (yet) provisioned in the topology. This is a valid state, not an
    /// error: it simply means this node cannot claim leadership.
    pub fn guardian(&self, orbs_address: &OrbsAddress) -> Option<&CommitteeMember> {
        self.topology.get(orbs_address)
    }

    /// Resolve the Ethereum identity of the node identified by `orbs_address`.
    pub fn guardian_address(&self, orbs_address: &OrbsAddress) -> Option<EthAddress> {
        self.guardian(orbs_address).map(|member| member.eth_address)
    }

    /// Whether `eth_address` is a member of the current committee.
    pub fn in_committee(&self, eth_address: &EthAddress) -> bool {
        self.committee
            .iter()
            .any(|member| &member.eth_address == eth_address)
    }
}

impl Default for CommitteeView {
    fn default() -> Self {
        Self::empty()
    }
}
