/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Stateless, clock-derived agreement on the current duty leader.
//!
//! ## Leader selection
//!
//! Leadership rotates through the ordered committee in terms of `D` epochs each (the
//! [dwell length](DwellLength)):
//!
//! ```text
//! leader_index = floor(epoch_index / D) mod |committee|
//! ```
//!
//! Every keeper computes this from the same two inputs (wall-clock time and the committee roster) without
//! exchanging messages. Agreement is therefore only as good as the clock synchronization between keepers
//! and the freshness of their rosters: around term boundaries two keepers may briefly disagree.
//!
//! ## Transitions
//!
//! [`LeaderElection::evaluate`] is called once per tick. When the leader does not change it only records the
//! new epoch. When it does, it publishes a [`LeaderChangedEvent`] and, if this keeper just lost leadership,
//! clears every task schedule in the [`TaskScheduler`] so that regaining leadership later does not fire a
//! burst of stale tasks.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    events::{Event, LeaderChangedEvent},
    scheduler::TaskScheduler,
    types::{
        committee::{CommitteeMember, CommitteeView},
        data_types::{DwellLength, EpochIndex, EthAddress, LeaderIndex},
    },
};

/// Deterministically select the position of the leader of `epoch` in a committee of `committee_len`
/// members.
///
/// Returns `None` if the committee is empty (leadership undetermined).
pub fn select_leader(
    epoch: EpochIndex,
    dwell_length: DwellLength,
    committee_len: usize,
) -> Option<LeaderIndex> {
    if committee_len == 0 || dwell_length.int() == 0 {
        return None;
    }
    let term = epoch / dwell_length;
    Some(LeaderIndex::new((term % committee_len as u64) as usize))
}

/// Who leads in which epoch, from this keeper's point of view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderState {
    pub epoch_index: EpochIndex,
    pub leader_index: Option<LeaderIndex>,
    pub leader: Option<CommitteeMember>,
    pub is_leader: bool,
}

impl LeaderState {
    /// The state before the first evaluation: no leader known, not leading.
    pub fn undetermined() -> Self {
        Self {
            epoch_index: EpochIndex::new(0),
            leader_index: None,
            leader: None,
            is_leader: false,
        }
    }

    pub fn leader_name(&self) -> Option<&str> {
        self.leader.as_ref().map(|member| member.name.as_str())
    }
}

impl Default for LeaderState {
    fn default() -> Self {
        Self::undetermined()
    }
}

/// Outcome of one [`LeaderElection::evaluate`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeadershipTransition {
    /// Same leader as before.
    Unchanged,
    /// A different member leads now; this keeper's own role did not change.
    LeaderChanged,
    /// This keeper became the leader.
    Gained,
    /// This keeper was the leader and is not anymore.
    Lost,
}

pub struct LeaderElection {
    dwell_length: DwellLength,
    force_leader: bool,
    state: LeaderState,
    event_publisher: Option<Sender<Event>>,
}

impl LeaderElection {
    /// Create a new `LeaderElection`.
    ///
    /// If `force_leader` is set (debug mode) this keeper always considers itself the leader, regardless of
    /// the committee.
    pub fn new(
        dwell_length: DwellLength,
        force_leader: bool,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            dwell_length,
            force_leader,
            state: LeaderState::undetermined(),
            event_publisher,
        }
    }

    pub fn state(&self) -> &LeaderState {
        &self.state
    }

    /// Recompute the leader of `epoch` over `view`, given this keeper's resolved `guardian_address`.
    ///
    /// A `guardian_address` of `None` means this node is not (yet) in the topology. It can then never be
    /// leader, unless `force_leader` is set.
    pub fn evaluate(
        &mut self,
        view: &CommitteeView,
        epoch: EpochIndex,
        guardian_address: Option<EthAddress>,
        scheduler: &mut TaskScheduler,
    ) -> LeadershipTransition {
        let was_leader = self.state.is_leader;

        // 1. Empty committee: leadership is undetermined. Keep the previous leader index, but never lead.
        let Some(leader_index) = select_leader(epoch, self.dwell_length, view.len()) else {
            self.state.epoch_index = epoch;
            self.state.is_leader = self.force_leader;
            return self.finish(was_leader, false, scheduler);
        };

        let leader = view.member(leader_index.int()).cloned();
        let is_leader = self.force_leader
            || match (&leader, guardian_address) {
                (Some(leader), Some(me)) => leader.eth_address == me,
                _ => false,
            };

        // 2. Same leader as last time: short-circuit without notifying anyone.
        let unchanged = self.state.leader_index == Some(leader_index)
            && self.state.leader == leader
            && self.state.is_leader == is_leader;
        self.state.epoch_index = epoch;
        if unchanged {
            return LeadershipTransition::Unchanged;
        }

        // 3. Leader changed: record the new leader and notify.
        self.state.leader_index = Some(leader_index);
        self.state.leader = leader;
        self.state.is_leader = is_leader;
        self.finish(was_leader, true, scheduler)
    }

    fn finish(
        &mut self,
        was_leader: bool,
        leader_changed: bool,
        scheduler: &mut TaskScheduler,
    ) -> LeadershipTransition {
        let transition = match (was_leader, self.state.is_leader) {
            (true, false) => LeadershipTransition::Lost,
            (false, true) => LeadershipTransition::Gained,
            _ if leader_changed => LeadershipTransition::LeaderChanged,
            _ => LeadershipTransition::Unchanged,
        };

        if transition == LeadershipTransition::Lost {
            scheduler.clear();
        }

        if transition != LeadershipTransition::Unchanged {
            Event::LeaderChanged(LeaderChangedEvent {
                timestamp: SystemTime::now(),
                epoch_index: self.state.epoch_index,
                leader_index: self.state.leader_index,
                leader_name: self.state.leader_name().map(str::to_string),
                is_leader: self.state.is_leader,
            })
            .publish(&self.event_publisher);
        }

        transition
    }
}
