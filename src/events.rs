/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of keeper events for event handling, logging, and BI telemetry.
//!
//! An event for a given action indicates that the action has been completed. Events are published by the
//! keeper thread onto a channel and handled on the [event bus](crate::event_bus) thread, so a slow handler
//! (e.g. an unreachable BI collector) never delays a tick.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::types::data_types::{EpochIndex, EthAddress, LeaderIndex, TxHash};

pub enum Event {
    // Leadership.
    LeaderChanged(LeaderChangedEvent),
    // Committee view refresh.
    CommitteeRefreshed(CommitteeRefreshedEvent),
    CommitteeRefreshFailed(CommitteeRefreshFailedEvent),
    // Task execution.
    ExecTask(ExecTaskEvent),
    SendTx(SendTxEvent),
    // Keeper loop.
    TickFailed(TickFailedEvent),
}

impl Event {
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away after the keeper thread has been joined.
            let _ = event_publisher.send(self);
        }
    }
}

/// The leader of the current epoch, or this keeper's own role, changed.
#[derive(Clone, Debug)]
pub struct LeaderChangedEvent {
    pub timestamp: SystemTime,
    pub epoch_index: EpochIndex,
    pub leader_index: Option<LeaderIndex>,
    pub leader_name: Option<String>,
    pub is_leader: bool,
}

#[derive(Clone, Debug)]
pub struct CommitteeRefreshedEvent {
    pub timestamp: SystemTime,
    pub committee_size: usize,
    pub ref_time: u64,
    pub ref_block: u64,
}

/// A refresh failed and the previous committee view was kept.
#[derive(Clone, Debug)]
pub struct CommitteeRefreshFailedEvent {
    pub timestamp: SystemTime,
    pub consecutive_failures: u64,
    pub error: String,
}

/// A due task was executed by this keeper as leader.
#[derive(Clone, Debug)]
pub struct ExecTaskEvent {
    pub timestamp: SystemTime,
    pub task_name: String,
    pub epoch_index: EpochIndex,
    pub calls: usize,
    pub failures: usize,
}

/// A contract call reached its final outcome, successful or not.
#[derive(Clone, Debug)]
pub struct SendTxEvent {
    pub timestamp: SystemTime,
    pub task_name: String,
    pub network: String,
    pub contract_address: EthAddress,
    pub method: String,
    pub params: String,
    pub tx_hash: Option<TxHash>,
    pub success: bool,
    pub dry_run: bool,
    pub retry: u32,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct TickFailedEvent {
    pub timestamp: SystemTime,
    pub tick: u64,
    pub error: String,
}
