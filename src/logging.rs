/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the keeper's
//! [configuration](crate::config::KeeperConfig::log_events).
//!
//! The keeper logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations). The
//! `guardian-keeper` binary sets up [fern](https://docs.rs/fern).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [LeaderChanged](crate::events::LeaderChangedEvent) is printed:
//!
//! ```text
//! LeaderChanged, 1701329264, 90, 2, guardian-c, true
//! ```
//!
//! In the snippet:
//! - The third value is the epoch index.
//! - The fourth and fifth values are the index and name of the new leader (`-` if undetermined).
//! - The sixth value is whether this keeper is the leader.

use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const LEADER_CHANGED: &str = "LeaderChanged";
pub const COMMITTEE_REFRESHED: &str = "CommitteeRefreshed";
pub const COMMITTEE_REFRESH_FAILED: &str = "CommitteeRefreshFailed";
pub const EXEC_TASK: &str = "ExecTask";
pub const SEND_TX: &str = "SendTx";
pub const TICK_FAILED: &str = "TickFailed";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for LeaderChangedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |leader_changed_event: &LeaderChangedEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                LEADER_CHANGED,
                secs_since_unix_epoch(leader_changed_event.timestamp),
                leader_changed_event.epoch_index,
                or_dash(leader_changed_event.leader_index),
                or_dash(leader_changed_event.leader_name.as_deref()),
                leader_changed_event.is_leader
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitteeRefreshedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |committee_refreshed_event: &CommitteeRefreshedEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMITTEE_REFRESHED,
                secs_since_unix_epoch(committee_refreshed_event.timestamp),
                committee_refreshed_event.committee_size,
                committee_refreshed_event.ref_time,
                committee_refreshed_event.ref_block
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitteeRefreshFailedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |refresh_failed_event: &CommitteeRefreshFailedEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                COMMITTEE_REFRESH_FAILED,
                secs_since_unix_epoch(refresh_failed_event.timestamp),
                refresh_failed_event.consecutive_failures,
                refresh_failed_event.error
            )
        };
        Box::new(logger)
    }
}

impl Logger for ExecTaskEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |exec_task_event: &ExecTaskEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                EXEC_TASK,
                secs_since_unix_epoch(exec_task_event.timestamp),
                exec_task_event.task_name,
                exec_task_event.epoch_index,
                exec_task_event.calls,
                exec_task_event.failures
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendTxEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_tx_event: &SendTxEvent| {
            let outcome = match (send_tx_event.success, send_tx_event.dry_run) {
                (true, true) => "dry-run",
                (true, false) => "success",
                (false, _) => "fail",
            };
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}, {}",
                SEND_TX,
                secs_since_unix_epoch(send_tx_event.timestamp),
                send_tx_event.network,
                send_tx_event.contract_address,
                send_tx_event.method,
                outcome,
                or_dash(send_tx_event.tx_hash),
                send_tx_event.retry
            )
        };
        Box::new(logger)
    }
}

impl Logger for TickFailedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |tick_failed_event: &TickFailedEvent| {
            log::error!(
                "{}, {}, {}, {}",
                TICK_FAILED,
                secs_since_unix_epoch(tick_failed_event.timestamp),
                tick_failed_event.tick,
                tick_failed_event.error
            )
        };
        Box::new(logger)
    }
}

pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|since| since.as_secs())
        .unwrap_or_default()
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |value| value.to_string())
}
