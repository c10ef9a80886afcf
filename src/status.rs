/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The externally visible health report of a keeper.
//!
//! ## Status document
//!
//! After every `statusWriteEveryTicks` ticks, and after every failed tick, the keeper hands a
//! [`StatusDocument`] to its [`StatusSink`]. The production sink ([`FileStatusSink`]) writes it as pretty
//! JSON to the configured path, where the node's status page picks it up:
//!
//! ```text
//! { "Status": "tickCount: 42, leaderName: guardian-c",
//!   "Timestamp": "2024-01-01T00:00:00Z",
//!   "Error": "...",                          (only after a failed tick)
//!   "Payload": { "Uptime": 2520, "UptimeText": "0 days : 0:42:0", "TickCount": 42, ... } }
//! ```
//!
//! ## Error memory
//!
//! [`Status`] remembers the error of the last failed tick and the most recent tick errors, bounded by
//! [`RECENT_ERRORS_CAPACITY`].

use std::{
    collections::{BTreeMap, VecDeque},
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use alloy_primitives::U256;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::{
    tx::pending::PendingTransaction,
    types::data_types::{EpochIndex, EthAddress, LeaderIndex},
};

pub const RECENT_ERRORS_CAPACITY: usize = 10;

/// Persists status documents.
pub trait StatusSink: Send {
    fn write(&mut self, document: &StatusDocument) -> Result<(), StatusError>;
}

/// Writes the status document as pretty JSON to a file, creating its parent directories if needed.
pub struct FileStatusSink {
    path: PathBuf,
}

impl FileStatusSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatusSink for FileStatusSink {
    fn write(&mut self, document: &StatusDocument) -> Result<(), StatusError> {
        let io_error = |err: std::io::Error| StatusError::Io {
            path: self.path.display().to_string(),
            message: err.to_string(),
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(document)
            .map_err(|err| StatusError::Serialize(err.to_string()))?;
        fs::write(&self.path, content).map_err(io_error)?;
        log::debug!("wrote status to {}", self.path.display());
        Ok(())
    }
}

/// Durable, status-only state of a keeper: when it started, how many ticks it ran, the balances it last
/// saw, and the errors it hit.
#[derive(Clone, Debug)]
pub struct Status {
    launch_time: SystemTime,
    tick_count: u64,
    balances: BTreeMap<String, U256>,
    last_error: Option<String>,
    recent_errors: VecDeque<String>,
}

impl Status {
    pub fn new(launch_time: SystemTime) -> Self {
        Self {
            launch_time,
            tick_count: 0,
            balances: BTreeMap::new(),
            last_error: None,
            recent_errors: VecDeque::with_capacity(RECENT_ERRORS_CAPACITY),
        }
    }

    pub fn launch_time(&self) -> SystemTime {
        self.launch_time
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Count a started tick and return its number (starting from 1).
    pub fn start_tick(&mut self) -> u64 {
        self.tick_count += 1;
        self.tick_count
    }

    pub fn set_balance(&mut self, network: &str, balance: U256) {
        self.balances.insert(network.to_string(), balance);
    }

    pub fn balances(&self) -> &BTreeMap<String, U256> {
        &self.balances
    }

    /// Record the error that failed the current tick.
    pub fn record_error(&mut self, error: String) {
        while self.recent_errors.len() >= RECENT_ERRORS_CAPACITY {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(error.clone());
        self.last_error = Some(error);
    }

    /// Forget the last error after a clean tick. Recent errors are kept.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn recent_errors(&self) -> impl Iterator<Item = &String> {
        self.recent_errors.iter()
    }

    pub fn uptime(&self, now: SystemTime) -> Duration {
        now.duration_since(self.launch_time).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusDocument {
    pub status: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub payload: StatusPayload,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusPayload {
    /// Seconds.
    pub uptime: u64,
    pub uptime_text: String,
    pub service_launch_time: String,
    pub version: Version,
    pub tick_count: u64,
    pub epoch_index: EpochIndex,
    pub is_leader: bool,
    pub leader_index: Option<LeaderIndex>,
    pub leader_name: Option<String>,
    pub my_eth_address: Option<EthAddress>,
    pub my_node_name: Option<String>,
    pub in_committee: bool,
    pub management_ref_time: u64,
    pub management_ref_block: u64,
    pub management_last_poll_time: Option<String>,
    pub management_staleness_seconds: Option<u64>,
    /// Wei, as decimal strings.
    pub balances: BTreeMap<String, String>,
    #[serde(rename = "SuccessTX")]
    pub success_tx: Vec<String>,
    #[serde(rename = "FailTX")]
    pub fail_tx: Vec<String>,
    pub recent_errors: Vec<String>,
    #[serde(rename = "PendingTX")]
    pub pending_tx: Vec<PendingTransaction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Version {
    pub semantic: String,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            semantic: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The one-line summary at the top of the document.
pub fn status_text(tick_count: u64, leader_name: Option<&str>) -> String {
    format!(
        "tickCount: {}, leaderName: {}",
        tick_count,
        leader_name.unwrap_or("")
    )
}

/// Uptime in the `D days : H:M:S` form shown on the status page.
pub fn uptime_text(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{} days : {}:{}:{}", days, hours, minutes, seconds)
}

/// RFC 3339 in UTC, to the second.
pub fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("cannot write status to {path}: {message}")]
    Io { path: String, message: String },

    #[error("cannot serialize status: {0}")]
    Serialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_text_format() {
        assert_eq!(uptime_text(Duration::from_secs(0)), "0 days : 0:0:0");
        assert_eq!(
            uptime_text(Duration::from_secs(2 * 86_400 + 3 * 3_600 + 4 * 60 + 5)),
            "2 days : 3:4:5"
        );
    }

    #[test]
    fn recent_errors_are_bounded() {
        let mut status = Status::new(SystemTime::now());
        for n in 0..15 {
            status.record_error(format!("error {}", n));
        }
        let recent: Vec<_> = status.recent_errors().cloned().collect();
        assert_eq!(recent.len(), RECENT_ERRORS_CAPACITY);
        assert_eq!(recent[0], "error 5");
        assert_eq!(status.last_error(), Some("error 14"));

        status.clear_error();
        assert_eq!(status.last_error(), None);
        assert_eq!(status.recent_errors().count(), RECENT_ERRORS_CAPACITY);
    }

    #[test]
    fn file_sink_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status").join("status.json");
        let mut sink = FileStatusSink::new(&path);
        let document = StatusDocument {
            status: status_text(1, Some("guardian-a")),
            timestamp: rfc3339(SystemTime::UNIX_EPOCH),
            error: None,
            payload: StatusPayload {
                uptime: 0,
                uptime_text: uptime_text(Duration::ZERO),
                service_launch_time: rfc3339(SystemTime::UNIX_EPOCH),
                version: Version::default(),
                tick_count: 1,
                epoch_index: EpochIndex::new(3),
                is_leader: false,
                leader_index: None,
                leader_name: None,
                my_eth_address: None,
                my_node_name: None,
                in_committee: false,
                management_ref_time: 0,
                management_ref_block: 0,
                management_last_poll_time: None,
                management_staleness_seconds: None,
                balances: BTreeMap::new(),
                success_tx: Vec::new(),
                fail_tx: Vec::new(),
                recent_errors: Vec::new(),
                pending_tx: Vec::new(),
            },
        };
        sink.write(&document).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["Status"], "tickCount: 1, leaderName: guardian-a");
        assert_eq!(written["Timestamp"], "1970-01-01T00:00:00Z");
        assert!(written.get("Error").is_none());
        assert_eq!(written["Payload"]["EpochIndex"], 3);
        assert_eq!(written["Payload"]["Version"]["Semantic"], env!("CARGO_PKG_VERSION"));
        assert!(written["Payload"]["SuccessTX"].is_array());
    }
}
