/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reading the guardian roster from the management service.
//!
//! ## Refresh semantics
//!
//! [`CommitteeTracker::refresh`] asks a [`CommitteeSource`] for a fresh [`CommitteeView`]:
//! - On success the new view replaces the old one in a single `Arc` swap.
//! - On failure the previous view is kept as-is (including its `last_poll_time`), a consecutive failure
//!   counter is incremented, and the error is handed back to the caller, which treats it as non-fatal.
//!
//! ## Payload format
//!
//! `GET {endpoint}/status` returns:
//!
//! ```text
//! { "Payload": {
//!     "CurrentRefTime": 1700000000,
//!     "CurrentRefBlock": 123456,
//!     "CurrentCommittee": [ { "EthAddress": "9f09..", "Name": "guardian-a" }, ... ],
//!     "CurrentTopology":  [ { "EthAddress": "9f09..", "OrbsAddress": "11f4..", "Name": "guardian-a" }, ... ],
//!     "Guardians": { "9f09..": { "EthAddress": "9f09..", "OrbsAddress": "11f4..", "Name": "guardian-a" }, ... }
//! } }
//! ```
//!
//! Topology entries are taken from both `CurrentTopology` and `Guardians`, whichever are present.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use serde::Deserialize;

use crate::types::{
    committee::{CommitteeMember, CommitteeView},
    data_types::{EthAddress, OrbsAddress},
};

/// Something that can produce a fresh [`CommitteeView`]. Implemented over HTTP by
/// [`HttpManagementClient`], and by scripted stubs in tests.
pub trait CommitteeSource: Send {
    fn fetch(&mut self, now: SystemTime) -> Result<CommitteeView, ManagementError>;
}

/// Reads `GET {endpoint}/status` with a blocking HTTP client.
pub struct HttpManagementClient {
    status_url: String,
    http_client: reqwest::blocking::Client,
}

impl HttpManagementClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ManagementError> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ManagementError::Network(err.to_string()))?;
        Ok(Self {
            status_url: format!("{}/status", endpoint.trim_end_matches('/')),
            http_client,
        })
    }
}

impl CommitteeSource for HttpManagementClient {
    fn fetch(&mut self, now: SystemTime) -> Result<CommitteeView, ManagementError> {
        let response = self
            .http_client
            .get(&self.status_url)
            .send()
            .map_err(|err| ManagementError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ManagementError::Status {
                url: self.status_url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .map_err(|err| ManagementError::Network(err.to_string()))?;
        parse_management_status(&body, now)
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(rename = "Payload")]
    payload: StatusPayload,
}

#[derive(Deserialize)]
struct StatusPayload {
    #[serde(rename = "CurrentRefTime", default)]
    current_ref_time: u64,
    #[serde(rename = "CurrentRefBlock", default)]
    current_ref_block: u64,
    #[serde(rename = "CurrentCommittee")]
    current_committee: Vec<RawNode>,
    #[serde(rename = "CurrentTopology", default)]
    current_topology: Vec<RawNode>,
    #[serde(rename = "Guardians", default)]
    guardians: HashMap<String, RawNode>,
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(rename = "EthAddress")]
    eth_address: String,
    #[serde(rename = "OrbsAddress", default)]
    orbs_address: Option<String>,
    #[serde(rename = "Name", default)]
    name: String,
}

impl RawNode {
    fn into_member(self) -> Result<CommitteeMember, ManagementError> {
        let eth_address = self
            .eth_address
            .parse::<EthAddress>()
            .map_err(|err| ManagementError::Parse(format!("EthAddress {}: {}", self.eth_address, err)))?;
        let orbs_address = match self.orbs_address.as_deref() {
            None | Some("") => None,
            Some(orbs) => Some(
                orbs.parse::<OrbsAddress>()
                    .map_err(|err| ManagementError::Parse(format!("OrbsAddress {}: {}", orbs, err)))?,
            ),
        };
        Ok(CommitteeMember {
            name: self.name,
            eth_address,
            orbs_address,
        })
    }
}

/// Parse the management service's status document into a [`CommitteeView`] polled at `now`.
///
/// Validation happens here, once: everything deeper in the keeper works with typed members.
pub fn parse_management_status(body: &str, now: SystemTime) -> Result<CommitteeView, ManagementError> {
    let response: StatusResponse =
        serde_json::from_str(body).map_err(|err| ManagementError::Parse(err.to_string()))?;
    let payload = response.payload;

    let committee = payload
        .current_committee
        .into_iter()
        .map(RawNode::into_member)
        .collect::<Result<Vec<_>, _>>()?;

    let mut topology = HashMap::new();
    let listed = payload
        .current_topology
        .into_iter()
        .chain(payload.guardians.into_values());
    for node in listed {
        let member = node.into_member()?;
        if let Some(orbs_address) = member.orbs_address {
            topology.insert(orbs_address, member);
        }
    }

    Ok(CommitteeView::new(
        committee,
        topology,
        payload.current_ref_time,
        payload.current_ref_block,
        now,
    ))
}

/// Owns the last-known-good [`CommitteeView`] across ticks.
pub struct CommitteeTracker {
    view: Arc<CommitteeView>,
    consecutive_failures: u64,
}

impl CommitteeTracker {
    pub fn new() -> Self {
        Self {
            view: Arc::new(CommitteeView::empty()),
            consecutive_failures: 0,
        }
    }

    /// The current view. Cheap to clone and never observed half-updated.
    pub fn view(&self) -> Arc<CommitteeView> {
        self.view.clone()
    }

    /// Try to replace the current view with a fresh one from `source`.
    ///
    /// A view whose reference time is older than the current one is rejected as
    /// [`ManagementError::StaleData`].
    pub fn refresh(
        &mut self,
        source: &mut dyn CommitteeSource,
        now: SystemTime,
    ) -> Result<Arc<CommitteeView>, ManagementError> {
        let result = source.fetch(now).and_then(|fresh| {
            if fresh.ref_time() < self.view.ref_time() {
                Err(ManagementError::StaleData {
                    current_ref_time: self.view.ref_time(),
                    received_ref_time: fresh.ref_time(),
                })
            } else {
                Ok(fresh)
            }
        });

        match result {
            Ok(fresh) => {
                self.view = Arc::new(fresh);
                self.consecutive_failures = 0;
                Ok(self.view.clone())
            }
            Err(err) => {
                self.consecutive_failures += 1;
                Err(err)
            }
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    /// `now - last_poll_time` of the current view, or `None` if no refresh has ever succeeded.
    pub fn staleness(&self, now: SystemTime) -> Option<Duration> {
        if self.view.last_poll_time() == SystemTime::UNIX_EPOCH {
            return None;
        }
        Some(
            now.duration_since(self.view.last_poll_time())
                .unwrap_or(Duration::ZERO),
        )
    }
}

impl Default for CommitteeTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Enumerates the ways a committee refresh can fail. All of them are transient: the keeper keeps the
/// previous view and tries again on the next tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagementError {
    #[error("management service unreachable: {0}")]
    Network(String),

    #[error("management service {url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed management payload: {0}")]
    Parse(String),

    #[error("management data went back in time (ref time {received_ref_time} < {current_ref_time})")]
    StaleData {
        current_ref_time: u64,
        received_ref_time: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "Payload": {
            "CurrentRefTime": 1700000000,
            "CurrentRefBlock": 99,
            "CurrentCommittee": [
                { "EthAddress": "1111111111111111111111111111111111111111", "Name": "a" },
                { "EthAddress": "2222222222222222222222222222222222222222", "Name": "b" }
            ],
            "CurrentTopology": [
                { "EthAddress": "1111111111111111111111111111111111111111",
                  "OrbsAddress": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "Name": "a" }
            ],
            "Guardians": {
                "2222222222222222222222222222222222222222": {
                    "EthAddress": "2222222222222222222222222222222222222222",
                    "OrbsAddress": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", "Name": "b" }
            }
        }
    }"#;

    struct Scripted(Vec<Result<CommitteeView, ManagementError>>);

    impl CommitteeSource for Scripted {
        fn fetch(&mut self, _: SystemTime) -> Result<CommitteeView, ManagementError> {
            self.0.remove(0)
        }
    }

    #[test]
    fn payload_preserves_committee_order_and_merges_topology() {
        let view = parse_management_status(PAYLOAD, SystemTime::now()).unwrap();
        let names: Vec<&str> = view.committee().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(view.ref_time(), 1700000000);
        assert_eq!(view.ref_block(), 99);

        let b: OrbsAddress = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".parse().unwrap();
        assert_eq!(
            view.guardian_address(&b),
            Some("2222222222222222222222222222222222222222".parse().unwrap())
        );
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        let err = parse_management_status("{\"Payload\": {}}", SystemTime::now()).unwrap_err();
        assert!(matches!(err, ManagementError::Parse(_)));
        let err = parse_management_status("not json", SystemTime::now()).unwrap_err();
        assert!(matches!(err, ManagementError::Parse(_)));
    }

    #[test]
    fn failed_refresh_keeps_previous_view() {
        let polled_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let first = parse_management_status(PAYLOAD, polled_at).unwrap();
        let mut source = Scripted(vec![
            Ok(first),
            Err(ManagementError::Network("connection refused".to_string())),
        ]);

        let mut tracker = CommitteeTracker::new();
        assert_eq!(tracker.staleness(polled_at), None);
        tracker.refresh(&mut source, polled_at).unwrap();

        let later = polled_at + Duration::from_secs(30);
        assert!(tracker.refresh(&mut source, later).is_err());
        assert_eq!(tracker.consecutive_failures(), 1);
        assert_eq!(tracker.view().last_poll_time(), polled_at);
        assert_eq!(tracker.view().len(), 2);
        assert_eq!(tracker.staleness(later), Some(Duration::from_secs(30)));
    }

    #[test]
    fn older_ref_time_is_stale() {
        let now = SystemTime::now();
        let newer = parse_management_status(PAYLOAD, now).unwrap();
        let older = CommitteeView::new(Vec::new(), HashMap::new(), 5, 5, now);
        let mut source = Scripted(vec![Ok(newer), Ok(older)]);

        let mut tracker = CommitteeTracker::new();
        tracker.refresh(&mut source, now).unwrap();
        let err = tracker.refresh(&mut source, now).unwrap_err();
        assert!(matches!(err, ManagementError::StaleData { .. }));
        assert_eq!(tracker.view().len(), 2);
    }
}
