/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fire-and-forget forwarding of selected events to a business-intelligence collector.
//!
//! Each event becomes one JSON object POSTed to the configured URL, tagged with a `type` (`leaderChanged`,
//! `execTask` or `sendTX`) and this keeper's node name. Delivery failures are logged and dropped.

use std::time::Duration;

use serde_json::{json, Value};

use crate::{
    event_bus::HandlerPtr,
    events::{ExecTaskEvent, LeaderChangedEvent, SendTxEvent},
    logging::secs_since_unix_epoch,
};

#[derive(Clone)]
pub struct BiSink {
    url: String,
    node_name: String,
    http_client: reqwest::blocking::Client,
}

impl BiSink {
    pub fn new(url: &str, node_name: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.to_string(),
            node_name: node_name.to_string(),
            http_client,
        })
    }

    pub(crate) fn leader_changed_handler(&self) -> HandlerPtr<LeaderChangedEvent> {
        let sink = self.clone();
        Box::new(move |event: &LeaderChangedEvent| sink.post(sink.leader_changed_body(event)))
    }

    pub(crate) fn exec_task_handler(&self) -> HandlerPtr<ExecTaskEvent> {
        let sink = self.clone();
        Box::new(move |event: &ExecTaskEvent| sink.post(sink.exec_task_body(event)))
    }

    pub(crate) fn send_tx_handler(&self) -> HandlerPtr<SendTxEvent> {
        let sink = self.clone();
        Box::new(move |event: &SendTxEvent| sink.post(sink.send_tx_body(event)))
    }

    fn leader_changed_body(&self, event: &LeaderChangedEvent) -> Value {
        json!({
            "type": "leaderChanged",
            "nodeName": self.node_name,
            "timestamp": secs_since_unix_epoch(event.timestamp),
            "epochIndex": event.epoch_index.int(),
            "leaderIndex": event.leader_index.map(|index| index.int()),
            "leaderName": event.leader_name,
            "isLeader": event.is_leader,
        })
    }

    fn exec_task_body(&self, event: &ExecTaskEvent) -> Value {
        json!({
            "type": "execTask",
            "nodeName": self.node_name,
            "timestamp": secs_since_unix_epoch(event.timestamp),
            "taskName": event.task_name,
            "epochIndex": event.epoch_index.int(),
            "calls": event.calls,
            "failures": event.failures,
        })
    }

    fn send_tx_body(&self, event: &SendTxEvent) -> Value {
        json!({
            "type": "sendTX",
            "nodeName": self.node_name,
            "timestamp": secs_since_unix_epoch(event.timestamp),
            "taskName": event.task_name,
            "network": event.network,
            "contractAddress": event.contract_address,
            "method": event.method,
            "params": event.params,
            "txHash": event.tx_hash,
            "success": event.success,
            "dryRun": event.dry_run,
            "retry": event.retry,
            "errors": event.errors,
        })
    }

    fn post(&self, body: Value) {
        let result = self
            .http_client
            .post(&self.url)
            .json(&body)
            .send()
            .and_then(|response| response.error_for_status());
        if let Err(err) = result {
            log::warn!("BI event dropped: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::types::data_types::EpochIndex;

    #[test]
    fn send_tx_body_carries_retry_and_errors() {
        let sink = BiSink::new("http://127.0.0.1:9/bi", "guardian-a", Duration::from_secs(1)).unwrap();
        let body = sink.send_tx_body(&SendTxEvent {
            timestamp: SystemTime::UNIX_EPOCH,
            task_name: "harvest".to_string(),
            network: "bsc".to_string(),
            contract_address: format!("{:040x}", 1).parse().unwrap(),
            method: "harvest".to_string(),
            params: "null".to_string(),
            tx_hash: None,
            success: false,
            dry_run: false,
            retry: 5,
            errors: vec!["underpriced".to_string()],
        });
        assert_eq!(body["type"], "sendTX");
        assert_eq!(body["nodeName"], "guardian-a");
        assert_eq!(body["retry"], 5);
        assert_eq!(body["errors"][0], "underpriced");
        assert_eq!(body["contractAddress"], "0x0000000000000000000000000000000000000001");
        assert!(body["txHash"].is_null());

        let body = sink.exec_task_body(&ExecTaskEvent {
            timestamp: SystemTime::UNIX_EPOCH,
            task_name: "harvest".to_string(),
            epoch_index: EpochIndex::new(10),
            calls: 2,
            failures: 0,
        });
        assert_eq!(body["epochIndex"], 10);
    }
}
