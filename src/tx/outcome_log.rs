/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bounded logs of the most recent successful and failed contract calls, reported in the status document.

use std::{collections::VecDeque, fmt::Display};

use serde::Serialize;

use crate::types::data_types::{EthAddress, TxHash};

/// How many records each of the success and failure logs keeps.
pub const TX_LOG_CAPACITY: usize = 10;

/// The outcome of one contract call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub network: String,
    pub contract_address: EthAddress,
    pub method: String,
    pub params: String,
    pub tx_hash: Option<TxHash>,
    pub retry: u32,
    pub dry_run: bool,
}

impl Display for TxRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.timestamp, self.network, self.contract_address, self.method, self.params
        )
    }
}

/// Two FIFO ring buffers: once full, recording a new entry evicts the oldest.
#[derive(Clone, Debug)]
pub struct TxOutcomeLog {
    capacity: usize,
    successes: VecDeque<TxRecord>,
    failures: VecDeque<TxRecord>,
}

impl TxOutcomeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            successes: VecDeque::with_capacity(capacity),
            failures: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record_success(&mut self, record: TxRecord) {
        push_bounded(&mut self.successes, record, self.capacity);
    }

    pub fn record_failure(&mut self, record: TxRecord) {
        push_bounded(&mut self.failures, record, self.capacity);
    }

    /// Successful calls, oldest first.
    pub fn successes(&self) -> impl Iterator<Item = &TxRecord> {
        self.successes.iter()
    }

    /// Failed calls, oldest first.
    pub fn failures(&self) -> impl Iterator<Item = &TxRecord> {
        self.failures.iter()
    }
}

impl Default for TxOutcomeLog {
    fn default() -> Self {
        Self::new(TX_LOG_CAPACITY)
    }
}

fn push_bounded(buffer: &mut VecDeque<TxRecord>, record: TxRecord, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(record);
}
