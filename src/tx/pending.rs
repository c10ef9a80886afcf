/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Broadcast-but-unresolved transactions, at most one per task call.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::data_types::{EpochIndex, EthAddress, TxHash};

/// Identifies one call of one task: the unit that may have at most one transaction in flight.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub task_name: String,
    pub network: String,
    pub contract_address: EthAddress,
    pub method: String,
    pub params: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub tx_hash: TxHash,
    pub task_name: String,
    pub submitted_at_epoch: EpochIndex,
}

#[derive(Clone, Debug, Default)]
pub struct PendingTransactions {
    entries: HashMap<CallKey, PendingTransaction>,
}

impl PendingTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `pending` as the in-flight transaction of `key`, replacing an earlier attempt's.
    pub fn insert(&mut self, key: CallKey, pending: PendingTransaction) {
        self.entries.insert(key, pending);
    }

    pub fn remove(&mut self, key: &CallKey) -> Option<PendingTransaction> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &CallKey) -> Option<&PendingTransaction> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &CallKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether any call of the task named `task_name` has a transaction in flight.
    pub fn has_task(&self, task_name: &str) -> bool {
        self.entries.values().any(|pending| pending.task_name == task_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingTransaction> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
