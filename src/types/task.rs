/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Recurring maintenance task definitions, loaded once from `tasks.json` and never mutated afterwards.
//!
//! The file format is:
//!
//! ```text
//! { "tasks": [
//!     { "name": "harvest", "active": true, "intervalEpochs": 5,
//!       "networks": ["bsc"], "addresses": ["0x..."], "abi": "vault",
//!       "send": [ { "method": "harvest" }, { "method": "setPool", "params": ["0x...", ["0x...", 3]] } ] }
//! ] }
//! ```
//!
//! Exactly one of `intervalEpochs` or `intervalMinutes` must be given. Minute intervals are converted into
//! epochs when the list is loaded.

use std::{collections::HashSet, fs, path::Path, time::Duration};

use alloy_primitives::Address;
use serde::Deserialize;
use serde_json::Value;

use crate::{chain::abi::AbiStore, types::data_types::EthAddress};

/// A single recurring task, validated.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskDefinition {
    pub name: String,
    pub active: bool,
    pub interval_epochs: u64,
    pub networks: Vec<String>,
    pub addresses: Vec<EthAddress>,
    pub abi: String,
    pub send: Vec<TaskCall>,
}

impl TaskDefinition {
    /// Number of on-chain calls one execution of this task issues.
    pub fn call_count(&self) -> usize {
        let per_address: usize = self.send.iter().map(|call| call.param_sets().len()).sum();
        self.networks.len() * self.addresses.len() * per_address
    }
}

/// One method invocation of a task, optionally repeated once per parameter set.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TaskCall {
    pub method: String,
    #[serde(default)]
    pub params: Option<Vec<ParamSet>>,
}

impl TaskCall {
    /// The parameter sets this call is issued with. A call without `params` is issued once, with no
    /// arguments.
    pub fn param_sets(&self) -> Vec<ParamSet> {
        match &self.params {
            Some(sets) => sets.clone(),
            None => vec![ParamSet::none()],
        }
    }
}

/// Arguments of a single contract call, as written in the task file.
///
/// `null` means no arguments, a JSON array is positional arguments, and any other value is a single
/// argument.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(Value);

impl ParamSet {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn none() -> Self {
        Self(Value::Null)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Positional arguments.
    pub fn args(&self) -> Vec<Value> {
        match &self.0 {
            Value::Null => Vec::new(),
            Value::Array(values) => values.clone(),
            other => vec![other.clone()],
        }
    }

    pub fn is_none(&self) -> bool {
        self.0.is_null()
    }
}

impl std::fmt::Display for ParamSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Value::Null => f.write_str("null"),
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

#[derive(Deserialize)]
struct TaskFile {
    tasks: Vec<RawTask>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    name: String,
    #[serde(default = "default_active")]
    active: bool,
    interval_epochs: Option<Value>,
    interval_minutes: Option<Value>,
    networks: Vec<String>,
    addresses: Vec<String>,
    abi: String,
    send: Vec<TaskCall>,
}

fn default_active() -> bool {
    true
}

/// Load and validate the task list at `path`.
///
/// Every network a task names must be in `known_networks`, and every ABI it names must be in `abis`.
pub fn load_tasks(
    path: &Path,
    epoch_duration: Duration,
    known_networks: &HashSet<String>,
    abis: &AbiStore,
) -> Result<Vec<TaskDefinition>, TaskFileError> {
    let text = fs::read_to_string(path).map_err(|err| TaskFileError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    parse_tasks(&text, epoch_duration, known_networks, abis)
}

/// Parse and validate a task list from its JSON text.
pub fn parse_tasks(
    text: &str,
    epoch_duration: Duration,
    known_networks: &HashSet<String>,
    abis: &AbiStore,
) -> Result<Vec<TaskDefinition>, TaskFileError> {
    let file: TaskFile =
        serde_json::from_str(text).map_err(|err| TaskFileError::Parse(err.to_string()))?;

    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(file.tasks.len());
    for raw in file.tasks {
        if !seen.insert(raw.name.clone()) {
            return Err(TaskFileError::DuplicateTask { task: raw.name });
        }
        tasks.push(validate_task(raw, epoch_duration, known_networks, abis)?);
    }
    Ok(tasks)
}

fn validate_task(
    raw: RawTask,
    epoch_duration: Duration,
    known_networks: &HashSet<String>,
    abis: &AbiStore,
) -> Result<TaskDefinition, TaskFileError> {
    let interval_epochs = match (&raw.interval_epochs, &raw.interval_minutes) {
        (Some(epochs), None) => positive_integer(&raw.name, "intervalEpochs", epochs)?,
        (None, Some(minutes)) => {
            let minutes = positive_integer(&raw.name, "intervalMinutes", minutes)?;
            minutes_to_epochs(&raw.name, minutes, epoch_duration)?
        }
        _ => {
            return Err(TaskFileError::InvalidInterval {
                task: raw.name,
                reason: "exactly one of intervalEpochs or intervalMinutes is required".to_string(),
            })
        }
    };

    if let Some(network) = raw.networks.iter().find(|n| !known_networks.contains(*n)) {
        return Err(TaskFileError::UnknownNetwork {
            task: raw.name.clone(),
            network: network.clone(),
        });
    }

    if abis.get(&raw.abi).is_none() {
        return Err(TaskFileError::UnknownAbi {
            task: raw.name,
            abi: raw.abi,
        });
    }

    let addresses = raw
        .addresses
        .iter()
        .map(|address| {
            address
                .parse::<EthAddress>()
                .ok()
                .filter(|a| a.address() != Address::ZERO)
                .ok_or_else(|| TaskFileError::InvalidAddress {
                    task: raw.name.clone(),
                    address: address.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TaskDefinition {
        name: raw.name,
        active: raw.active,
        interval_epochs,
        networks: raw.networks,
        addresses,
        abi: raw.abi,
        send: raw.send,
    })
}

fn positive_integer(task: &str, field: &str, value: &Value) -> Result<u64, TaskFileError> {
    value
        .as_u64()
        .filter(|n| *n > 0)
        .ok_or_else(|| TaskFileError::InvalidInterval {
            task: task.to_string(),
            reason: format!("{} must be a positive integer, got {}", field, value),
        })
}

fn minutes_to_epochs(task: &str, minutes: u64, epoch_duration: Duration) -> Result<u64, TaskFileError> {
    let interval_ms = minutes as u128 * 60_000;
    let epoch_ms = epoch_duration.as_millis();
    if epoch_ms == 0 || interval_ms % epoch_ms != 0 {
        return Err(TaskFileError::InvalidInterval {
            task: task.to_string(),
            reason: format!(
                "intervalMinutes {} is not a whole number of {}ms epochs",
                minutes, epoch_ms
            ),
        });
    }
    Ok((interval_ms / epoch_ms) as u64)
}

/// Enumerates the ways loading the task list can fail. All of these are startup errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskFileError {
    #[error("cannot read task file {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed task file: {0}")]
    Parse(String),

    #[error("task {task} is declared more than once")]
    DuplicateTask { task: String },

    #[error("task {task} has an invalid interval: {reason}")]
    InvalidInterval { task: String, reason: String },

    #[error("task {task} refers to unknown network {network}")]
    UnknownNetwork { task: String, network: String },

    #[error("task {task} refers to ABI {abi}, which was not found in the ABI directory")]
    UnknownAbi { task: String, abi: String },

    #[error("task {task} has an invalid contract address {address}")]
    InvalidAddress { task: String, address: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (HashSet<String>, AbiStore) {
        let networks = ["bsc".to_string()].into_iter().collect();
        let abis = AbiStore::from_entries([(
            "vault".to_string(),
            serde_json::from_str(
                r#"[{"type":"function","name":"harvest","inputs":[]}]"#,
            )
            .unwrap(),
        )]);
        (networks, abis)
    }

    #[test]
    fn minutes_are_converted_to_epochs() {
        let (networks, abis) = fixtures();
        let text = r#"{"tasks":[{"name":"h","intervalMinutes":10,"networks":["bsc"],
            "addresses":["0x1111111111111111111111111111111111111111"],"abi":"vault",
            "send":[{"method":"harvest"}]}]}"#;
        let tasks = parse_tasks(text, Duration::from_secs(120), &networks, &abis).unwrap();
        assert_eq!(tasks[0].interval_epochs, 5);
        assert!(tasks[0].active);
        assert_eq!(tasks[0].call_count(), 1);
    }

    #[test]
    fn non_numeric_interval_is_rejected() {
        let (networks, abis) = fixtures();
        let text = r#"{"tasks":[{"name":"h","intervalEpochs":"five","networks":["bsc"],
            "addresses":[],"abi":"vault","send":[]}]}"#;
        let err = parse_tasks(text, Duration::from_secs(60), &networks, &abis).unwrap_err();
        assert!(matches!(err, TaskFileError::InvalidInterval { .. }));
    }

    #[test]
    fn unknown_network_and_abi_are_rejected() {
        let (networks, abis) = fixtures();
        let text = r#"{"tasks":[{"name":"h","intervalEpochs":1,"networks":["eth"],
            "addresses":[],"abi":"vault","send":[]}]}"#;
        let err = parse_tasks(text, Duration::from_secs(60), &networks, &abis).unwrap_err();
        assert!(matches!(err, TaskFileError::UnknownNetwork { .. }));

        let text = r#"{"tasks":[{"name":"h","intervalEpochs":1,"networks":["bsc"],
            "addresses":[],"abi":"pool","send":[]}]}"#;
        let err = parse_tasks(text, Duration::from_secs(60), &networks, &abis).unwrap_err();
        assert!(matches!(err, TaskFileError::UnknownAbi { .. }));
    }

    #[test]
    fn param_sets_expand_calls() {
        let call: TaskCall =
            serde_json::from_str(r#"{"method":"setPool","params":["0xab", [1, 2], null]}"#).unwrap();
        let sets = call.param_sets();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0].args().len(), 1);
        assert_eq!(sets[1].args().len(), 2);
        assert!(sets[2].is_none());

        let bare: TaskCall = serde_json::from_str(r#"{"method":"harvest"}"#).unwrap();
        assert_eq!(bare.param_sets(), vec![ParamSet::none()]);
    }
}
