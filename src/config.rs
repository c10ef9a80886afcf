/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration as specified by the operator.
//!
//! The configuration file is JSON with camelCase keys. It is split up into smaller, subsystem specific
//! config structs (e.g. [`TxLifecycleConfig`]) before being passed to components. Everything the keeper
//! cannot run without is validated by [`KeeperConfig::validate`] before the keeper loop starts: a bad
//! configuration is a startup failure, never silently defaulted.
//!
//! Two settings come from the environment instead (see [`Environment`]):
//! - `KEEPER_DEBUG`: always lead, and sign with the private key in `KEEPER_DEBUG_PRIVATE_KEY`.
//! - `KEEPER_ENV=production`: actually broadcast transactions. Anything else is a dry run.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{tx::TxLifecycleConfig, types::data_types::OrbsAddress};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeeperConfig {
    pub management_service_endpoint: String,
    /// The local guardian's Orbs address: 40 hex characters, no `0x`.
    pub node_orbs_address: String,
    pub signer_endpoint: String,
    /// Chains the keeper sends transactions to, by the names tasks refer to them with.
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default = "default_status_json_path")]
    pub status_json_path: PathBuf,
    pub run_loop_poll_time_seconds: u64,
    pub epoch_duration_seconds: u64,
    /// Epochs per leadership term.
    pub dwell_length: u32,
    #[serde(default = "default_gas_price_multiplier")]
    pub gas_price_multiplier: f64,
    #[serde(default)]
    pub max_gas_price_wei: Option<u128>,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_tx_max_retries")]
    pub tx_max_retries: u32,
    #[serde(default = "default_receipt_poll_interval_seconds")]
    pub receipt_poll_interval_seconds: u64,
    #[serde(default = "default_receipt_timeout_seconds")]
    pub receipt_timeout_seconds: u64,
    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: u64,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default)]
    pub bi_url: Option<String>,
    /// Whether events are logged with the default [loggers](crate::logging).
    #[serde(default = "default_log_events")]
    pub log_events: bool,
    #[serde(default = "default_status_write_every_ticks")]
    pub status_write_every_ticks: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub rpc_endpoint: String,
}

fn default_status_json_path() -> PathBuf {
    PathBuf::from("./status/status.json")
}

fn default_gas_price_multiplier() -> f64 {
    1.1
}

fn default_gas_limit() -> u64 {
    2_000_000
}

fn default_tx_max_retries() -> u32 {
    5
}

fn default_receipt_poll_interval_seconds() -> u64 {
    5
}

fn default_receipt_timeout_seconds() -> u64 {
    60
}

fn default_retry_backoff_seconds() -> u64 {
    10
}

fn default_http_timeout_seconds() -> u64 {
    20
}

fn default_log_events() -> bool {
    true
}

fn default_status_write_every_ticks() -> u64 {
    1
}

impl KeeperConfig {
    /// Read, parse, and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a configuration from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: KeeperConfig =
            serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.management_service_endpoint.trim().is_empty() {
            return invalid("managementServiceEndpoint", "is empty");
        }
        if self.signer_endpoint.trim().is_empty() {
            return invalid("signerEndpoint", "is empty");
        }
        self.node_orbs_address()?;
        if self.networks.is_empty() {
            return invalid("networks", "no network is configured");
        }
        if let Some((name, _)) = self
            .networks
            .iter()
            .find(|(_, network)| network.rpc_endpoint.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                field: "networks",
                reason: format!("rpcEndpoint of {} is empty", name),
            });
        }
        if self.status_json_path.as_os_str().is_empty() {
            return invalid("statusJsonPath", "is empty");
        }
        if self.run_loop_poll_time_seconds == 0 {
            return invalid("runLoopPollTimeSeconds", "must be positive");
        }
        if self.epoch_duration_seconds == 0 {
            return invalid("epochDurationSeconds", "must be positive");
        }
        if self.dwell_length == 0 {
            return invalid("dwellLength", "must be positive");
        }
        if !self.gas_price_multiplier.is_finite() || self.gas_price_multiplier < 1.0 {
            return invalid("gasPriceMultiplier", "must be a finite number of at least 1.0");
        }
        if self.gas_limit == 0 {
            return invalid("gasLimit", "must be positive");
        }
        if self.tx_max_retries == 0 {
            return invalid("txMaxRetries", "must be positive");
        }
        if self.receipt_poll_interval_seconds == 0 {
            return invalid("receiptPollIntervalSeconds", "must be positive");
        }
        if self.http_timeout_seconds == 0 {
            return invalid("httpTimeoutSeconds", "must be positive");
        }
        if self.status_write_every_ticks == 0 {
            return invalid("statusWriteEveryTicks", "must be positive");
        }
        Ok(())
    }

    pub fn node_orbs_address(&self) -> Result<OrbsAddress, ConfigError> {
        let address = self.node_orbs_address.trim();
        if address.starts_with("0x") {
            return Err(ConfigError::Invalid {
                field: "nodeOrbsAddress",
                reason: "must not start with \"0x\"".to_string(),
            });
        }
        if address.len() != 40 {
            return Err(ConfigError::Invalid {
                field: "nodeOrbsAddress",
                reason: format!("has incorrect length: {}", address.len()),
            });
        }
        address.parse().map_err(|err| ConfigError::Invalid {
            field: "nodeOrbsAddress",
            reason: format!("{}", err),
        })
    }

    pub fn epoch_duration(&self) -> Duration {
        Duration::from_secs(self.epoch_duration_seconds)
    }

    pub fn run_loop_poll_time(&self) -> Duration {
        Duration::from_secs(self.run_loop_poll_time_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn tx_lifecycle_config(&self, dry_run: bool) -> TxLifecycleConfig {
        TxLifecycleConfig::builder()
            .max_retries(self.tx_max_retries)
            .gas_price_multiplier(self.gas_price_multiplier)
            .max_gas_price_wei(self.max_gas_price_wei)
            .gas_limit(self.gas_limit)
            .receipt_poll_interval(Duration::from_secs(self.receipt_poll_interval_seconds))
            .receipt_timeout(Duration::from_secs(self.receipt_timeout_seconds))
            .retry_backoff(Duration::from_secs(self.retry_backoff_seconds))
            .dry_run(dry_run)
            .build()
    }
}

/// Settings taken from environment variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    /// Always lead, and sign locally with [`debug_private_key`](Self::debug_private_key).
    pub debug: bool,
    pub debug_private_key: Option<String>,
    /// Broadcast transactions. Otherwise they are signed and logged only.
    pub production: bool,
}

impl Environment {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let debug = var("KEEPER_DEBUG")
            .map(|value| {
                let value = value.trim().to_ascii_lowercase();
                !value.is_empty() && value != "0" && value != "false"
            })
            .unwrap_or(false);
        Self {
            debug,
            debug_private_key: var("KEEPER_DEBUG_PRIVATE_KEY").filter(|key| !key.trim().is_empty()),
            production: var("KEEPER_ENV").as_deref() == Some("production"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}
