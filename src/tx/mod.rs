/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Drives a single contract call through build, sign, broadcast, and confirmation, with bounded retry.
//!
//! ## Attempt state machine
//!
//! ```text
//! BUILD ──► SIGN ──► BROADCAST ──► AWAIT_RECEIPT ──► CONFIRMED
//!   │         │          │               │
//!   └─────────┴──────────┴───────────────┴──► attempt failed ──► (backoff) retry, or Exhausted
//! ```
//!
//! - **Build**: the gas price is fetched fresh for every attempt and multiplied by
//!   [`gas_price_multiplier`](TxLifecycleConfig::gas_price_multiplier). The gas limit is the configured hard
//!   ceiling, and the nonce is the sender's transaction count at the `"latest"` block.
//! - **Sign**: delegated to a [`TxSigner`].
//! - **Broadcast**: a rejected broadcast ("already known", "underpriced", ...) fails the attempt only.
//! - **Await receipt**: the transaction must be both mined and have a receipt within
//!   [`receipt_timeout`](TxLifecycleConfig::receipt_timeout). Otherwise the attempt times out.
//!
//! Every attempt error is accumulated into [`AttemptInfo::errors`]. A receipt that reports a revert ends
//! the call immediately: re-sending the same call data would revert again.
//!
//! ## Nonces
//!
//! The `"latest"` count ignores the mempool. If an earlier attempt is still pending when the call is
//! retried, the retry reuses its nonce and replaces it (at the fresh gas price), which is the intended
//! outcome. Two calls from the same sender must never run concurrently; the keeper loop guarantees this by
//! running every call of every task sequentially on one thread.
//!
//! ## Dry run
//!
//! Outside production the lifecycle builds and signs the transaction, logs it, and reports success without
//! broadcasting or waiting for a receipt.

use std::{
    sync::mpsc::Sender,
    thread,
    time::{Duration, Instant, SystemTime},
};

use alloy_primitives::{Bytes, U256};
use chrono::{SecondsFormat, Utc};
use typed_builder::TypedBuilder;

use crate::{
    chain::{ChainClient, ChainError, TransactionReceipt, TxRequest},
    events::{Event, SendTxEvent},
    signer::{SignerError, TxSigner},
    types::{
        data_types::{EpochIndex, EthAddress, TxHash},
        task::ParamSet,
    },
};

pub mod outcome_log;
use outcome_log::{TxOutcomeLog, TxRecord};

pub mod pending;
use pending::{CallKey, PendingTransaction, PendingTransactions};

#[derive(Clone, Debug, TypedBuilder)]
pub struct TxLifecycleConfig {
    /// Total number of attempts per call.
    #[builder(default = 5)]
    pub max_retries: u32,
    #[builder(default = 1.1)]
    pub gas_price_multiplier: f64,
    /// Attempts whose multiplied gas price exceeds this fail with [`TxError::GasPriceTooHigh`].
    #[builder(default)]
    pub max_gas_price_wei: Option<u128>,
    #[builder(default = 2_000_000)]
    pub gas_limit: u64,
    #[builder(default = Duration::from_secs(5))]
    pub receipt_poll_interval: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub receipt_timeout: Duration,
    #[builder(default = Duration::from_secs(10))]
    pub retry_backoff: Duration,
    /// Sign and log, but never broadcast.
    #[builder(default = false)]
    pub dry_run: bool,
}

/// One on-chain call of a task, with its call data already encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractCall {
    pub task_name: String,
    pub network: String,
    pub contract_address: EthAddress,
    pub method: String,
    pub params: ParamSet,
    pub data: Bytes,
}

impl ContractCall {
    pub fn key(&self) -> CallKey {
        CallKey {
            task_name: self.task_name.clone(),
            network: self.network.clone(),
            contract_address: self.contract_address,
            method: self.method.clone(),
            params: self.params.to_string(),
        }
    }
}

/// Diagnostics accumulated over the attempts of one call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptInfo {
    /// Number of attempts made so far.
    pub retry: u32,
    pub errors: Vec<String>,
}

/// A call that completed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxConfirmation {
    pub tx_hash: TxHash,
    /// `None` in dry-run mode.
    pub receipt: Option<TransactionReceipt>,
    pub dry_run: bool,
    pub info: AttemptInfo,
}

enum AttemptOutcome {
    Confirmed(TxHash, TransactionReceipt),
    Reverted(TxHash),
    DryRun(TxHash),
}

pub struct TransactionLifecycle {
    config: TxLifecycleConfig,
    pending: PendingTransactions,
    outcomes: TxOutcomeLog,
    event_publisher: Option<Sender<Event>>,
}

impl TransactionLifecycle {
    pub fn new(config: TxLifecycleConfig, event_publisher: Option<Sender<Event>>) -> Self {
        Self {
            config,
            pending: PendingTransactions::new(),
            outcomes: TxOutcomeLog::default(),
            event_publisher,
        }
    }

    pub fn config(&self) -> &TxLifecycleConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingTransactions {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingTransactions {
        &mut self.pending
    }

    pub fn outcomes(&self) -> &TxOutcomeLog {
        &self.outcomes
    }

    /// Drive `call`, sent from `sender`, to completion, making at most
    /// [`max_retries`](TxLifecycleConfig::max_retries) attempts.
    ///
    /// The outcome is appended to the [outcome log](TxOutcomeLog) and published as a [`SendTxEvent`]
    /// whichever way it goes.
    pub fn complete_tx(
        &mut self,
        chain: &mut dyn ChainClient,
        signer: &mut dyn TxSigner,
        call: &ContractCall,
        sender: EthAddress,
        epoch: EpochIndex,
    ) -> Result<TxConfirmation, TxError> {
        let key = call.key();
        let mut info = AttemptInfo::default();

        while info.retry < self.config.max_retries {
            info.retry += 1;
            match self.attempt(chain, signer, call, &key, sender, epoch) {
                Ok(AttemptOutcome::Confirmed(tx_hash, receipt)) => {
                    self.pending.remove(&key);
                    log::info!(
                        "{} {}.{} confirmed in block {:?} after {} attempt(s): {}",
                        call.network,
                        call.contract_address,
                        call.method,
                        receipt.block_number,
                        info.retry,
                        tx_hash
                    );
                    self.finish(call, Some(tx_hash), true, false, &info);
                    return Ok(TxConfirmation {
                        tx_hash,
                        receipt: Some(receipt),
                        dry_run: false,
                        info,
                    });
                }
                Ok(AttemptOutcome::DryRun(tx_hash)) => {
                    self.finish(call, Some(tx_hash), true, true, &info);
                    return Ok(TxConfirmation {
                        tx_hash,
                        receipt: None,
                        dry_run: true,
                        info,
                    });
                }
                Ok(AttemptOutcome::Reverted(tx_hash)) => {
                    self.pending.remove(&key);
                    let err = TxError::Reverted { hash: tx_hash };
                    log::error!("{} {}.{}: {}", call.network, call.contract_address, call.method, err);
                    info.errors.push(err.to_string());
                    self.finish(call, Some(tx_hash), false, false, &info);
                    return Err(err);
                }
                Err(err) => {
                    log::warn!(
                        "{} {}.{} attempt {}/{} failed: {}",
                        call.network,
                        call.contract_address,
                        call.method,
                        info.retry,
                        self.config.max_retries,
                        err
                    );
                    info.errors.push(err.to_string());
                    if info.retry < self.config.max_retries {
                        thread::sleep(self.config.retry_backoff);
                    }
                }
            }
        }

        let last_hash = self.pending.remove(&key).map(|pending| pending.tx_hash);
        self.finish(call, last_hash, false, false, &info);
        Err(TxError::Exhausted {
            attempts: info.retry,
            errors: info.errors,
        })
    }

    fn attempt(
        &mut self,
        chain: &mut dyn ChainClient,
        signer: &mut dyn TxSigner,
        call: &ContractCall,
        key: &CallKey,
        sender: EthAddress,
        epoch: EpochIndex,
    ) -> Result<AttemptOutcome, TxError> {
        // Build.
        let chain_id = chain.chain_id()?;
        let tx = build_tx(&self.config, chain, call, sender)?;
        log::debug!(
            "built tx to {} nonce {} gas price {} gas limit {}",
            tx.to,
            tx.nonce,
            tx.gas_price,
            tx.gas_limit
        );

        // Sign.
        let signed = signer.sign(&tx, chain_id)?;

        if self.config.dry_run {
            log::info!(
                "dry run, not broadcasting {} {}.{}({}) nonce {}: {}",
                call.network,
                call.contract_address,
                call.method,
                call.params,
                tx.nonce,
                signed.hash
            );
            return Ok(AttemptOutcome::DryRun(signed.hash));
        }

        // Broadcast.
        let broadcast_hash = chain
            .send_raw_transaction(&signed.raw)
            .map_err(TxError::Broadcast)?;
        if broadcast_hash != signed.hash {
            log::warn!(
                "node reported hash {} for transaction signed as {}",
                broadcast_hash,
                signed.hash
            );
        }
        self.pending.insert(
            key.clone(),
            PendingTransaction {
                tx_hash: signed.hash,
                task_name: call.task_name.clone(),
                submitted_at_epoch: epoch,
            },
        );

        // Await receipt.
        let receipt = self.await_receipt(chain, &signed.hash)?;
        if receipt.success == Some(false) {
            Ok(AttemptOutcome::Reverted(signed.hash))
        } else {
            Ok(AttemptOutcome::Confirmed(signed.hash, receipt))
        }
    }

    fn await_receipt(
        &self,
        chain: &mut dyn ChainClient,
        hash: &TxHash,
    ) -> Result<TransactionReceipt, TxError> {
        let started = Instant::now();
        loop {
            match poll_receipt(chain, hash) {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => log::debug!("{} still pending", hash),
                Err(err) => log::debug!("polling {} failed: {}", hash, err),
            }

            let waited = started.elapsed();
            if waited >= self.config.receipt_timeout {
                return Err(TxError::ReceiptTimeout {
                    hash: *hash,
                    waited,
                });
            }
            thread::sleep(
                self.config
                    .receipt_poll_interval
                    .min(self.config.receipt_timeout - waited),
            );
        }
    }

    fn finish(
        &mut self,
        call: &ContractCall,
        tx_hash: Option<TxHash>,
        success: bool,
        dry_run: bool,
        info: &AttemptInfo,
    ) {
        let record = TxRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            network: call.network.clone(),
            contract_address: call.contract_address,
            method: call.method.clone(),
            params: call.params.to_string(),
            tx_hash,
            retry: info.retry,
            dry_run,
        };
        if success {
            self.outcomes.record_success(record);
        } else {
            self.outcomes.record_failure(record);
        }

        Event::SendTx(SendTxEvent {
            timestamp: SystemTime::now(),
            task_name: call.task_name.clone(),
            network: call.network.clone(),
            contract_address: call.contract_address,
            method: call.method.clone(),
            params: call.params.to_string(),
            tx_hash,
            success,
            dry_run,
            retry: info.retry,
            errors: info.errors.clone(),
        })
        .publish(&self.event_publisher);
    }
}

fn build_tx(
    config: &TxLifecycleConfig,
    chain: &mut dyn ChainClient,
    call: &ContractCall,
    sender: EthAddress,
) -> Result<TxRequest, TxError> {
    let network_price = chain.gas_price()?;
    let gas_price = apply_multiplier(network_price, config.gas_price_multiplier).ok_or(
        TxError::GasPriceOverflow {
            gas_price: network_price,
        },
    )?;
    if let Some(max) = config.max_gas_price_wei {
        if gas_price > max {
            return Err(TxError::GasPriceTooHigh { gas_price, max });
        }
    }
    let nonce = chain.transaction_count(&sender)?;

    Ok(TxRequest {
        to: call.contract_address,
        nonce,
        gas_price,
        gas_limit: config.gas_limit,
        value: U256::ZERO,
        data: call.data.clone(),
    })
}

/// `gas_price * multiplier`, computed in integer thousandths. `None` on overflow.
fn apply_multiplier(gas_price: u128, multiplier: f64) -> Option<u128> {
    if !multiplier.is_finite() || multiplier < 0.0 {
        return None;
    }
    let per_mille = (multiplier * 1000.0).round() as u128;
    gas_price.checked_mul(per_mille).map(|scaled| scaled / 1000)
}

/// `Some` once the transaction is mined and its receipt is available.
fn poll_receipt(
    chain: &mut dyn ChainClient,
    hash: &TxHash,
) -> Result<Option<TransactionReceipt>, ChainError> {
    match chain.transaction(hash)? {
        Some(tx) if tx.block_number.is_some() => chain.transaction_receipt(hash),
        _ => Ok(None),
    }
}

/// Enumerates the ways a contract call, or one attempt of it, can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    #[error("chain query failed: {0}")]
    Chain(#[from] ChainError),

    #[error("signing failed: {0}")]
    Signing(#[from] SignerError),

    #[error("broadcast rejected: {0}")]
    Broadcast(ChainError),

    #[error("gas price {gas_price} exceeds the configured maximum {max}")]
    GasPriceTooHigh { gas_price: u128, max: u128 },

    #[error("gas price {gas_price} overflows when multiplied")]
    GasPriceOverflow { gas_price: u128 },

    #[error("{hash} not mined within {waited:?}")]
    ReceiptTimeout { hash: TxHash, waited: Duration },

    #[error("{hash} reverted")]
    Reverted { hash: TxHash },

    #[error("gave up after {attempts} attempts: {}", .errors.join("; "))]
    Exhausted { attempts: u32, errors: Vec<String> },
}
