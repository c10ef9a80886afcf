/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](ChainClient) for the chain RPC collaborator, plus the types that cross it.
//!
//! The keeper keeps one `ChainClient` per configured network. [`rpc::JsonRpcClient`] implements it over
//! Ethereum JSON-RPC; tests plug in in-memory chains.

use alloy_primitives::{Bytes, U256};

use crate::types::data_types::{EthAddress, TxHash};

pub mod abi;

pub mod rpc;

/// The subset of the chain's RPC surface that the keeper needs.
pub trait ChainClient: Send {
    /// Chain id used for replay protection when signing.
    fn chain_id(&mut self) -> Result<u64, ChainError>;

    /// Balance of `address` in wei.
    fn balance(&mut self, address: &EthAddress) -> Result<U256, ChainError>;

    /// Current gas price in wei. Never cached by callers across calls.
    fn gas_price(&mut self) -> Result<u128, ChainError>;

    /// Number of transactions sent from `address`, counted at the "latest" block (the mempool is
    /// deliberately ignored).
    fn transaction_count(&mut self, address: &EthAddress) -> Result<u64, ChainError>;

    /// Look up a transaction by hash. `None` if the node does not know it.
    fn transaction(&mut self, hash: &TxHash) -> Result<Option<TransactionInfo>, ChainError>;

    /// Look up the receipt of a transaction. `None` while it has not been mined.
    fn transaction_receipt(&mut self, hash: &TxHash) -> Result<Option<TransactionReceipt>, ChainError>;

    /// Submit an already-signed raw transaction.
    fn send_raw_transaction(&mut self, raw: &Bytes) -> Result<TxHash, ChainError>;
}

/// What the keeper needs to know about a transaction the node has seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInfo {
    pub hash: TxHash,
    /// `None` while the transaction is pending.
    pub block_number: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub hash: TxHash,
    pub block_number: Option<u64>,
    /// `Some(false)` if the transaction reverted. `None` on pre-Byzantium chains.
    pub success: Option<bool>,
    pub gas_used: Option<u64>,
}

/// Unsigned transaction fields, as built by the transaction lifecycle and handed to a signer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxRequest {
    pub to: EthAddress,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub value: U256,
    pub data: Bytes,
}

/// Enumerates the ways a chain RPC call can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The endpoint could not be reached or timed out.
    #[error("chain transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error (e.g. "already known", "transaction underpriced").
    #[error("chain rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something that is not what the method promises.
    #[error("unexpected chain response: {0}")]
    Parse(String),
}

/// Parse a `0x`-prefixed hex quantity.
pub(crate) fn parse_quantity(value: &str) -> Result<U256, ChainError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::Parse(format!("quantity without 0x prefix: {}", value)))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|err| ChainError::Parse(format!("quantity {}: {}", value, err)))
}

pub(crate) fn parse_quantity_u64(value: &str) -> Result<u64, ChainError> {
    let quantity = parse_quantity(value)?;
    u64::try_from(quantity).map_err(|_| ChainError::Parse(format!("{} does not fit in 64 bits", value)))
}

/// Gas prices on high-fee networks can exceed what a `u64` holds, so they are parsed into `u128`.
pub(crate) fn parse_quantity_u128(value: &str) -> Result<u128, ChainError> {
    let quantity = parse_quantity(value)?;
    u128::try_from(quantity)
        .map_err(|_| ChainError::Parse(format!("{} does not fit in 128 bits", value)))
}

/// Format a number as a `0x`-prefixed hex quantity.
pub(crate) fn to_quantity<T: std::fmt::LowerHex>(value: T) -> String {
    format!("0x{:x}", value)
}
