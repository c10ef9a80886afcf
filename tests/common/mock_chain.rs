use std::sync::{Arc, Mutex};

use alloy_primitives::{keccak256, Bytes, U256};
use guardian_keeper::{
    chain::{ChainClient, ChainError, TransactionInfo, TransactionReceipt},
    types::data_types::{EthAddress, TxHash},
};

/// Knobs and observations of a [`MockChain`], shared with the test that created it.
pub(crate) struct ChainState {
    pub(crate) chain_id: u64,
    pub(crate) gas_price: u128,
    pub(crate) nonce: u64,
    pub(crate) balance: U256,
    /// Whether broadcast transactions get mined.
    pub(crate) mine: bool,
    /// Whether mined transactions revert.
    pub(crate) revert: bool,
    /// Error every broadcast fails with, if any.
    pub(crate) send_error: Option<ChainError>,
    pub(crate) sent: Vec<TxHash>,
}

/// An in-memory chain that mines every broadcast transaction instantly (unless told not to).
#[derive(Clone)]
pub(crate) struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                chain_id: 56,
                gas_price: 5_000_000_000,
                nonce: 0,
                balance: U256::from(1_000_000_000_000_000_000u128),
                mine: true,
                revert: false,
                send_error: None,
                sent: Vec::new(),
            })),
        }
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub(crate) fn sent(&self) -> usize {
        self.with(|state| state.sent.len())
    }
}

impl ChainClient for MockChain {
    fn chain_id(&mut self) -> Result<u64, ChainError> {
        Ok(self.with(|state| state.chain_id))
    }

    fn balance(&mut self, _: &EthAddress) -> Result<U256, ChainError> {
        Ok(self.with(|state| state.balance))
    }

    fn gas_price(&mut self) -> Result<u128, ChainError> {
        Ok(self.with(|state| state.gas_price))
    }

    fn transaction_count(&mut self, _: &EthAddress) -> Result<u64, ChainError> {
        Ok(self.with(|state| state.nonce))
    }

    fn transaction(&mut self, hash: &TxHash) -> Result<Option<TransactionInfo>, ChainError> {
        Ok(self.with(|state| {
            state.sent.contains(hash).then(|| TransactionInfo {
                hash: *hash,
                block_number: state.mine.then_some(7),
            })
        }))
    }

    fn transaction_receipt(&mut self, hash: &TxHash) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.with(|state| {
            (state.mine && state.sent.contains(hash)).then(|| TransactionReceipt {
                hash: *hash,
                block_number: Some(7),
                success: Some(!state.revert),
                gas_used: Some(21_000),
            })
        }))
    }

    fn send_raw_transaction(&mut self, raw: &Bytes) -> Result<TxHash, ChainError> {
        self.with(|state| {
            if let Some(err) = &state.send_error {
                return Err(err.clone());
            }
            let hash = TxHash::new(keccak256(raw));
            state.sent.push(hash);
            if state.mine {
                state.nonce += 1;
            }
            Ok(hash)
        })
    }
}
