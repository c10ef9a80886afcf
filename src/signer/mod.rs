/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](TxSigner) for the transaction signing collaborator.
//!
//! Production keepers never hold the guardian key: they delegate signing to a signer service
//! ([`remote::RemoteSigner`]). In debug mode a [`local::LocalSigner`] holding a private key can be dropped in
//! instead.

use alloy_primitives::Bytes;

use crate::{
    chain::TxRequest,
    types::data_types::{EthAddress, TxHash},
};

pub mod local;

pub mod remote;

pub trait TxSigner: Send {
    /// Sign `tx` for the chain identified by `chain_id`.
    fn sign(&mut self, tx: &TxRequest, chain_id: u64) -> Result<SignedTransaction, SignerError>;

    /// The address transactions signed by this signer are sent from, if the signer knows it.
    ///
    /// A remote signer signs for the guardian's address, which the keeper learns from the management
    /// service instead.
    fn address(&self) -> Option<EthAddress> {
        None
    }
}

/// A signed transaction, ready to be broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("signer unreachable: {0}")]
    Transport(String),

    #[error("signer rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid signing key: {0}")]
    Key(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}
