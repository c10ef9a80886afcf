/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Debug-mode signer that holds a secp256k1 private key in memory.
//!
//! Produces legacy (pre-EIP-2718) transactions with EIP-155 replay protection:
//!
//! ```text
//! signing_hash = keccak256(rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]))
//! raw          = rlp([nonce, gasPrice, gasLimit, to, value, data, v, r, s])   with v = recid + 35 + 2 * chainId
//! hash         = keccak256(raw)
//! ```
//!
//! Never use this in production: the key is read from the environment.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Encodable, Header};
use k256::ecdsa::{SigningKey, VerifyingKey};

use super::{SignedTransaction, SignerError, TxSigner};
use crate::{
    chain::TxRequest,
    types::data_types::{EthAddress, TxHash},
};

pub struct LocalSigner {
    key: SigningKey,
    address: EthAddress,
}

impl LocalSigner {
    /// Create a signer from a hex-encoded 32-byte private key (with or without `0x`).
    pub fn from_hex(private_key: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|err| SignerError::Key(err.to_string()))?;
        let key = SigningKey::from_slice(&bytes).map_err(|err| SignerError::Key(err.to_string()))?;
        Ok(Self::from_signing_key(key))
    }

    pub fn from_signing_key(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    pub fn sender(&self) -> EthAddress {
        self.address
    }

    /// Sign `tx` for `chain_id` and return the raw transaction.
    fn sign_legacy(&self, tx: &TxRequest, chain_id: u64) -> Result<Bytes, SignerError> {
        let prehash = signing_hash(tx, chain_id);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(prehash.as_slice())
            .map_err(|err| SignerError::SigningFailed(err.to_string()))?;

        let v = chain_id
            .checked_mul(2)
            .and_then(|v| v.checked_add(35 + recovery_id.to_byte() as u64))
            .ok_or_else(|| SignerError::SigningFailed(format!("chain id {} too large", chain_id)))?;
        let signature_bytes = signature.to_bytes();
        let r = U256::from_be_slice(&signature_bytes[..32]);
        let s = U256::from_be_slice(&signature_bytes[32..]);

        let raw = rlp_list(|out| {
            encode_unsigned_fields(tx, out);
            v.encode(out);
            r.encode(out);
            s.encode(out);
        });
        Ok(Bytes::from(raw))
    }
}

impl TxSigner for LocalSigner {
    fn sign(&mut self, tx: &TxRequest, chain_id: u64) -> Result<SignedTransaction, SignerError> {
        let raw = self.sign_legacy(tx, chain_id)?;
        let hash = TxHash::new(keccak256(&raw));
        Ok(SignedTransaction { raw, hash })
    }

    fn address(&self) -> Option<EthAddress> {
        Some(self.address)
    }
}

/// The EIP-155 hash that is signed for `tx` on `chain_id`.
pub fn signing_hash(tx: &TxRequest, chain_id: u64) -> B256 {
    let payload = rlp_list(|out| {
        encode_unsigned_fields(tx, out);
        chain_id.encode(out);
        0u8.encode(out);
        0u8.encode(out);
    });
    keccak256(payload)
}

fn encode_unsigned_fields(tx: &TxRequest, out: &mut Vec<u8>) {
    tx.nonce.encode(out);
    tx.gas_price.encode(out);
    tx.gas_limit.encode(out);
    tx.to.address().encode(out);
    tx.value.encode(out);
    tx.data.encode(out);
}

fn rlp_list(encode_fields: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut payload = Vec::new();
    encode_fields(&mut payload);
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

fn address_of(key: &VerifyingKey) -> EthAddress {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    EthAddress::new(Address::from_slice(&hash[12..]))
}
