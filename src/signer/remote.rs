/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Client of the guardian's signer service.
//!
//! `POST {endpoint}/eth-sign` with the unsigned transaction fields (quantities as `0x` hex) and the chain id.
//! The service answers with the RLP-encoded signed transaction and its hash.

use std::time::Duration;

use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};

use super::{SignedTransaction, SignerError, TxSigner};
use crate::chain::{to_quantity, TxRequest};

pub struct RemoteSigner {
    url: String,
    http_client: reqwest::blocking::Client,
}

impl RemoteSigner {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, SignerError> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SignerError::Transport(err.to_string()))?;
        Ok(Self {
            url: format!("{}/eth-sign", endpoint.trim_end_matches('/')),
            http_client,
        })
    }
}

impl TxSigner for RemoteSigner {
    fn sign(&mut self, tx: &TxRequest, chain_id: u64) -> Result<SignedTransaction, SignerError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&SignRequest::new(tx, chain_id))
            .send()
            .map_err(|err| SignerError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| SignerError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(SignerError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }
        parse_sign_response(&body)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    transaction: TransactionFields,
    chain_id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionFields {
    to: String,
    gas_price: String,
    gas: String,
    nonce: String,
    data: String,
    value: String,
}

impl SignRequest {
    fn new(tx: &TxRequest, chain_id: u64) -> Self {
        Self {
            transaction: TransactionFields {
                to: tx.to.to_string(),
                gas_price: to_quantity(tx.gas_price),
                gas: to_quantity(tx.gas_limit),
                nonce: to_quantity(tx.nonce),
                data: format!("0x{}", hex::encode(&tx.data)),
                value: to_quantity(tx.value),
            },
            chain_id,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    raw_transaction: Option<String>,
    transaction_hash: Option<String>,
}

fn parse_sign_response(body: &str) -> Result<SignedTransaction, SignerError> {
    let response: SignResponse = serde_json::from_str(body)
        .map_err(|err| SignerError::SigningFailed(format!("malformed signer response: {}", err)))?;

    let (Some(raw), Some(hash)) = (response.raw_transaction, response.transaction_hash) else {
        return Err(SignerError::SigningFailed(
            "signer response lacks rawTransaction or transactionHash".to_string(),
        ));
    };

    let raw = hex::decode(raw.trim_start_matches("0x"))
        .map_err(|err| SignerError::SigningFailed(format!("rawTransaction: {}", err)))?;
    let hash = hash
        .parse()
        .map_err(|err| SignerError::SigningFailed(format!("transactionHash: {}", err)))?;
    Ok(SignedTransaction {
        raw: Bytes::from(raw),
        hash,
    })
}
