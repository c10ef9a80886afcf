/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`ChainClient`] over Ethereum JSON-RPC 2.0 on HTTP.

use std::time::Duration;

use alloy_primitives::{Bytes, U256};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    parse_quantity, parse_quantity_u128, parse_quantity_u64, ChainClient, ChainError,
    TransactionInfo, TransactionReceipt,
};
use crate::types::data_types::{EthAddress, TxHash};

pub struct JsonRpcClient {
    endpoint: String,
    http_client: reqwest::blocking::Client,
    next_id: u64,
    chain_id: Option<u64>,
}

impl JsonRpcClient {
    /// Create a client for `endpoint`. Every request is bounded by `timeout`: a hung endpoint would
    /// otherwise stall the keeper's tick indefinitely.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ChainError> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            http_client,
            next_id: 1,
            chain_id: None,
        })
    }

    fn call(&mut self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id;
        self.next_id += 1;
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        log::debug!("rpc {} -> {}", method, self.endpoint);
        let response: RpcResponse = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| ChainError::Transport(err.to_string()))?
            .json()
            .map_err(|err| ChainError::Parse(err.to_string()))?;

        match (response.result, response.error) {
            (_, Some(error)) => Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }

    fn call_quantity(&mut self, method: &str, params: Value) -> Result<String, ChainError> {
        match self.call(method, params)? {
            Value::String(quantity) => Ok(quantity),
            other => Err(ChainError::Parse(format!("{} returned {}", method, other))),
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    hash: TxHash,
    block_number: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: TxHash,
    block_number: Option<String>,
    status: Option<String>,
    gas_used: Option<String>,
}

fn optional_u64(value: Option<String>) -> Result<Option<u64>, ChainError> {
    value.as_deref().map(parse_quantity_u64).transpose()
}

impl ChainClient for JsonRpcClient {
    fn chain_id(&mut self) -> Result<u64, ChainError> {
        if let Some(chain_id) = self.chain_id {
            return Ok(chain_id);
        }
        let chain_id = parse_quantity_u64(&self.call_quantity("eth_chainId", json!([]))?)?;
        self.chain_id = Some(chain_id);
        Ok(chain_id)
    }

    fn balance(&mut self, address: &EthAddress) -> Result<U256, ChainError> {
        let quantity =
            self.call_quantity("eth_getBalance", json!([address.to_string(), "latest"]))?;
        parse_quantity(&quantity)
    }

    fn gas_price(&mut self) -> Result<u128, ChainError> {
        parse_quantity_u128(&self.call_quantity("eth_gasPrice", json!([]))?)
    }

    fn transaction_count(&mut self, address: &EthAddress) -> Result<u64, ChainError> {
        let quantity = self.call_quantity(
            "eth_getTransactionCount",
            json!([address.to_string(), "latest"]),
        )?;
        parse_quantity_u64(&quantity)
    }

    fn transaction(&mut self, hash: &TxHash) -> Result<Option<TransactionInfo>, ChainError> {
        let result = self.call("eth_getTransactionByHash", json!([hash.to_string()]))?;
        if result.is_null() {
            return Ok(None);
        }
        let raw: RawTransaction =
            serde_json::from_value(result).map_err(|err| ChainError::Parse(err.to_string()))?;
        Ok(Some(TransactionInfo {
            hash: raw.hash,
            block_number: optional_u64(raw.block_number)?,
        }))
    }

    fn transaction_receipt(&mut self, hash: &TxHash) -> Result<Option<TransactionReceipt>, ChainError> {
        let result = self.call("eth_getTransactionReceipt", json!([hash.to_string()]))?;
        if result.is_null() {
            return Ok(None);
        }
        let raw: RawReceipt =
            serde_json::from_value(result).map_err(|err| ChainError::Parse(err.to_string()))?;
        Ok(Some(TransactionReceipt {
            hash: raw.transaction_hash,
            block_number: optional_u64(raw.block_number)?,
            success: optional_u64(raw.status)?.map(|status| status == 1),
            gas_used: optional_u64(raw.gas_used)?,
        }))
    }

    fn send_raw_transaction(&mut self, raw: &Bytes) -> Result<TxHash, ChainError> {
        let result = self.call(
            "eth_sendRawTransaction",
            json!([format!("0x{}", hex::encode(raw))]),
        )?;
        serde_json::from_value(result).map_err(|err| ChainError::Parse(err.to_string()))
    }
}
