/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Contract ABIs and call-data encoding.
//!
//! ## ABI store
//!
//! At startup every `*.json` file in the ABI directory is loaded and keyed by its file stem, so a task
//! that says `"abi": "vault"` uses `vault.json`. A file may hold either a bare ABI array or a build
//! artifact object with an `abi` field.
//!
//! ## Call encoding
//!
//! [`Abi::encode_call`] produces `selector ++ encode(args)`, where `selector` is the first four bytes of
//! `keccak256("method(type1,type2,...)")` and `encode` is the standard head/tail encoding. Supported types
//! are `address`, `bool`, `uint<M>`, `int<M>`, `bytes<M>`, `bytes`, `string`, `T[]`, `T[k]`, and tuples.
//!
//! Arguments come straight from the task file as JSON:
//! - integers: JSON numbers, decimal strings, or `0x` hex strings (negative decimals for `int<M>`),
//! - `address`, `bytes<M>` and `bytes`: hex strings,
//! - `bool`: JSON booleans,
//! - arrays and tuples: JSON arrays.

use std::{collections::HashMap, fs, path::Path};

use alloy_primitives::{keccak256, Bytes, U256};
use serde::Deserialize;
use serde_json::Value;

use crate::types::{data_types::EthAddress, task::ParamSet};

/// A single entry of a contract ABI. Only `function` entries are ever encoded.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AbiEntry {
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub components: Vec<AbiParam>,
}

/// A parsed contract ABI.
#[derive(Clone, Debug, PartialEq)]
pub struct Abi {
    entries: Vec<AbiEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AbiFile {
    Bare(Vec<AbiEntry>),
    Artifact { abi: Vec<AbiEntry> },
}

impl<'de> Deserialize<'de> for Abi {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = match AbiFile::deserialize(deserializer)? {
            AbiFile::Bare(entries) => entries,
            AbiFile::Artifact { abi } => abi,
        };
        Ok(Abi { entries })
    }
}

impl Abi {
    pub fn new(entries: Vec<AbiEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[AbiEntry] {
        &self.entries
    }

    /// Encode a call of `method` with the arguments in `params`.
    ///
    /// Overloaded methods are told apart by argument count. When no overload takes the positional
    /// arguments, a single-input overload receives the whole param set as its one argument, so that
    /// `["0x11..", "0x22.."]` can encode `setPools(address[])`.
    pub fn encode_call(&self, method: &str, params: &ParamSet) -> Result<Bytes, AbiError> {
        let named: Vec<&AbiEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.kind == "function" && entry.name == method)
            .collect();
        if named.is_empty() {
            return Err(AbiError::UnknownMethod {
                method: method.to_string(),
            });
        }

        let mut args = params.args();
        let function = match named.iter().find(|entry| entry.inputs.len() == args.len()) {
            Some(function) => *function,
            None => {
                let single = named
                    .iter()
                    .find(|entry| entry.inputs.len() == 1)
                    .filter(|_| !params.is_none())
                    .ok_or_else(|| AbiError::ArgumentCount {
                        method: method.to_string(),
                        given: args.len(),
                    })?;
                args = vec![params.value().clone()];
                *single
            }
        };

        let types = function
            .inputs
            .iter()
            .map(AbiType::from_param)
            .collect::<Result<Vec<_>, _>>()?;

        let signature = format!(
            "{}({})",
            function.name,
            types
                .iter()
                .map(AbiType::canonical)
                .collect::<Vec<_>>()
                .join(",")
        );
        let mut data = keccak256(signature.as_bytes())[..4].to_vec();
        data.extend(encode_tuple(&types, &args)?);
        Ok(Bytes::from(data))
    }
}

/// ABIs keyed by name (the file stem they were loaded from).
#[derive(Clone, Debug, Default)]
pub struct AbiStore {
    abis: HashMap<String, Abi>,
}

impl AbiStore {
    /// Load every `*.json` file in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self, AbiError> {
        let io_error = |err: std::io::Error| AbiError::Io {
            path: dir.display().to_string(),
            message: err.to_string(),
        };

        let mut abis = HashMap::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path).map_err(|err| AbiError::Io {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
            let abi: Abi = serde_json::from_str(&text).map_err(|err| AbiError::Parse {
                name: name.to_string(),
                message: err.to_string(),
            })?;
            log::info!("loaded ABI {} ({} entries)", name, abi.entries.len());
            abis.insert(name.to_string(), abi);
        }
        Ok(Self { abis })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Abi)>) -> Self {
        Self {
            abis: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Abi> {
        self.abis.get(name)
    }

    pub fn len(&self) -> usize {
        self.abis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abis.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum AbiType {
    Address,
    Bool,
    Uint(usize),
    Int(usize),
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<AbiType>),
    FixedArray(Box<AbiType>, usize),
    Tuple(Vec<AbiType>),
}

impl AbiType {
    fn from_param(param: &AbiParam) -> Result<Self, AbiError> {
        Self::parse(&param.ty, &param.components)
    }

    fn parse(ty: &str, components: &[AbiParam]) -> Result<Self, AbiError> {
        let unsupported = || AbiError::UnsupportedType(ty.to_string());

        if let Some(open) = ty.strip_suffix(']').and_then(|t| t.rfind('[')) {
            let inner = Self::parse(&ty[..open], components)?;
            let size = &ty[open + 1..ty.len() - 1];
            return if size.is_empty() {
                Ok(AbiType::Array(Box::new(inner)))
            } else {
                let size = size.parse().map_err(|_| unsupported())?;
                Ok(AbiType::FixedArray(Box::new(inner), size))
            };
        }

        let bits = |digits: &str| -> Result<usize, AbiError> {
            if digits.is_empty() {
                return Ok(256);
            }
            match digits.parse::<usize>() {
                Ok(bits) if bits > 0 && bits <= 256 && bits % 8 == 0 => Ok(bits),
                _ => Err(unsupported()),
            }
        };

        match ty {
            "address" => Ok(AbiType::Address),
            "bool" => Ok(AbiType::Bool),
            "bytes" => Ok(AbiType::Bytes),
            "string" => Ok(AbiType::String),
            "tuple" => components
                .iter()
                .map(AbiType::from_param)
                .collect::<Result<Vec<_>, _>>()
                .map(AbiType::Tuple),
            _ => {
                if let Some(digits) = ty.strip_prefix("uint") {
                    Ok(AbiType::Uint(bits(digits)?))
                } else if let Some(digits) = ty.strip_prefix("int") {
                    Ok(AbiType::Int(bits(digits)?))
                } else if let Some(digits) = ty.strip_prefix("bytes") {
                    match digits.parse::<usize>() {
                        Ok(len) if (1..=32).contains(&len) => Ok(AbiType::FixedBytes(len)),
                        _ => Err(unsupported()),
                    }
                } else {
                    Err(unsupported())
                }
            }
        }
    }

    fn canonical(&self) -> String {
        match self {
            AbiType::Address => "address".to_string(),
            AbiType::Bool => "bool".to_string(),
            AbiType::Uint(bits) => format!("uint{}", bits),
            AbiType::Int(bits) => format!("int{}", bits),
            AbiType::FixedBytes(len) => format!("bytes{}", len),
            AbiType::Bytes => "bytes".to_string(),
            AbiType::String => "string".to_string(),
            AbiType::Array(inner) => format!("{}[]", inner.canonical()),
            AbiType::FixedArray(inner, size) => format!("{}[{}]", inner.canonical(), size),
            AbiType::Tuple(types) => format!(
                "({})",
                types
                    .iter()
                    .map(AbiType::canonical)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }

    fn is_dynamic(&self) -> bool {
        match self {
            AbiType::Bytes | AbiType::String | AbiType::Array(_) => true,
            AbiType::FixedArray(inner, _) => inner.is_dynamic(),
            AbiType::Tuple(types) => types.iter().any(AbiType::is_dynamic),
            _ => false,
        }
    }

    /// Bytes this type occupies in the head of an enclosing tuple.
    fn head_size(&self) -> usize {
        if self.is_dynamic() {
            return 32;
        }
        match self {
            AbiType::FixedArray(inner, size) => inner.head_size() * size,
            AbiType::Tuple(types) => types.iter().map(AbiType::head_size).sum(),
            _ => 32,
        }
    }
}

fn encode_tuple(types: &[AbiType], values: &[Value]) -> Result<Vec<u8>, AbiError> {
    let head_len: usize = types.iter().map(AbiType::head_size).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for (ty, value) in types.iter().zip(values) {
        let encoded = encode_value(ty, value)?;
        if ty.is_dynamic() {
            head.extend(word_from_usize(head_len + tail.len()));
            tail.extend(encoded);
        } else {
            head.extend(encoded);
        }
    }
    head.extend(tail);
    Ok(head)
}

fn encode_value(ty: &AbiType, value: &Value) -> Result<Vec<u8>, AbiError> {
    let invalid = |reason: &str| AbiError::InvalidParam {
        ty: ty.canonical(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    match ty {
        AbiType::Address => {
            let address: EthAddress = value
                .as_str()
                .ok_or_else(|| invalid("expected a hex string"))?
                .parse()
                .map_err(|_| invalid("not a 20-byte address"))?;
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(address.address().as_slice());
            Ok(word.to_vec())
        }
        AbiType::Bool => {
            let flag = value.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
            Ok(word_from_u256(U256::from(flag as u8)))
        }
        AbiType::Uint(bits) => {
            let (negative, magnitude) = parse_integer(value).ok_or_else(|| invalid("not an integer"))?;
            if negative {
                return Err(invalid("negative value for unsigned type"));
            }
            if *bits < 256 && magnitude >> *bits != U256::ZERO {
                return Err(invalid("out of range"));
            }
            Ok(word_from_u256(magnitude))
        }
        AbiType::Int(bits) => {
            let (negative, magnitude) = parse_integer(value).ok_or_else(|| invalid("not an integer"))?;
            let limit = U256::from(1u8) << (*bits - 1);
            let in_range = if negative { magnitude <= limit } else { magnitude < limit };
            if !in_range {
                return Err(invalid("out of range"));
            }
            let word = if negative {
                (!magnitude).wrapping_add(U256::from(1u8))
            } else {
                magnitude
            };
            Ok(word_from_u256(word))
        }
        AbiType::FixedBytes(len) => {
            let bytes = parse_hex_bytes(value).ok_or_else(|| invalid("expected a hex string"))?;
            if bytes.len() != *len {
                return Err(invalid("wrong length"));
            }
            Ok(pad_right(&bytes))
        }
        AbiType::Bytes => {
            let bytes = parse_hex_bytes(value).ok_or_else(|| invalid("expected a hex string"))?;
            let mut out = word_from_usize(bytes.len());
            out.extend(pad_right(&bytes));
            Ok(out)
        }
        AbiType::String => {
            let text = value.as_str().ok_or_else(|| invalid("expected a string"))?;
            let mut out = word_from_usize(text.len());
            out.extend(pad_right(text.as_bytes()));
            Ok(out)
        }
        AbiType::Array(inner) => {
            let items = value.as_array().ok_or_else(|| invalid("expected an array"))?;
            let types = vec![(**inner).clone(); items.len()];
            let mut out = word_from_usize(items.len());
            out.extend(encode_tuple(&types, items)?);
            Ok(out)
        }
        AbiType::FixedArray(inner, size) => {
            let items = value.as_array().ok_or_else(|| invalid("expected an array"))?;
            if items.len() != *size {
                return Err(invalid("wrong number of elements"));
            }
            let types = vec![(**inner).clone(); *size];
            encode_tuple(&types, items)
        }
        AbiType::Tuple(types) => {
            let items = value.as_array().ok_or_else(|| invalid("expected an array"))?;
            if items.len() != types.len() {
                return Err(invalid("wrong number of components"));
            }
            encode_tuple(types, items)
        }
    }
}

/// Parse a JSON integer into sign and magnitude.
fn parse_integer(value: &Value) -> Option<(bool, U256)> {
    match value {
        Value::Number(number) => {
            if let Some(n) = number.as_u64() {
                Some((false, U256::from(n)))
            } else {
                number
                    .as_i64()
                    .map(|n| (n < 0, U256::from(n.unsigned_abs())))
            }
        }
        Value::String(s) => {
            let s = s.trim();
            let (negative, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s),
            };
            let magnitude = match digits.strip_prefix("0x") {
                Some(hex_digits) => U256::from_str_radix(hex_digits, 16).ok()?,
                None => U256::from_str_radix(digits, 10).ok()?,
            };
            Some((negative && magnitude != U256::ZERO, magnitude))
        }
        _ => None,
    }
}

fn parse_hex_bytes(value: &Value) -> Option<Vec<u8>> {
    let s = value.as_str()?;
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).ok()
}

fn word_from_u256(value: U256) -> Vec<u8> {
    value.to_be_bytes::<32>().to_vec()
}

fn word_from_usize(value: usize) -> Vec<u8> {
    word_from_u256(U256::from(value))
}

fn pad_right(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    let padded_len = bytes.len().div_ceil(32) * 32;
    out.resize(padded_len, 0);
    out
}

/// Enumerates the ways loading ABIs or encoding a call can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed ABI {name}: {message}")]
    Parse { name: String, message: String },

    #[error("ABI {0} is not loaded")]
    UnknownAbi(String),

    #[error("method {method} is not in the ABI")]
    UnknownMethod { method: String },

    #[error("no overload of {method} takes {given} arguments")]
    ArgumentCount { method: String, given: usize },

    #[error("unsupported ABI type {0}")]
    UnsupportedType(String),

    #[error("cannot encode {value} as {ty}: {reason}")]
    InvalidParam {
        ty: String,
        value: String,
        reason: String,
    },
}
