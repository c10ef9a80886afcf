/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store numbers and identities, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, Div},
    str::FromStr,
};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Index of a fixed-width, wall-clock-aligned time slice.
///
/// Computed by the [`EpochClock`](crate::epoch_clock::EpochClock) as `floor(now_ms / epoch_duration_ms)`,
/// so every keeper whose clock is synchronized to within a fraction of the epoch duration agrees on the
/// same `EpochIndex` without exchanging messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EpochIndex(u64);

impl EpochIndex {
    /// Create a new `EpochIndex` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `EpochIndex`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Whether this epoch is a "task epoch" for a task that runs every `interval` epochs.
    ///
    /// # Precondition
    ///
    /// `interval` must be non-zero. Intervals are validated when the task list is loaded.
    pub const fn is_multiple_of(&self, interval: u64) -> bool {
        self.0 % interval == 0
    }
}

impl Display for EpochIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for EpochIndex {
    type Output = EpochIndex;
    fn add(self, rhs: u64) -> Self::Output {
        EpochIndex::new(self.0 + rhs)
    }
}

impl Div<DwellLength> for EpochIndex {
    type Output = u64;
    fn div(self, rhs: DwellLength) -> Self::Output {
        self.0 / rhs.int() as u64
    }
}

/// Position of the current duty leader inside the ordered committee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaderIndex(usize);

impl LeaderIndex {
    /// Create a new `LeaderIndex` with an `int` value.
    pub const fn new(int: usize) -> Self {
        Self(int)
    }

    /// Get the `usize` value of this `LeaderIndex`.
    pub const fn int(&self) -> usize {
        self.0
    }
}

impl Display for LeaderIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Number of consecutive epochs a single committee member holds leadership before rotation advances.
///
/// # Choice of value
///
/// Pick a value that shares no small common factors with the task intervals and the committee size in
/// use (a prime works well). Otherwise the same guardian systematically ends up leading every epoch in
/// which a given task is due.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DwellLength(u32);

impl DwellLength {
    /// Create a new `DwellLength` with an `int` value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the `u32` value of this `DwellLength`.
    pub const fn int(&self) -> u32 {
        self.0
    }
}

/// 20-byte Ethereum account address.
///
/// Parsed case-insensitively, with or without the `0x` prefix, so that addresses coming from the
/// management service (which omits the prefix) compare equal to addresses coming from configuration or
/// from a signing key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EthAddress(Address);

impl EthAddress {
    /// Create a new `EthAddress` wrapping `address`.
    pub const fn new(address: Address) -> Self {
        Self(address)
    }

    /// Get the inner [`Address`] of this `EthAddress`.
    pub const fn address(&self) -> Address {
        self.0
    }

    /// Lowercase hex representation without the `0x` prefix, as used by the management service.
    pub fn to_bare_hex(&self) -> String {
        hex::encode(self.0.as_slice())
    }
}

impl FromStr for EthAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_20_bytes(s).map(|bytes| EthAddress(Address::from(bytes)))
    }
}

impl Display for EthAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_bare_hex())
    }
}

impl Debug for EthAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for EthAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EthAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 20-byte identity of a node inside the guardian network (distinct from its Ethereum address).
///
/// Configured without the `0x` prefix; the management service lists it the same way.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrbsAddress([u8; 20]);

impl OrbsAddress {
    /// Create a new `OrbsAddress` wrapping `bytes`.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 20]` value of this `OrbsAddress`.
    pub const fn bytes(&self) -> [u8; 20] {
        self.0
    }
}

impl FromStr for OrbsAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_20_bytes(s).map(OrbsAddress)
    }
}

impl Display for OrbsAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Debug for OrbsAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for OrbsAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 32-byte Keccak-256 hash identifying a transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(B256);

impl TxHash {
    /// Create a new `TxHash` wrapping `hash`.
    pub const fn new(hash: B256) -> Self {
        Self(hash)
    }

    /// Get the inner [`B256`] value of this `TxHash`.
    pub const fn hash(&self) -> B256 {
        self.0
    }
}

impl FromStr for TxHash {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| AddressParseError::WrongLength { len: bytes.len() })?;
        Ok(TxHash(B256::from(bytes)))
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_slice()))
    }
}

impl Debug for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Enumerates the ways a hex-encoded address or hash can fail to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("unexpected byte length {len}")]
    WrongLength { len: usize },
}

fn decode_hex(s: &str) -> Result<Vec<u8>, AddressParseError> {
    let trimmed = s.trim();
    let bare = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(bare).map_err(|err| AddressParseError::InvalidHex(err.to_string()))
}

fn parse_20_bytes(s: &str) -> Result<[u8; 20], AddressParseError> {
    let bytes = decode_hex(s)?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| AddressParseError::WrongLength { len: bytes.len() })
}
