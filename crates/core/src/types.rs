use serde::{Deserialize, Serialize};

use crate::abi::{encode_u256, keccak256};
use crate::{CoreError, Result};

/// 20-byte account address
pub type Address = primitive_types::H160;

/// 32-byte keccak digest
pub type Hash = primitive_types::H256;

/// 256-bit unsigned EVM word
pub use primitive_types::U256;

pub type ChainId = u64;
pub type BlockNumber = u64;
pub type WindowIndex = u64;

/// Content identity of a mempool transaction
pub type TxId = Hash;

/// One ether (10^18 wei)
pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(18)
}

/// Window a block belongs to: `floor(block / blocks_per_window)`
pub fn window_index(block: BlockNumber, blocks_per_window: u64) -> WindowIndex {
    if blocks_per_window == 0 {
        return 0;
    }
    block / blocks_per_window
}

/// True when `block` opens a new window
pub fn is_window_boundary(block: BlockNumber, blocks_per_window: u64) -> bool {
    blocks_per_window != 0 && block % blocks_per_window == 0
}

/// Blocks remaining until the next window opens
pub fn blocks_until_next_window(block: BlockNumber, blocks_per_window: u64) -> u64 {
    if blocks_per_window == 0 {
        return 0;
    }
    blocks_per_window - (block % blocks_per_window)
}

/// Parse a `0x`-prefixed (or bare) hex address
pub fn parse_address(s: &str) -> Result<Address> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 20 {
        return Err(CoreError::InvalidHex(s.to_string()));
    }
    Ok(Address::from_slice(&bytes))
}

/// Parse a `0x`-prefixed (or bare) 32-byte hash
pub fn parse_hash(s: &str) -> Result<Hash> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 32 {
        return Err(CoreError::InvalidHex(s.to_string()));
    }
    Ok(Hash::from_slice(&bytes))
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(trimmed).map_err(|_| CoreError::InvalidHex(s.to_string()))
}

/// Relayer lifecycle status as reported by the allocator contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayerStatus {
    Inactive,
    Active,
    Exiting,
    Jailed,
}

impl RelayerStatus {
    /// On-chain enum code
    pub fn code(&self) -> u8 {
        match self {
            RelayerStatus::Inactive => 0,
            RelayerStatus::Active => 1,
            RelayerStatus::Exiting => 2,
            RelayerStatus::Jailed => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RelayerStatus::Inactive),
            1 => Some(RelayerStatus::Active),
            2 => Some(RelayerStatus::Exiting),
            3 => Some(RelayerStatus::Jailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RelayerStatus::Inactive => "inactive",
            RelayerStatus::Active => "active",
            RelayerStatus::Exiting => "exiting",
            RelayerStatus::Jailed => "jailed",
        };
        f.write_str(name)
    }
}

/// Registry entry for a relayer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerInfo {
    /// Bonded stake (zero when never registered)
    pub stake: U256,
    pub status: RelayerStatus,
    /// Unix timestamp before which an exit cannot complete
    pub min_exit_timestamp: u64,
    /// Accounts allowed to submit on behalf of the relayer
    pub accounts: Vec<Address>,
    pub endpoint: String,
}

impl RelayerInfo {
    pub fn unregistered() -> Self {
        Self {
            stake: U256::zero(),
            status: RelayerStatus::Inactive,
            min_exit_timestamp: 0,
            accounts: Vec::new(),
            endpoint: String::new(),
        }
    }
}

/// A pending transaction: call data plus native value to forward.
///
/// Identity is content based, two transactions with the same data and value
/// are the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub value: U256,
}

impl Transaction {
    pub fn new(data: Vec<u8>, value: U256) -> Self {
        Self { data, value }
    }

    /// Call with no value attached
    pub fn call(data: Vec<u8>) -> Self {
        Self::new(data, U256::zero())
    }

    /// `keccak256(data ‖ uint256 value)`
    pub fn id(&self) -> TxId {
        let mut preimage = Vec::with_capacity(self.data.len() + 32);
        preimage.extend_from_slice(&self.data);
        preimage.extend_from_slice(&encode_u256(self.value));
        keccak256(preimage)
    }
}

/// `NewRelayerState` event emitted whenever the relayer set changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerStateEvent {
    pub hash: Hash,
    pub relayers: Vec<Address>,
    pub cdf: Vec<U256>,
    pub block: BlockNumber,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let trimmed = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(trimmed).map_err(serde::de::Error::custom)
    }
}
