//! Minimal ABI encoding and keccak helpers
//!
//! Only the handful of encodings the allocator contract hashes are supported:
//! `uint256` and `address` words, `bytes32` seeds and packed arrays of words.
//! Every helper produces exactly the bytes `abi.encode` / `abi.encodePacked`
//! would, so hashes computed here match the on-chain ones.

use sha3::{Digest, Keccak256};

use crate::{Address, Hash, U256};

/// Size of an ABI word in bytes
pub const WORD_SIZE: usize = 32;

/// keccak256 over arbitrary bytes
pub fn keccak256(data: impl AsRef<[u8]>) -> Hash {
    let digest = Keccak256::digest(data.as_ref());
    Hash::from_slice(&digest)
}

/// keccak256 over a sequence of 32-byte words, without intermediate copies
pub fn keccak256_words<I>(words: I) -> Hash
where
    I: IntoIterator<Item = [u8; WORD_SIZE]>,
{
    let mut hasher = Keccak256::new();
    for word in words {
        hasher.update(word);
    }
    Hash::from_slice(&hasher.finalize())
}

/// Encode a `uint256` as a big-endian word
pub fn encode_u256(value: U256) -> [u8; WORD_SIZE] {
    let mut word = [0u8; WORD_SIZE];
    value.to_big_endian(&mut word);
    word
}

/// Encode an `address` as a left-padded word
pub fn encode_address(address: &Address) -> [u8; WORD_SIZE] {
    let mut word = [0u8; WORD_SIZE];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// Encode a single dynamic `bytes` argument: head offset, length, then the
/// data right-padded to a word boundary
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let padded = data.len().div_ceil(WORD_SIZE) * WORD_SIZE;
    let mut out = Vec::with_capacity(2 * WORD_SIZE + padded);
    out.extend_from_slice(&encode_u256(U256::from(WORD_SIZE)));
    out.extend_from_slice(&encode_u256(U256::from(data.len())));
    out.extend_from_slice(data);
    out.resize(2 * WORD_SIZE + padded, 0);
    out
}

/// Interpret a hash as a `uint256`
pub fn hash_to_u256(hash: &Hash) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}

/// First four bytes of keccak256 over a canonical function signature
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash.as_bytes()[..4]);
    selector
}

/// Build call data: selector followed by already-encoded argument words
pub fn encode_call(signature: &str, args: &[[u8; WORD_SIZE]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + args.len() * WORD_SIZE);
    data.extend_from_slice(&function_selector(signature));
    for arg in args {
        data.extend_from_slice(arg);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_empty_input() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak_words_matches_concatenation() {
        let a = encode_u256(U256::from(7u64));
        let b = encode_u256(U256::from(9u64));
        let mut joined = Vec::new();
        joined.extend_from_slice(&a);
        joined.extend_from_slice(&b);
        assert_eq!(keccak256_words([a, b]), keccak256(&joined));
    }

    #[test]
    fn test_encode_u256_is_big_endian() {
        let word = encode_u256(U256::from(0x0102u64));
        assert_eq!(word[30], 0x01);
        assert_eq!(word[31], 0x02);
        assert!(word[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_address_left_pads() {
        let address = Address::repeat_byte(0xab);
        let word = encode_address(&address);
        assert!(word[..12].iter().all(|b| *b == 0));
        assert!(word[12..].iter().all(|b| *b == 0xab));
    }

    #[test]
    fn test_erc20_transfer_selector() {
        assert_eq!(function_selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_encode_bytes_pads_to_word() {
        let encoded = encode_bytes(&[1, 2, 3]);
        assert_eq!(encoded.len(), 96);
        assert_eq!(encoded[31], 0x20);
        assert_eq!(encoded[63], 3);
        assert_eq!(&encoded[64..67], &[1, 2, 3]);
        assert!(encoded[67..].iter().all(|b| *b == 0));
        assert_eq!(encode_bytes(&[]).len(), 64);
    }

    #[test]
    fn test_encode_call_layout() {
        let data = encode_call("mockUpdate(uint256)", &[encode_u256(U256::from(12u64))]);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &function_selector("mockUpdate(uint256)"));
        assert_eq!(data[35], 12);
    }
}
