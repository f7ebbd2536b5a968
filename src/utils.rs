//! Utility functions for identifiers and tree keys

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

// bech32 never emits '/', so it is safe as a separator after an asset id
pub(crate) const KEY_SEPARATOR: u8 = b'/';

pub(crate) fn asset_prefix(asset_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(asset_id.len() + 1);
    key.extend_from_slice(asset_id.as_bytes());
    key.push(KEY_SEPARATOR);
    key
}

/// `asset_id/` followed by the big-endian sequence, so prefix scans come back in order.
pub(crate) fn ledger_key(asset_id: &str, sequence: u64) -> Vec<u8> {
    let mut key = asset_prefix(asset_id);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

pub(crate) fn pair_key(left: u64, right: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&left.to_be_bytes());
    key[8..].copy_from_slice(&right.to_be_bytes());
    key
}

pub(crate) fn u64_from_be(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}
