//! Key encoding utilities for `RocksDB`.
//!
//! Primary keys are the 16 raw UUID bytes. Index keys concatenate the parent
//! id with the child id so that a prefix scan over the parent lists every
//! child in id order.

use fleetplane_core::{ClusterId, DatacenterId, Provider, ServerId, ServerState};

const ID_LEN: usize = 16;

/// Encode any identifier as its raw bytes.
#[must_use]
pub fn id_key(id: impl AsRef<[u8]>) -> Vec<u8> {
    id.as_ref().to_vec()
}

/// Encode a cluster name index key.
#[must_use]
pub fn cluster_name_key(name_id: &str) -> Vec<u8> {
    name_id.as_bytes().to_vec()
}

/// Encode a cluster-datacenter index key: `cluster_id || datacenter_id`.
#[must_use]
pub fn cluster_datacenter_key(cluster_id: &ClusterId, datacenter_id: &DatacenterId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(cluster_id.as_bytes());
    key.extend_from_slice(datacenter_id.as_bytes());
    key
}

/// Encode a provider region index key: `provider || 0x00 || region`.
#[must_use]
pub fn provider_region_key(provider: Provider, provider_datacenter_id: &str) -> Vec<u8> {
    let provider = provider.as_str().as_bytes();
    let mut key = Vec::with_capacity(provider.len() + 1 + provider_datacenter_id.len());
    key.extend_from_slice(provider);
    key.push(0);
    key.extend_from_slice(provider_datacenter_id.as_bytes());
    key
}

/// Encode a datacenter-server index key: `datacenter_id || server_id`.
#[must_use]
pub fn datacenter_server_key(datacenter_id: &DatacenterId, server_id: &ServerId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(datacenter_id.as_bytes());
    key.extend_from_slice(server_id.as_bytes());
    key
}

/// Single byte tag for a server state.
#[must_use]
pub const fn state_tag(state: ServerState) -> u8 {
    match state {
        ServerState::Provisioning => 0,
        ServerState::Active => 1,
        ServerState::Draining => 2,
        ServerState::Terminated => 3,
    }
}

/// Encode a state-server index key: `state || server_id`.
#[must_use]
pub fn state_server_key(state: ServerState, server_id: &ServerId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + ID_LEN);
    key.push(state_tag(state));
    key.extend_from_slice(server_id.as_bytes());
    key
}

/// Take the trailing 16 bytes of an index key as an id.
///
/// Returns `None` if the key is not exactly `prefix_len + 16` bytes long.
#[must_use]
pub fn trailing_id(key: &[u8], prefix_len: usize) -> Option<[u8; ID_LEN]> {
    if key.len() != prefix_len + ID_LEN {
        return None;
    }
    key[prefix_len..].try_into().ok()
}

/// Decode a 16-byte value stored in an index.
#[must_use]
pub fn id_value(value: &[u8]) -> Option<[u8; ID_LEN]> {
    value.try_into().ok()
}
