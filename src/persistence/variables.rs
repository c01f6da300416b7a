/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each consensus recovery variable is stored in the user-provided
//! key-value store.
//!
//! # List of recovery variables
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Propose History|[`TimeSlot`](crate::types::data_types::TimeSlot) -> [`CryptoHash`](crate::types::data_types::CryptoHash)|The propose hash this node proposed in each timeslot. Guards against proposing twice in a timeslot after a restart.|
//! |Receive Block Index|[`Vec<CryptoHash>`]|Propose hashes of every proposal record that has a snapshot.|
//! |Receive Block by Hash|[`CryptoHash`](crate::types::data_types::CryptoHash) -> [`ProposalRecordSnapshot`](super::store::ProposalRecordSnapshot)|Snapshots of proposal records, for crash recovery and re-vote avoidance.|
//! |Vote History|[`BlockHeight`](crate::types::data_types::BlockHeight) -> [`VoteLock`](crate::rules::validator::VoteLock)|The last block this node voted for at each height: the safety lock.|
//!
//! # Keys
//!
//! Every key starts with [`CHAIN`] followed by the 8-byte little-endian chain id, so that the actors
//! of several chains can share one store. Propose History and Vote History are stored as a single
//! Borsh-serialized map each. Receive Block by Hash is stored as one value per propose hash, at
//! `RECEIVE_BLOCK_BY_HASH ++ propose_hash`.

use crate::types::data_types::ChainID;

pub const CHAIN: [u8; 1] = [0];

pub const PROPOSE_HISTORY: [u8; 1] = [1];
pub const RECEIVE_BLOCK_INDEX: [u8; 1] = [2];
pub const RECEIVE_BLOCK_BY_HASH: [u8; 1] = [3];
pub const VOTE_HISTORY: [u8; 1] = [4];

/// Takes references to two byteslices and returns a vector containing the bytes of the first one,
/// and then the bytes of the second one.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

/// The prefix of every key belonging to `chain_id`.
pub fn chain_prefix(chain_id: ChainID) -> Vec<u8> {
    concat(&CHAIN, &chain_id.int().to_le_bytes())
}
