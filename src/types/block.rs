/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.
//!
//! The consensus core treats the block body as opaque bytes. It only reads the header fields it
//! needs to decide who may propose, who may vote and what the finality proof covers.
//!
//! Two hashes identify a block:
//! - The **block hash** commits to the block's content: height, previous block, producer, produce
//!   timeslot, aggregate root hash and body. It is the same for a block and all of its re-proposals.
//! - The **propose hash** additionally commits to the proposer and the propose timeslot, and so
//!   identifies one particular proposal of a block.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::hash_parts,
    data_types::{
        BlockHeight, BlsSignatureBytes, CryptoHash, SignatureBytes, TimeSlot, ValidatorID,
        ValidatorIndex,
    },
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub height: BlockHeight,
    pub previous_block_hash: CryptoHash,
    /// The validator that built the block body.
    pub producer: ValidatorID,
    pub produce_timeslot: TimeSlot,
    /// The validator that signed and broadcast this proposal of the block.
    pub proposer: ValidatorID,
    pub propose_timeslot: TimeSlot,
    /// Root hash over the block's execution results, maintained by the chain.
    pub aggregate_root_hash: CryptoHash,
}

/// Evidence attached to a committed block.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidationData {
    pub aggregate_signature: Option<BlsSignatureBytes>,
    /// Committee indices of the validators whose partial signatures were aggregated, ascending.
    pub validator_indices: Vec<ValidatorIndex>,
    pub bridge_signatures: Vec<(ValidatorIndex, SignatureBytes)>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: Vec<u8>,
    pub validation_data: ValidationData,
}

impl Block {
    pub fn new(header: BlockHeader, body: Vec<u8>) -> Block {
        Block {
            header,
            body,
            validation_data: ValidationData::default(),
        }
    }

    /// Hash over the content of the block. Unchanged by re-proposal.
    pub fn hash(&self) -> CryptoHash {
        let header = &self.header;
        hash_parts(&[
            &header.height.to_le_bytes(),
            &header.previous_block_hash.bytes(),
            &header.producer.bytes(),
            &header.produce_timeslot.to_le_bytes(),
            &header.aggregate_root_hash.bytes(),
            &self.body,
        ])
    }

    /// Hash identifying this particular proposal of the block.
    pub fn propose_hash(&self) -> CryptoHash {
        propose_hash(
            &self.hash(),
            &self.header.proposer,
            self.header.propose_timeslot,
        )
    }

    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    /// Whether this block is being proposed in the same timeslot that it was produced in, by its
    /// producer.
    pub fn is_first_proposal(&self) -> bool {
        self.header.produce_timeslot == self.header.propose_timeslot
            && self.header.producer == self.header.proposer
    }

    /// A copy of this block carrying a new proposer and propose timeslot. The content, and therefore
    /// the block hash, is unchanged.
    pub fn re_proposed(&self, proposer: ValidatorID, propose_timeslot: TimeSlot) -> Block {
        let mut block = self.clone();
        block.header.proposer = proposer;
        block.header.propose_timeslot = propose_timeslot;
        block.validation_data = ValidationData::default();
        block
    }
}

pub fn propose_hash(
    block_hash: &CryptoHash,
    proposer: &ValidatorID,
    propose_timeslot: TimeSlot,
) -> CryptoHash {
    hash_parts(&[
        &block_hash.bytes(),
        &proposer.bytes(),
        &propose_timeslot.to_le_bytes(),
    ])
}
