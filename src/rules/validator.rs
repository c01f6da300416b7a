/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The validator rule: which proposals this node may vote for.
//!
//! # Locking
//!
//! Once this node votes for a block at a height, it holds a [`VoteLock`] on that block for the height.
//! While locked, it only votes for:
//! 1. Re-proposals of the locked block in the lock's timeslot or later, or
//! 2. (Lemma2 only) A re-proposal of a different block that carries a valid finality proof and was
//!    produced after the lock's propose timeslot. This is a lock change.
//!
//! # Lemma2
//!
//! Under Lemma2, a proposal is voteable only if it carries a valid finality proof, or it is the
//! canonical first block of the next height:
//! - It is proposed in the timeslot it was produced in, by its producer.
//! - Its producer is the leader of that timeslot.
//! - That timeslot immediately follows the propose timeslot of the previous block.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    data_types::{CryptoHash, TimeSlot, ValidatorID},
};

/// The block this node last voted for at a height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteLock {
    /// Block hash (content) of the locked block.
    pub block_hash: CryptoHash,
    /// Propose hash of the proposal that was voted for.
    pub propose_hash: CryptoHash,
    pub propose_timeslot: TimeSlot,
}

impl VoteLock {
    pub fn new(block: &Block) -> Self {
        Self {
            block_hash: block.hash(),
            propose_hash: block.propose_hash(),
            propose_timeslot: block.header.propose_timeslot,
        }
    }
}

/// Facts about a proposal that the validator rule decides on.
pub struct VoteCandidate<'a> {
    pub block: &'a Block,
    /// Passed content validation.
    pub is_valid: bool,
    pub has_valid_finality_proof: bool,
    /// Leader of the proposal's propose timeslot.
    pub expected_leader: Option<ValidatorID>,
    /// Propose timeslot of the block the proposal extends.
    pub previous_propose_timeslot: TimeSlot,
}

impl VoteCandidate<'_> {
    pub fn is_canonical_first_block(&self) -> bool {
        let header = &self.block.header;
        self.block.is_first_proposal()
            && Some(header.producer) == self.expected_leader
            && header.propose_timeslot == self.previous_propose_timeslot + 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidatorRule {
    Lemma1,
    Lemma2,
}

impl ValidatorRule {
    /// Whether this node may vote for `candidate`, given its `lock` at the candidate's height.
    pub fn is_voteable(&self, candidate: &VoteCandidate, lock: Option<&VoteLock>) -> bool {
        if !candidate.is_valid {
            return false;
        }
        if *self == ValidatorRule::Lemma2
            && !(candidate.has_valid_finality_proof || candidate.is_canonical_first_block())
        {
            return false;
        }
        match lock {
            None => true,
            Some(lock) => self.respects_lock(candidate, lock),
        }
    }

    fn respects_lock(&self, candidate: &VoteCandidate, lock: &VoteLock) -> bool {
        let header = &candidate.block.header;
        if candidate.block.hash() == lock.block_hash {
            return header.propose_timeslot >= lock.propose_timeslot;
        }
        match self {
            ValidatorRule::Lemma1 => false,
            // An empty proof is not evidence of a lock change.
            ValidatorRule::Lemma2 => {
                candidate.has_valid_finality_proof
                    && !candidate.block.is_first_proposal()
                    && header.produce_timeslot > lock.propose_timeslot
            }
        }
    }
}
