/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the chain-side collaborators of the consensus core.
//!
//! The consensus core only decides *when* blocks are created, validated and inserted, and *with whom*
//! their signatures are aggregated. Everything about block content is delegated to the library
//! user's [`Chain`] implementation, and committee membership is read from a [`CommitteeChain`].
//!
//! ## Thread safety
//!
//! Both traits are `Send + Sync`. The actor calls [`Chain::create_new_block`] from a helper thread so
//! that a slow block creation cannot starve the actor's tick loop (see
//! [`block_creation`](crate::actor::block_creation)). Implementations that need mutation should use
//! interior mutability.

use std::fmt::{self, Display, Formatter};

use crate::types::{
    block::Block,
    committee::{select_leader, Committee},
    data_types::{BlockHeight, ChainID, CryptoHash, TimeSlot, ValidatorID},
};

/// A summary of the tip of a chain: either its best (highest) view, or its final (finalized) view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct View {
    /// Block hash of the tip.
    pub hash: CryptoHash,
    pub height: BlockHeight,
    /// Propose timeslot of the tip.
    pub propose_timeslot: TimeSlot,
}

/// The chain whose blocks the actor drives consensus for.
pub trait Chain: Send + Sync + 'static {
    fn chain_id(&self) -> ChainID;

    /// The highest block the chain has inserted. New proposals extend this view.
    fn best_view(&self) -> View;

    /// The highest finalized block. Consensus state at or below its height is garbage collected.
    fn final_view(&self) -> View;

    /// Whether the chain holds a block with `hash`.
    fn has_block(&self, hash: &CryptoHash) -> bool;

    /// Build a new block on top of `previous`, produced and proposed by `producer` in `timeslot`.
    fn create_new_block(
        &self,
        previous: &View,
        producer: ValidatorID,
        timeslot: TimeSlot,
    ) -> Result<Block, BlockCreationError>;

    /// Re-propose `old_block` with a new proposer and propose timeslot. The content of the returned block
    /// must be that of `old_block`.
    fn create_new_block_from_old_block(
        &self,
        old_block: &Block,
        proposer: ValidatorID,
        timeslot: TimeSlot,
    ) -> Result<Block, BlockCreationError> {
        Ok(old_block.re_proposed(proposer, timeslot))
    }

    /// Check the content of `block` before signing it.
    fn validate_pre_sign_block(&self, block: &Block) -> Result<(), BlockValidationError>;

    /// Insert a committed block into the chain.
    fn insert_block(&self, block: Block) -> Result<(), InsertBlockError>;

    /// Insert a committed block into the chain, and broadcast it to peers.
    fn insert_and_broadcast_block(&self, block: Block) -> Result<(), InsertBlockError>;

    /// Get the validator expected to propose in `timeslot`.
    fn proposer_by_timeslot(&self, timeslot: TimeSlot, committee: &Committee) -> Option<ValidatorID> {
        select_leader(timeslot, committee)
    }

    /// Get the subset of `committee` whose signatures count towards `block`'s supermajority.
    fn signing_committee(&self, _block: &Block, committee: &Committee) -> Committee {
        committee.clone()
    }

    /// Whether votes for this chain's blocks should carry bridge co-signatures.
    fn requires_bridge_signatures(&self) -> bool {
        false
    }
}

/// The chain that decides committee membership.
pub trait CommitteeChain: Send + Sync + 'static {
    /// Hash of the committee chain's final view.
    fn final_view(&self) -> CryptoHash;

    /// The committee of `chain_id` as of the committee chain view with `view_hash`.
    fn committees_from_view_hash(&self, view_hash: &CryptoHash, chain_id: ChainID) -> Option<Committee>;
}

/// Block creation failed. Recoverable: the actor skips proposing in this timeslot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockCreationError {
    /// Block creation did not finish within half a timeslot.
    Timeout,

    /// A previous block creation call is still running.
    Busy,

    /// The chain refused to create a block.
    Failed(String),
}

impl Display for BlockCreationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BlockCreationError::Timeout => write!(f, "block creation timed out"),
            BlockCreationError::Busy => write!(f, "a previous block creation is still running"),
            BlockCreationError::Failed(reason) => write!(f, "block creation failed: {}", reason),
        }
    }
}

/// The content of a proposed block is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockValidationError(pub String);

impl Display for BlockValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid block: {}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertBlockError(pub String);

impl Display for InsertBlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "failed to insert block: {}", self.0)
    }
}
