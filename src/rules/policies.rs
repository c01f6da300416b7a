/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The vote, handle-vote-message and insert rules.

use crate::{
    chain::{Chain, InsertBlockError},
    types::{
        block::Block,
        committee::Committee,
        crypto_primitives::ConsensusKeypair,
        data_types::ChainID,
        vote::{Vote, VotePhase},
    },
};

/// Whether this node votes at all. Observer nodes run with [`VoteRule::NoVote`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteRule {
    Vote,
    NoVote,
}

impl VoteRule {
    /// Sign a vote in `phase` for `block` with every local key that is a member of
    /// `signing_committee`.
    pub fn create_votes(
        &self,
        keys: &[ConsensusKeypair],
        signing_committee: &Committee,
        phase: VotePhase,
        chain_id: ChainID,
        block: &Block,
        with_bridge_signature: bool,
    ) -> Vec<Vote> {
        match self {
            VoteRule::NoVote => Vec::new(),
            VoteRule::Vote => keys
                .iter()
                .filter(|keypair| signing_committee.contains(&keypair.id()))
                .map(|keypair| Vote::new(keypair, phase, chain_id, block, with_bridge_signature))
                .collect(),
        }
    }
}

/// Whether votes received from peers are collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleVoteRule {
    Collect,
    Ignore,
}

impl HandleVoteRule {
    pub fn collects(&self) -> bool {
        matches!(self, HandleVoteRule::Collect)
    }
}

/// What happens to a block once it is committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertRule {
    InsertOnly,
    InsertAndBroadcast,
}

impl InsertRule {
    pub fn insert<C: Chain>(&self, chain: &C, block: Block) -> Result<(), InsertBlockError> {
        match self {
            InsertRule::InsertOnly => chain.insert_block(block),
            InsertRule::InsertAndBroadcast => chain.insert_and_broadcast_block(block),
        }
    }
}
