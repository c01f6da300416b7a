/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The propose rule: what a proposal carries, and how much of it a receiver checks.
//!
//! Every proposal carries its proposer's re-propose signature for the propose timeslot, under both
//! rules, so that finality proofs can be built from the moment the two-phase rule activates. Only
//! [`ProposeRule::WithFinalityProof`] attaches and verifies the proof itself.

use crate::{
    finality::{proof::FinalityProof, tracker::FinalityProofTracker},
    types::{block::Block, committee::Committee},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposeRule {
    Plain,
    WithFinalityProof,
}

impl ProposeRule {
    /// The finality proof to attach to `block`, which this node is about to propose.
    ///
    /// A re-proposal whose proof is still incomplete goes out with an empty proof. Receivers running
    /// the two-phase rule will not vote for it unless they hold its lock.
    pub fn finality_proof_for(
        &self,
        block: &Block,
        tracker: &FinalityProofTracker,
        max_len: usize,
    ) -> FinalityProof {
        match self {
            ProposeRule::Plain => FinalityProof::empty(),
            ProposeRule::WithFinalityProof => {
                if block.is_first_proposal() {
                    return FinalityProof::empty();
                }
                match tracker.build_proof(&block.header, block.header.propose_timeslot, max_len) {
                    Some(proof) => proof,
                    None => {
                        log::debug!(
                            "incomplete finality proof for block at height {}, proposing without",
                            block.height()
                        );
                        FinalityProof::empty()
                    }
                }
            }
        }
    }

    /// Whether the proof attached to a received `block` is a valid finality proof. Under
    /// [`ProposeRule::Plain`] proofs are not checked, and never count as valid.
    pub fn verify_finality_proof(
        &self,
        proof: &FinalityProof,
        block: &Block,
        committee: &Committee,
        max_len: usize,
    ) -> bool {
        match self {
            ProposeRule::Plain => false,
            ProposeRule::WithFinalityProof => proof.verify(&block.header, committee, max_len),
        }
    }
}
