/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Incremental accumulation of re-propose signatures into finality proofs.
//!
//! The tracker keeps, for every `(previous block, producer, aggregate root hash)` triple it has seen
//! a proposal for, the re-propose signatures of every timeslot it has seen that triple proposed in.
//! Only signatures by the leader of their timeslot are kept. Once it holds a signature for every
//! timeslot in `[produce_timeslot, propose_timeslot)`, [`build_proof`](FinalityProofTracker::build_proof)
//! returns a complete [`FinalityProof`].

use std::collections::{BTreeMap, HashMap};

use super::proof::{is_correct_re_propose_signature, FinalityProof};
use crate::types::{
    block::BlockHeader,
    committee::Committee,
    data_types::{BlockHeight, CryptoHash, SignatureBytes, TimeSlot, ValidatorID},
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct ReProposeKey {
    previous_block_hash: CryptoHash,
    producer: ValidatorID,
    aggregate_root_hash: CryptoHash,
}

impl From<&BlockHeader> for ReProposeKey {
    fn from(header: &BlockHeader) -> Self {
        ReProposeKey {
            previous_block_hash: header.previous_block_hash,
            producer: header.producer,
            aggregate_root_hash: header.aggregate_root_hash,
        }
    }
}

struct ReProposeSignatures {
    height: BlockHeight,
    signatures: BTreeMap<TimeSlot, SignatureBytes>,
}

/// How much of the proof for a particular gap of timeslots the tracker holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofStatus {
    Empty,
    Partial(usize),
    Complete,
}

#[derive(Default)]
pub struct FinalityProofTracker {
    entries: HashMap<ReProposeKey, ReProposeSignatures>,
}

impl FinalityProofTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `signature` as the re-propose signature for `timeslot` of the block with `header`, if it
    /// is the signature of the leader of `timeslot`. Returns whether the signature was recorded.
    pub fn add(
        &mut self,
        header: &BlockHeader,
        committee: &Committee,
        timeslot: TimeSlot,
        signature: SignatureBytes,
    ) -> bool {
        if !is_correct_re_propose_signature(header, committee, timeslot, &signature) {
            return false;
        }
        self.entries
            .entry(ReProposeKey::from(header))
            .or_insert_with(|| ReProposeSignatures {
                height: header.height,
                signatures: BTreeMap::new(),
            })
            .signatures
            .insert(timeslot, signature);
        true
    }

    /// Build the proof covering `[header.produce_timeslot, propose_timeslot)`.
    ///
    /// Returns `None` if any timeslot in the range is missing a signature, or if the range is longer
    /// than `max_len`, in which case the search stops as soon as the cap is exceeded.
    pub fn build_proof(
        &self,
        header: &BlockHeader,
        propose_timeslot: TimeSlot,
        max_len: usize,
    ) -> Option<FinalityProof> {
        if propose_timeslot < header.produce_timeslot {
            return None;
        }
        if propose_timeslot == header.produce_timeslot {
            return Some(FinalityProof::empty());
        }
        let entry = self.entries.get(&ReProposeKey::from(header))?;

        let mut signatures = Vec::new();
        let mut timeslot = header.produce_timeslot;
        while timeslot < propose_timeslot {
            if signatures.len() >= max_len {
                return None;
            }
            signatures.push(*entry.signatures.get(&timeslot)?);
            timeslot = timeslot + 1;
        }
        Some(FinalityProof::new(signatures))
    }

    pub fn status(&self, header: &BlockHeader, propose_timeslot: TimeSlot) -> ProofStatus {
        let required = propose_timeslot - header.produce_timeslot;
        if required == 0 {
            return ProofStatus::Complete;
        }
        let held = self
            .entries
            .get(&ReProposeKey::from(header))
            .map(|entry| {
                entry
                    .signatures
                    .range(header.produce_timeslot..propose_timeslot)
                    .count()
            })
            .unwrap_or(0);
        match held {
            0 => ProofStatus::Empty,
            held if held as u64 == required => ProofStatus::Complete,
            held => ProofStatus::Partial(held),
        }
    }

    /// Remove every entry for blocks at or below `finalized_height`. Returns the number of entries
    /// removed.
    pub fn prune(&mut self, finalized_height: BlockHeight) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.height > finalized_height);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use super::*;
    use crate::{
        finality::proof::{sign_re_propose, DEFAULT_MAX_FINALITY_PROOF},
        types::{committee::select_leader, crypto_primitives::ConsensusKeypair},
    };

    #[test]
    fn proof_completes_as_leaders_re_propose() {
        let keypairs: Vec<ConsensusKeypair> = (0..4)
            .map(|_| ConsensusKeypair::generate(&mut OsRng).unwrap())
            .collect();
        let committee = Committee::new(keypairs.iter().map(|k| k.validator_key()).collect());
        let leader_of = |t: TimeSlot| {
            let leader = select_leader(t, &committee).unwrap();
            keypairs.iter().find(|k| k.id() == leader).unwrap()
        };
        let header = BlockHeader {
            height: BlockHeight::new(8),
            previous_block_hash: CryptoHash::new([9; 32]),
            producer: leader_of(TimeSlot::new(100)).id(),
            produce_timeslot: TimeSlot::new(100),
            proposer: leader_of(TimeSlot::new(100)).id(),
            propose_timeslot: TimeSlot::new(100),
            aggregate_root_hash: CryptoHash::zero(),
        };
        let mut tracker = FinalityProofTracker::new();
        let target = TimeSlot::new(102);

        assert_eq!(tracker.status(&header, target), ProofStatus::Empty);
        assert_eq!(tracker.build_proof(&header, target, DEFAULT_MAX_FINALITY_PROOF), None);

        // A signature by someone other than the leader of the timeslot is ignored.
        let t = TimeSlot::new(100);
        assert!(!tracker.add(&header, &committee, t, sign_re_propose(leader_of(t + 1), &header, t)));

        assert!(tracker.add(&header, &committee, t, sign_re_propose(leader_of(t), &header, t)));
        assert_eq!(tracker.status(&header, target), ProofStatus::Partial(1));

        let t = TimeSlot::new(101);
        assert!(tracker.add(&header, &committee, t, sign_re_propose(leader_of(t), &header, t)));
        assert_eq!(tracker.status(&header, target), ProofStatus::Complete);

        let mut re_proposed = header.clone();
        re_proposed.propose_timeslot = target;
        let proof = tracker
            .build_proof(&header, target, DEFAULT_MAX_FINALITY_PROOF)
            .unwrap();
        assert!(proof.verify(&re_proposed, &committee, DEFAULT_MAX_FINALITY_PROOF));

        // Over the cap.
        assert_eq!(tracker.build_proof(&header, target, 1), None);

        assert_eq!(tracker.prune(BlockHeight::new(7)), 0);
        assert_eq!(tracker.prune(BlockHeight::new(8)), 1);
        assert!(tracker.is_empty());
    }
}
