/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Finality proofs (proofs of lock change).
//!
//! Every propose message carries a **re-propose signature**: the proposer's Ed25519 signature, for its
//! own propose timeslot, over the [`re_propose_hash`] of the block it proposes. A block that is
//! re-proposed in timeslot `t` after being produced in timeslot `p` carries a [`FinalityProof`] made
//! of the re-propose signatures of the leaders of timeslots `p, p + 1, ..., t - 1`, in that order.
//!
//! A first proposal (produced and proposed in the same timeslot) carries an empty proof.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::BlockHeader,
    committee::{select_leader, Committee},
    crypto_primitives::{hash_parts, verify_signature, ConsensusKeypair},
    data_types::{CryptoHash, SignatureBytes, TimeSlot, ValidatorID},
};

/// Default hard cap on the number of entries in a finality proof.
pub const DEFAULT_MAX_FINALITY_PROOF: usize = 64;

/// The hash that re-propose signatures sign: SHA-256 over
/// `(previous_block_hash, producer, timeslot, aggregate_root_hash)`.
pub fn re_propose_hash(
    previous_block_hash: &CryptoHash,
    producer: &ValidatorID,
    timeslot: TimeSlot,
    aggregate_root_hash: &CryptoHash,
) -> CryptoHash {
    hash_parts(&[
        &previous_block_hash.bytes(),
        &producer.bytes(),
        &timeslot.to_le_bytes(),
        &aggregate_root_hash.bytes(),
    ])
}

/// Sign the re-propose hash of the block with `header`, for `timeslot`.
pub fn sign_re_propose(
    keypair: &ConsensusKeypair,
    header: &BlockHeader,
    timeslot: TimeSlot,
) -> SignatureBytes {
    keypair.sign(
        &re_propose_hash(
            &header.previous_block_hash,
            &header.producer,
            timeslot,
            &header.aggregate_root_hash,
        )
        .bytes(),
    )
}

/// Check that `signature` is the re-propose signature of the leader of `timeslot` for the block with
/// `header`.
pub fn is_correct_re_propose_signature(
    header: &BlockHeader,
    committee: &Committee,
    timeslot: TimeSlot,
    signature: &SignatureBytes,
) -> bool {
    let Some(leader) = select_leader(timeslot, committee) else {
        return false;
    };
    let hash = re_propose_hash(
        &header.previous_block_hash,
        &header.producer,
        timeslot,
        &header.aggregate_root_hash,
    );
    verify_signature(&leader, &hash.bytes(), signature)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FinalityProof {
    /// Entry `k` is the re-propose signature for timeslot `produce_timeslot + k`.
    signatures: Vec<SignatureBytes>,
}

impl FinalityProof {
    pub fn new(signatures: Vec<SignatureBytes>) -> Self {
        Self { signatures }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn signatures(&self) -> &[SignatureBytes] {
        &self.signatures
    }

    /// Check that this is a complete, correct proof for the block with `header`:
    /// 1. The gap `propose_timeslot - produce_timeslot` is at most `max_len`.
    /// 2. There is exactly one entry per timeslot in `[produce_timeslot, propose_timeslot)`.
    /// 3. Every entry is the re-propose signature of the leader of its timeslot.
    ///
    /// Fails closed: any violation returns `false`.
    pub fn verify(&self, header: &BlockHeader, committee: &Committee, max_len: usize) -> bool {
        if header.propose_timeslot < header.produce_timeslot {
            return false;
        }
        let expected_len = header.propose_timeslot - header.produce_timeslot;
        if expected_len > max_len as u64 || self.signatures.len() as u64 != expected_len {
            return false;
        }

        self.signatures
            .iter()
            .enumerate()
            .all(|(offset, signature)| {
                is_correct_re_propose_signature(
                    header,
                    committee,
                    header.produce_timeslot + offset as u64,
                    signature,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use super::*;
    use crate::types::data_types::BlockHeight;

    fn setup() -> (Vec<ConsensusKeypair>, Committee) {
        let keypairs: Vec<ConsensusKeypair> = (0..4)
            .map(|_| ConsensusKeypair::generate(&mut OsRng).unwrap())
            .collect();
        let committee = Committee::new(keypairs.iter().map(|k| k.validator_key()).collect());
        (keypairs, committee)
    }

    fn leader_keypair<'a>(
        keypairs: &'a [ConsensusKeypair],
        committee: &Committee,
        timeslot: TimeSlot,
    ) -> &'a ConsensusKeypair {
        let leader = select_leader(timeslot, committee).unwrap();
        keypairs.iter().find(|k| k.id() == leader).unwrap()
    }

    fn header(producer: ValidatorID, produce: u64, propose: u64) -> BlockHeader {
        BlockHeader {
            height: BlockHeight::new(2),
            previous_block_hash: CryptoHash::new([3; 32]),
            producer,
            produce_timeslot: TimeSlot::new(produce),
            proposer: producer,
            propose_timeslot: TimeSlot::new(propose),
            aggregate_root_hash: CryptoHash::new([4; 32]),
        }
    }

    #[test]
    fn complete_proof_verifies_and_any_single_corruption_fails() {
        let (keypairs, committee) = setup();
        let header = header(keypairs[0].id(), 40, 43);
        let signatures: Vec<SignatureBytes> = (40..43)
            .map(|t| {
                let t = TimeSlot::new(t);
                sign_re_propose(leader_keypair(&keypairs, &committee, t), &header, t)
            })
            .collect();
        let proof = FinalityProof::new(signatures.clone());
        assert!(proof.verify(&header, &committee, DEFAULT_MAX_FINALITY_PROOF));

        // Removing any entry.
        for removed in 0..signatures.len() {
            let mut shorter = signatures.clone();
            shorter.remove(removed);
            assert!(!FinalityProof::new(shorter).verify(&header, &committee, DEFAULT_MAX_FINALITY_PROOF));
        }

        // Corrupting any entry: a signature by the wrong leader.
        for corrupted in 0..signatures.len() {
            let mut wrong = signatures.clone();
            wrong[corrupted] = sign_re_propose(
                leader_keypair(&keypairs, &committee, TimeSlot::new(41 + corrupted as u64)),
                &header,
                TimeSlot::new(40 + corrupted as u64),
            );
            assert!(!FinalityProof::new(wrong).verify(&header, &committee, DEFAULT_MAX_FINALITY_PROOF));
        }

        // Over the cap.
        assert!(!proof.verify(&header, &committee, 2));
    }

    #[test]
    fn first_proposal_needs_an_empty_proof() {
        let (keypairs, committee) = setup();
        let header = header(keypairs[1].id(), 5, 5);
        assert!(FinalityProof::empty().verify(&header, &committee, DEFAULT_MAX_FINALITY_PROOF));

        let extra = sign_re_propose(&keypairs[1], &header, TimeSlot::new(5));
        assert!(!FinalityProof::new(vec![extra]).verify(&header, &committee, DEFAULT_MAX_FINALITY_PROOF));
    }
}
