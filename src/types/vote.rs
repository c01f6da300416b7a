/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Votes and their signatures.
//!
//! A [`Vote`] carries three signatures:
//! 1. A partial **BLS signature** over `(chain_id, block hash)` that is aggregated into the committed
//!    block's [`ValidationData`](super::block::ValidationData). Pre-votes and votes use different
//!    domain separation tags, so a pre-vote can never be counted as a vote.
//! 2. An optional Ed25519 **bridge signature** over the block hash, for chains whose insert path needs
//!    bridge co-signatures.
//! 3. An Ed25519 **confirmation signature** over every other field of the vote, which proves that the
//!    validator named in the vote produced it.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::Block,
    crypto_primitives::{
        bls_verify, verify_signature, ConsensusKeypair, SignedMessage, PREVOTE_DST, VOTE_DST,
    },
    data_types::{
        BlsPublicKeyBytes, BlsSignatureBytes, ChainID, CryptoHash, SignatureBytes, TimeSlot,
        ValidatorID,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub enum VotePhase {
    PreVote,
    Vote,
}

impl VotePhase {
    /// Domain separation tag of partial signatures in this phase.
    pub fn dst(&self) -> &'static [u8] {
        match self {
            VotePhase::PreVote => PREVOTE_DST,
            VotePhase::Vote => VOTE_DST,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            VotePhase::PreVote => 0,
            VotePhase::Vote => 1,
        }
    }
}

/// Local verdict on a vote's partial signature. Not sent over the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VoteValidity {
    #[default]
    Unchecked,
    Valid,
    Invalid,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub phase: VotePhase,
    pub chain_id: ChainID,
    pub validator: ValidatorID,
    /// Propose hash of the proposal being voted for.
    pub block_hash: CryptoHash,
    pub previous_block_hash: CryptoHash,
    pub produce_timeslot: TimeSlot,
    pub propose_timeslot: TimeSlot,
    pub bls_signature: BlsSignatureBytes,
    pub bridge_signature: Option<SignatureBytes>,
    pub confirmation_signature: SignatureBytes,
    #[borsh_skip]
    pub validity: VoteValidity,
}

impl Vote {
    /// Create and sign a vote by `keypair` for `block`.
    pub fn new(
        keypair: &ConsensusKeypair,
        phase: VotePhase,
        chain_id: ChainID,
        block: &Block,
        with_bridge_signature: bool,
    ) -> Vote {
        let content_hash = block.hash();
        let bls_signature = keypair.bls_sign(&bls_message(chain_id, &content_hash), phase.dst());
        let bridge_signature =
            with_bridge_signature.then(|| keypair.sign(&content_hash.bytes()));

        let mut vote = Vote {
            phase,
            chain_id,
            validator: keypair.id(),
            block_hash: block.propose_hash(),
            previous_block_hash: block.header.previous_block_hash,
            produce_timeslot: block.header.produce_timeslot,
            propose_timeslot: block.header.propose_timeslot,
            bls_signature,
            bridge_signature,
            confirmation_signature: SignatureBytes::new([0u8; 64]),
            validity: VoteValidity::Unchecked,
        };
        vote.confirm(keypair);
        vote
    }

    /// Sign every other field of the vote with `keypair`, replacing the confirmation signature.
    pub fn confirm(&mut self, keypair: &ConsensusKeypair) {
        self.confirmation_signature = keypair.sign(&self.message_bytes());
    }

    /// Check that the validator named in the vote signed it.
    pub fn is_owned(&self) -> bool {
        self.is_correct(&self.validator)
    }

    /// Check the partial BLS signature against `public_key`, for the block with content hash
    /// `content_hash`.
    pub fn is_partial_signature_correct(
        &self,
        public_key: &BlsPublicKeyBytes,
        content_hash: &CryptoHash,
    ) -> bool {
        bls_verify(
            public_key,
            &bls_message(self.chain_id, content_hash),
            self.phase.dst(),
            &self.bls_signature,
        )
    }

    /// Check the bridge co-signature, if one is present.
    pub fn is_bridge_signature_correct(&self, content_hash: &CryptoHash) -> bool {
        match &self.bridge_signature {
            Some(signature) => verify_signature(&self.validator, &content_hash.bytes(), signature),
            None => true,
        }
    }

    /// Whether `other` is a replay of this vote: same validator, phase, proposal and timeslot.
    pub fn is_replay_of(&self, other: &Vote) -> bool {
        self.validator == other.validator
            && self.phase == other.phase
            && self.block_hash == other.block_hash
            && self.propose_timeslot == other.propose_timeslot
    }
}

impl SignedMessage for Vote {
    fn message_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + 8 + 32 * 3 + 8 * 2 + 96 + 65);
        bytes.push(self.phase.tag());
        bytes.extend_from_slice(&self.chain_id.int().to_le_bytes());
        bytes.extend_from_slice(&self.validator.bytes());
        bytes.extend_from_slice(&self.block_hash.bytes());
        bytes.extend_from_slice(&self.previous_block_hash.bytes());
        bytes.extend_from_slice(&self.produce_timeslot.to_le_bytes());
        bytes.extend_from_slice(&self.propose_timeslot.to_le_bytes());
        bytes.extend_from_slice(&self.bls_signature.bytes());
        match &self.bridge_signature {
            Some(signature) => {
                bytes.push(1);
                bytes.extend_from_slice(&signature.bytes());
            }
            None => bytes.push(0),
        }
        bytes
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.confirmation_signature
    }
}

/// The message that partial BLS signatures sign: the little-endian chain id followed by the block
/// hash.
pub fn bls_message(chain_id: ChainID, content_hash: &CryptoHash) -> Vec<u8> {
    let mut message = Vec::with_capacity(40);
    message.extend_from_slice(&chain_id.int().to_le_bytes());
    message.extend_from_slice(&content_hash.bytes());
    message
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use super::*;
    use crate::types::{
        block::BlockHeader,
        data_types::BlockHeight,
    };

    fn block(producer: ValidatorID) -> Block {
        Block::new(
            BlockHeader {
                height: BlockHeight::new(1),
                previous_block_hash: CryptoHash::zero(),
                producer,
                produce_timeslot: TimeSlot::new(3),
                proposer: producer,
                propose_timeslot: TimeSlot::new(3),
                aggregate_root_hash: CryptoHash::zero(),
            },
            vec![],
        )
    }

    #[test]
    fn vote_signatures_verify_and_detect_tampering() {
        let keypair = ConsensusKeypair::generate(&mut OsRng).unwrap();
        let block = block(keypair.id());
        let vote = Vote::new(&keypair, VotePhase::Vote, ChainID::new(2), &block, true);

        assert!(vote.is_owned());
        assert!(vote.is_partial_signature_correct(&keypair.bls_public_key(), &block.hash()));
        assert!(vote.is_bridge_signature_correct(&block.hash()));

        let mut tampered = vote.clone();
        tampered.propose_timeslot = TimeSlot::new(4);
        assert!(!tampered.is_owned());

        let mut wrong_phase = vote.clone();
        wrong_phase.phase = VotePhase::PreVote;
        assert!(!wrong_phase.is_partial_signature_correct(&keypair.bls_public_key(), &block.hash()));
    }

    #[test]
    fn validity_is_not_sent_over_the_wire() {
        let keypair = ConsensusKeypair::generate(&mut OsRng).unwrap();
        let mut vote = Vote::new(&keypair, VotePhase::PreVote, ChainID::new(0), &block(keypair.id()), false);
        vote.validity = VoteValidity::Valid;

        let decoded = Vote::try_from_slice(&vote.try_to_vec().unwrap()).unwrap();
        assert_eq!(decoded.validity, VoteValidity::Unchecked);
        assert!(decoded.is_owned());
    }
}
