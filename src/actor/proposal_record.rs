/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Everything an actor knows about one concrete proposal, keyed by its propose hash.
//!
//! Records only come into existence complete: [`ProposalRecord::new`] takes a [`NewProposal`], whose
//! builder does not compile until the block, its committee snapshots and its proof are all set.
//! Votes that arrive for a proposal the actor has not seen yet wait in [`ParkedVotes`] until the
//! proposal arrives, or expire.

use std::{collections::HashMap, time::Duration};

use typed_builder::TypedBuilder;

use crate::{
    finality::proof::FinalityProof,
    persistence::store::ProposalRecordSnapshot,
    types::{
        block::Block,
        committee::Committee,
        data_types::{CryptoHash, SignatureBytes, TimeSlot, ValidatorID},
        vote::{Vote, VotePhase, VoteValidity},
    },
};

#[derive(TypedBuilder)]
pub struct NewProposal {
    block: Block,
    committee: Committee,
    signing_committee: Committee,
    finality_proof: FinalityProof,
    re_propose_signature: SignatureBytes,
    is_valid_finality_proof: bool,
    /// Time since the Unix epoch.
    receive_time: Duration,
}

pub struct ProposalRecord {
    block: Block,
    propose_hash: CryptoHash,
    /// Content hash of `block`.
    block_hash: CryptoHash,
    committee: Committee,
    signing_committee: Committee,
    finality_proof: FinalityProof,
    re_propose_signature: SignatureBytes,
    pre_votes: HashMap<ValidatorID, Vote>,
    votes: HashMap<ValidatorID, Vote>,

    pub is_valid: bool,
    pub is_pre_voted: bool,
    pub is_voted: bool,
    is_committed: bool,
    pub has_new_pre_vote: bool,
    pub has_new_vote: bool,
    pub is_valid_finality_proof: bool,
    pub error_vote_count: usize,

    /// The timeslot in which content validation failed. The record is not voted for in it.
    pub dropped_in: Option<TimeSlot>,
    pub last_validate_time: Option<Duration>,
    receive_time: Duration,

    /// Changed since it was last persisted.
    is_dirty: bool,
}

impl ProposalRecord {
    pub fn new(new: NewProposal) -> ProposalRecord {
        ProposalRecord {
            propose_hash: new.block.propose_hash(),
            block_hash: new.block.hash(),
            block: new.block,
            committee: new.committee,
            signing_committee: new.signing_committee,
            finality_proof: new.finality_proof,
            re_propose_signature: new.re_propose_signature,
            pre_votes: HashMap::new(),
            votes: HashMap::new(),
            is_valid: false,
            is_pre_voted: false,
            is_voted: false,
            is_committed: false,
            has_new_pre_vote: false,
            has_new_vote: false,
            is_valid_finality_proof: new.is_valid_finality_proof,
            error_vote_count: 0,
            dropped_in: None,
            last_validate_time: None,
            receive_time: new.receive_time,
            is_dirty: true,
        }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn propose_hash(&self) -> CryptoHash {
        self.propose_hash
    }

    pub fn block_hash(&self) -> CryptoHash {
        self.block_hash
    }

    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    pub fn signing_committee(&self) -> &Committee {
        &self.signing_committee
    }

    pub fn finality_proof(&self) -> &FinalityProof {
        &self.finality_proof
    }

    pub fn re_propose_signature(&self) -> SignatureBytes {
        self.re_propose_signature
    }

    pub fn votes(&self, phase: VotePhase) -> &HashMap<ValidatorID, Vote> {
        match phase {
            VotePhase::PreVote => &self.pre_votes,
            VotePhase::Vote => &self.votes,
        }
    }

    pub fn valid_vote_count(&self, phase: VotePhase) -> usize {
        self.votes(phase).len()
    }

    pub fn has_supermajority(&self, phase: VotePhase) -> bool {
        self.signing_committee
            .is_supermajority(self.valid_vote_count(phase))
    }

    /// Whether a vote with the same validator, phase and proposal is already recorded.
    pub fn contains_replay_of(&self, vote: &Vote) -> bool {
        self.votes(vote.phase)
            .get(&vote.validator)
            .is_some_and(|recorded| recorded.is_replay_of(vote))
    }

    /// Record a verified vote. Returns whether it was new. Committed records are frozen and take no
    /// more votes.
    pub fn add_vote(&mut self, vote: Vote) -> bool {
        if self.is_committed
            || vote.validity != VoteValidity::Valid
            || vote.block_hash != self.propose_hash
        {
            return false;
        }
        let votes = match vote.phase {
            VotePhase::PreVote => &mut self.pre_votes,
            VotePhase::Vote => &mut self.votes,
        };
        if votes.contains_key(&vote.validator) {
            return false;
        }
        match vote.phase {
            VotePhase::PreVote => self.has_new_pre_vote = true,
            VotePhase::Vote => self.has_new_vote = true,
        }
        votes.insert(vote.validator, vote);
        self.is_dirty = true;
        true
    }

    /// Evict the votes of `validators` in `phase`. Returns how many were evicted.
    pub fn evict_votes(&mut self, phase: VotePhase, validators: &[ValidatorID]) -> usize {
        let votes = match phase {
            VotePhase::PreVote => &mut self.pre_votes,
            VotePhase::Vote => &mut self.votes,
        };
        let evicted = validators
            .iter()
            .filter(|validator| votes.remove(validator).is_some())
            .count();
        self.error_vote_count += evicted;
        if evicted > 0 {
            self.is_dirty = true;
        }
        evicted
    }

    pub fn is_committed(&self) -> bool {
        self.is_committed
    }

    pub fn mark_committed(&mut self) {
        self.is_committed = true;
        self.is_dirty = true;
    }

    pub fn receive_time(&self) -> Duration {
        self.receive_time
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.is_dirty, false)
    }

    pub fn snapshot(&self) -> ProposalRecordSnapshot {
        let sorted = |votes: &HashMap<ValidatorID, Vote>| {
            let mut votes: Vec<Vote> = votes.values().cloned().collect();
            votes.sort_by_key(|vote| vote.validator);
            votes
        };
        ProposalRecordSnapshot {
            block: self.block.clone(),
            committee: self.committee.clone(),
            signing_committee: self.signing_committee.clone(),
            finality_proof: self.finality_proof.clone(),
            re_propose_signature: self.re_propose_signature,
            is_valid: self.is_valid,
            is_pre_voted: self.is_pre_voted,
            is_voted: self.is_voted,
            is_committed: self.is_committed,
            is_valid_finality_proof: self.is_valid_finality_proof,
            pre_votes: sorted(&self.pre_votes),
            votes: sorted(&self.votes),
            receive_time: self.receive_time.as_secs(),
        }
    }

    /// Rebuild a record from its persisted snapshot. Persisted votes were verified before they were
    /// persisted.
    pub fn restore(snapshot: ProposalRecordSnapshot) -> ProposalRecord {
        let mut record = ProposalRecord::new(
            NewProposal::builder()
                .block(snapshot.block)
                .committee(snapshot.committee)
                .signing_committee(snapshot.signing_committee)
                .finality_proof(snapshot.finality_proof)
                .re_propose_signature(snapshot.re_propose_signature)
                .is_valid_finality_proof(snapshot.is_valid_finality_proof)
                .receive_time(Duration::from_secs(snapshot.receive_time))
                .build(),
        );
        for mut vote in snapshot.pre_votes.into_iter().chain(snapshot.votes) {
            vote.validity = VoteValidity::Valid;
            record.add_vote(vote);
        }
        record.is_valid = snapshot.is_valid;
        record.is_pre_voted = snapshot.is_pre_voted;
        record.is_voted = snapshot.is_voted;
        record.is_committed = snapshot.is_committed;
        record.is_dirty = false;
        record
    }
}

/// Votes for proposals this node has not received yet, by propose hash.
#[derive(Default)]
pub struct ParkedVotes {
    votes: HashMap<CryptoHash, Vec<(Vote, Duration)>>,
}

impl ParkedVotes {
    /// Most votes parked for one proposal. A signing committee larger than this cannot be fully
    /// parked, but its missing votes are re-sent with the next proposal of the same block.
    const MAX_PER_PROPOSAL: usize = 1024;

    /// Most proposals with parked votes. Votes for further unknown proposals are dropped until some
    /// arrive or expire.
    const MAX_PROPOSALS: usize = 256;

    /// Park `vote`, received at `now`. Returns whether it is the first vote parked for its proposal.
    pub fn park(&mut self, vote: Vote, now: Duration) -> bool {
        if !self.votes.contains_key(&vote.block_hash) && self.votes.len() >= Self::MAX_PROPOSALS {
            return false;
        }
        let parked = self.votes.entry(vote.block_hash).or_default();
        let first = parked.is_empty();
        if parked.len() < Self::MAX_PER_PROPOSAL
            && !parked.iter().any(|(recorded, _)| recorded.is_replay_of(&vote))
        {
            parked.push((vote, now));
        }
        first
    }

    /// Take every vote parked for the proposal with `propose_hash`.
    pub fn drain(&mut self, propose_hash: &CryptoHash) -> Vec<Vote> {
        self.votes
            .remove(propose_hash)
            .map(|parked| parked.into_iter().map(|(vote, _)| vote).collect())
            .unwrap_or_default()
    }

    /// Drop votes parked for longer than `ttl`.
    pub fn expire(&mut self, now: Duration, ttl: Duration) {
        for parked in self.votes.values_mut() {
            parked.retain(|(_, parked_at)| now.saturating_sub(*parked_at) <= ttl);
        }
        self.votes.retain(|_, parked| !parked.is_empty());
    }

    pub fn len(&self) -> usize {
        self.votes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}
