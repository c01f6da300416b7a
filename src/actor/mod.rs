/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-chain consensus actor.
//!
//! ## Round structure
//!
//! Every timeslot the actor goes through the same states: it listens for (or, if it holds the leader's
//! key, makes) a proposal, validates proposals that extend its best view, votes (pre-votes first under
//! Lemma2), and commits once a proposal has collected a supermajority of votes. The actor is driven by
//! [`Actor::on_tick`], which runs the whole round, and by [`Actor::on_message`] and
//! [`Actor::on_verified_vote`], which only fold new information into the proposal records.
//!
//! ## Single writer
//!
//! All state (proposal records, Byzantine detector, finality tracker, histories) is owned by the actor
//! and mutated only through `&mut self`. The [runner](runner) calls these methods from one thread;
//! signature verification runs on a [pool](verifier) whose results come back through the actor's
//! inbox.
//!
//! ## Safety
//!
//! Before any vote leaves the node, the node's [`VoteLock`] for the block's height is persisted. When
//! the node is leader, it re-proposes the block it is locked on instead of creating a new one.

pub mod block_creation;

pub mod proposal_record;

pub mod runner;

pub mod timeslot;

pub mod verifier;

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Display, Formatter},
    sync::{mpsc::Sender, Arc},
    time::{Duration, SystemTime},
};

use self::{
    block_creation::BlockCreator,
    proposal_record::{NewProposal, ParkedVotes, ProposalRecord},
    timeslot::TimeSlotClock,
    verifier::{VerificationJob, VerifiedVote, VerifierPool},
};
use crate::{
    aggregation::aggregate_votes,
    byzantine::{ByzantineDetector, ByzantineError},
    chain::{Chain, CommitteeChain, View},
    config::{Configuration, ConfigurationError},
    events::*,
    finality::{proof::sign_re_propose, tracker::FinalityProofTracker},
    messages::{BftMessage, ProposeMessage, RequestBlockMessage},
    networking::Network,
    persistence::{
        pluggables::KVStore,
        store::{ConsensusStore, PersistenceError},
    },
    rules::{
        policies::VoteRule,
        validator::{VoteCandidate, VoteLock},
        RuleStrategy,
    },
    types::{
        block::ValidationData,
        committee::Committee,
        data_types::{BlockHeight, ChainID, CryptoHash, PeerID, SignatureBytes, TimeSlot, ValidatorIndex},
        vote::{Vote, VotePhase, VoteValidity},
    },
};

/// Everything that enters the actor between ticks.
pub enum ActorInput {
    Message(PeerID, BftMessage),
    VerifiedVote(VerifiedVote),
}

pub struct Actor<C: Chain, CC: CommitteeChain, N: Network, K: KVStore> {
    configuration: Configuration,
    chain_id: ChainID,
    peer_id: PeerID,
    chain: Arc<C>,
    committee_chain: Arc<CC>,
    network: N,
    store: ConsensusStore<K>,
    rules: RuleStrategy,
    timeslots: TimeSlotClock,
    records: HashMap<CryptoHash, ProposalRecord>,
    parked_votes: ParkedVotes,
    detector: ByzantineDetector,
    tracker: FinalityProofTracker,
    propose_history: BTreeMap<TimeSlot, CryptoHash>,
    vote_history: BTreeMap<BlockHeight, VoteLock>,
    /// Records pruned since the last flush, to be deleted from the store.
    pending_deletions: Vec<CryptoHash>,
    block_creator: BlockCreator<C>,
    verifier: Option<VerifierPool>,
    event_publisher: Option<Sender<Event>>,
    /// Time of the last tick, since the Unix epoch.
    now: Duration,
}

impl<C: Chain, CC: CommitteeChain, N: Network, K: KVStore> Actor<C, CC, N, K> {
    /// Create an actor, recovering its propose history, vote history and proposal records from
    /// `kv_store`.
    ///
    /// Until a [verifier pool](Actor::set_verifier) is set, votes are verified on the calling thread.
    pub fn new(
        configuration: Configuration,
        chain: Arc<C>,
        committee_chain: Arc<CC>,
        network: N,
        kv_store: K,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, ConsensusError> {
        configuration.validate()?;
        let chain_id = configuration.chain_id;
        if chain.chain_id() != chain_id {
            return Err(ConfigurationError::ChainMismatch {
                configured: chain_id,
                chain: chain.chain_id(),
            }
            .into());
        }

        let store = ConsensusStore::new(kv_store, chain_id);
        let recovered = store.load()?;
        let final_height = chain.final_view().height;
        let records: HashMap<CryptoHash, ProposalRecord> = recovered
            .records
            .into_iter()
            .filter(|snapshot| snapshot.block.height() > final_height)
            .map(|snapshot| {
                let record = ProposalRecord::restore(snapshot);
                (record.propose_hash(), record)
            })
            .collect();
        if !records.is_empty() {
            log::info!("recovered {} proposal records for chain {}", records.len(), chain_id);
        }

        Ok(Actor {
            peer_id: configuration.peer_id(),
            rules: RuleStrategy::new(&configuration, chain.best_view().height),
            timeslots: TimeSlotClock::new(configuration.timeslot_duration),
            block_creator: BlockCreator::new(chain.clone()),
            configuration,
            chain_id,
            chain,
            committee_chain,
            network,
            store,
            records,
            parked_votes: ParkedVotes::default(),
            detector: ByzantineDetector::new(),
            tracker: FinalityProofTracker::new(),
            propose_history: recovered.propose_history,
            vote_history: recovered.vote_history,
            pending_deletions: Vec::new(),
            verifier: None,
            event_publisher,
            now: Duration::ZERO,
        })
    }

    pub(crate) fn set_verifier(&mut self, verifier: VerifierPool) {
        self.verifier = Some(verifier);
    }

    pub fn on_input(&mut self, input: ActorInput) {
        match input {
            ActorInput::Message(origin, message) => self.on_message(origin, message),
            ActorInput::VerifiedVote(verified) => self.on_verified_vote(verified),
        }
    }

    /// Run one round of the state machine at `now` (time since the Unix epoch):
    /// 1. Switch rules if the best view crossed the Lemma2 activation height.
    /// 2. Prune state at or below the finalized height, and records past their TTL.
    /// 3. If a new timeslot started and this node holds its leader's key, propose.
    /// 4. Validate, then vote for, proposals of the current timeslot.
    /// 5. Commit proposals that collected a vote supermajority.
    /// 6. Persist changed proposal records.
    pub fn on_tick(&mut self, now: Duration) {
        self.now = now;

        let best_view = self.chain.best_view();
        if let Some((from, to)) = self.rules.update(best_view.height) {
            log::info!("chain {} switches from {} to {} at height {}", self.chain_id, from, to, best_view.height);
            Event::publish(
                &self.event_publisher,
                Event::SwitchRule(SwitchRuleEvent {
                    timestamp: SystemTime::now(),
                    height: best_view.height,
                    from,
                    to,
                }),
            );
        }

        self.prune();

        if let Some(timeslot) = self.timeslots.tick(now) {
            let leader = self
                .current_committee()
                .and_then(|committee| self.chain.proposer_by_timeslot(timeslot, &committee));
            Event::publish(
                &self.event_publisher,
                Event::StartTimeSlot(StartTimeSlotEvent {
                    timestamp: SystemTime::now(),
                    timeslot,
                    leader,
                }),
            );
            self.propose(timeslot);
        }

        if let Some(timeslot) = self.timeslots.current() {
            self.validate_proposals(timeslot);
            self.vote(timeslot);
        }

        self.commit();
        self.flush();
    }

    /// Fold a message from `origin` into the actor's state. Malformed or irrelevant messages are dropped.
    pub fn on_message(&mut self, origin: PeerID, message: BftMessage) {
        match message {
            BftMessage::Propose(propose) => self.on_propose(origin, propose),
            BftMessage::Vote(vote) => self.on_vote(origin, vote),
            BftMessage::RequestBlock(request) => self.on_request_block(request),
        }
    }

    /// Admit a vote whose signatures were checked, after running it through the Byzantine detector.
    pub fn on_verified_vote(&mut self, verified: VerifiedVote) {
        let VerifiedVote { vote, result } = verified;
        let Some(record) = self.records.get_mut(&vote.block_hash) else {
            return;
        };
        if let Err(err) = result {
            record.error_vote_count += 1;
            log::debug!("dropping vote for {}: {}", vote.block_hash, err);
            return;
        }
        if record.is_committed() || record.contains_replay_of(&vote) {
            return;
        }

        match self.detector.validate_for_block(&record.block().header, &vote, |vote| {
            vote.validity == VoteValidity::Valid
        }) {
            Ok(()) => {
                record.add_vote(vote);
            }
            Err(ByzantineError::Blacklisted(_)) => {
                log::debug!("dropping vote from blacklisted validator {}", vote.validator);
            }
            Err(violation) => {
                log::warn!("blacklisting validator {}: {}", vote.validator, violation);
                Event::publish(
                    &self.event_publisher,
                    Event::BlacklistValidator(BlacklistValidatorEvent {
                        timestamp: SystemTime::now(),
                        validator: vote.validator,
                        reason: violation,
                    }),
                );
            }
        }
    }

    pub fn record(&self, propose_hash: &CryptoHash) -> Option<&ProposalRecord> {
        self.records.get(propose_hash)
    }

    pub fn records(&self) -> impl Iterator<Item = &ProposalRecord> {
        self.records.values()
    }

    pub fn vote_lock(&self, height: BlockHeight) -> Option<&VoteLock> {
        self.vote_history.get(&height)
    }

    pub fn detector(&self) -> &ByzantineDetector {
        &self.detector
    }

    pub fn rules(&self) -> &RuleStrategy {
        &self.rules
    }

    pub fn current_timeslot(&self) -> Option<TimeSlot> {
        self.timeslots.current()
    }

    pub fn peer_id(&self) -> &PeerID {
        &self.peer_id
    }

    fn current_committee(&self) -> Option<Committee> {
        self.committee_chain
            .committees_from_view_hash(&self.committee_chain.final_view(), self.chain_id)
    }

    fn propose(&mut self, timeslot: TimeSlot) {
        if self.propose_history.contains_key(&timeslot) {
            return;
        }
        let Some(committee) = self.current_committee() else {
            log::debug!("no committee for chain {}, not proposing", self.chain_id);
            return;
        };
        let Some(leader) = self.chain.proposer_by_timeslot(timeslot, &committee) else {
            return;
        };
        let Some(keypair) = self
            .configuration
            .keys
            .iter()
            .find(|keypair| keypair.id() == leader)
            .cloned()
        else {
            return;
        };

        let best_view = self.chain.best_view();
        let locked_block = self
            .vote_history
            .get(&(best_view.height + 1))
            .and_then(|lock| {
                self.records.values().find(|record| {
                    record.block_hash() == lock.block_hash
                        && record.block().header.previous_block_hash == best_view.hash
                })
            })
            .map(|record| record.block().clone());

        let created = match &locked_block {
            Some(old_block) => self
                .chain
                .create_new_block_from_old_block(old_block, leader, timeslot),
            None => self.block_creator.create_or_timeout(
                best_view,
                leader,
                timeslot,
                self.configuration.block_creation_timeout(),
            ),
        };
        let block = match created {
            Ok(block) => block,
            Err(err) => {
                log::warn!("not proposing in timeslot {}: {}", timeslot, err);
                return;
            }
        };
        if block.header.proposer != leader
            || block.header.propose_timeslot != timeslot
            || block.header.previous_block_hash != best_view.hash
        {
            log::warn!("chain created a block that does not extend the best view in timeslot {}", timeslot);
            return;
        }

        let re_propose_signature = sign_re_propose(&keypair, &block.header, timeslot);
        self.tracker
            .add(&block.header, &committee, timeslot, re_propose_signature);
        let finality_proof = self.rules.propose_rule().finality_proof_for(
            &block,
            &self.tracker,
            self.configuration.max_finality_proof,
        );
        let finality_proof_len = finality_proof.len();
        let message = match ProposeMessage::new(
            self.peer_id.clone(),
            &block,
            finality_proof,
            re_propose_signature,
        ) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("cannot encode proposal: {}", err);
                return;
            }
        };

        self.propose_history.insert(timeslot, block.propose_hash());
        if let Err(err) = self.store.save_propose_history(&self.propose_history) {
            log::warn!("not proposing, propose history was not persisted: {}", err);
            return;
        }

        Event::publish(
            &self.event_publisher,
            Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                propose_hash: block.propose_hash(),
                height: block.height(),
                timeslot,
                re_proposal: locked_block.is_some(),
                finality_proof_len,
            }),
        );
        self.network.broadcast(BftMessage::Propose(message.clone()));
        self.on_propose(self.peer_id.clone(), message);
    }

    fn on_propose(&mut self, origin: PeerID, message: ProposeMessage) {
        let block = match message.block() {
            Ok(block) => block,
            Err(err) => {
                log::debug!("dropping proposal from {}: {}", origin.as_str(), err);
                return;
            }
        };
        let propose_hash = block.propose_hash();
        if self.records.contains_key(&propose_hash) {
            return;
        }
        let header = block.header.clone();
        if message.timeslot != header.propose_timeslot
            || header.height <= self.chain.final_view().height
        {
            return;
        }
        let Some(committee) = self.current_committee() else {
            return;
        };
        if self.chain.proposer_by_timeslot(header.propose_timeslot, &committee) != Some(header.proposer) {
            log::warn!(
                "dropping proposal from {}: {} is not the leader of timeslot {}",
                origin.as_str(),
                header.proposer,
                header.propose_timeslot
            );
            return;
        }
        if !self.tracker.add(
            &header,
            &committee,
            header.propose_timeslot,
            message.re_propose_signature,
        ) {
            log::warn!("dropping proposal from {}: bad re-propose signature", origin.as_str());
            return;
        }
        // Entries of the attached proof that verify are kept towards future proofs.
        if header.produce_timeslot <= header.propose_timeslot
            && message.finality_proof.len() <= self.configuration.max_finality_proof
        {
            for (offset, signature) in message.finality_proof.signatures().iter().enumerate() {
                let Some(timeslot) = header.produce_timeslot.checked_add(offset as u64) else {
                    break;
                };
                self.tracker.add(&header, &committee, timeslot, *signature);
            }
        }

        let is_valid_finality_proof = self.rules.propose_rule().verify_finality_proof(
            &message.finality_proof,
            &block,
            &committee,
            self.configuration.max_finality_proof,
        );
        let signing_committee = self.chain.signing_committee(&block, &committee);
        if origin != self.peer_id && !self.chain.has_block(&header.previous_block_hash) {
            self.network
                .request_missing_view(origin.clone(), vec![header.previous_block_hash]);
        }

        Event::publish(
            &self.event_publisher,
            Event::ReceiveProposal(ReceiveProposalEvent {
                timestamp: SystemTime::now(),
                origin,
                propose_hash,
                height: header.height,
                timeslot: header.propose_timeslot,
            }),
        );

        let record = ProposalRecord::new(
            NewProposal::builder()
                .block(block)
                .committee(committee)
                .signing_committee(signing_committee)
                .finality_proof(message.finality_proof)
                .re_propose_signature(message.re_propose_signature)
                .is_valid_finality_proof(is_valid_finality_proof)
                .receive_time(self.now)
                .build(),
        );
        self.records.insert(propose_hash, record);

        for vote in self.parked_votes.drain(&propose_hash) {
            self.submit_vote(vote);
        }
    }

    fn on_vote(&mut self, origin: PeerID, vote: Vote) {
        if !self.rules.handle_vote_rule().collects() || vote.chain_id != self.chain_id {
            return;
        }
        match self.records.get(&vote.block_hash) {
            Some(record) => {
                if record.is_committed() || record.contains_replay_of(&vote) {
                    return;
                }
                Event::publish(
                    &self.event_publisher,
                    Event::ReceiveVote(ReceiveVoteEvent {
                        timestamp: SystemTime::now(),
                        origin,
                        vote: vote.clone(),
                    }),
                );
                self.submit_vote(vote);
            }
            None => {
                // Only committee members' own votes may hold space until the proposal arrives.
                let is_member = self
                    .current_committee()
                    .is_some_and(|committee| committee.contains(&vote.validator));
                if !is_member || !vote.is_owned() {
                    log::debug!("dropping vote for unknown proposal {} from {}", vote.block_hash, origin.as_str());
                    return;
                }
                let block_hash = vote.block_hash;
                if self.parked_votes.park(vote, self.now) {
                    self.network.send(
                        origin,
                        BftMessage::RequestBlock(RequestBlockMessage {
                            block_hash,
                            peer_id: self.peer_id.clone(),
                        }),
                    );
                }
            }
        }
    }

    fn on_request_block(&mut self, request: RequestBlockMessage) {
        let Some(record) = self.records.get(&request.block_hash) else {
            return;
        };
        match ProposeMessage::new(
            self.peer_id.clone(),
            record.block(),
            record.finality_proof().clone(),
            record.re_propose_signature(),
        ) {
            Ok(message) => self.network.send(request.peer_id, BftMessage::Propose(message)),
            Err(err) => log::warn!("cannot encode requested proposal: {}", err),
        }
    }

    fn submit_vote(&mut self, vote: Vote) {
        let Some(record) = self.records.get(&vote.block_hash) else {
            return;
        };
        let job = VerificationJob {
            signing_committee: record.signing_committee().clone(),
            content_hash: record.block_hash(),
            vote,
        };
        let verified = match &self.verifier {
            Some(verifier) => verifier.submit(job),
            None => Some(job.run()),
        };
        if let Some(verified) = verified {
            self.on_verified_vote(verified);
        }
    }

    fn validate_proposals(&mut self, timeslot: TimeSlot) {
        let best_view = self.chain.best_view();
        let now = self.now;
        let interval = self.configuration.validate_interval;
        for record in self.records.values_mut() {
            let header = &record.block().header;
            let due = record
                .last_validate_time
                .map_or(true, |last| now.saturating_sub(last) >= interval);
            if record.is_valid
                || record.is_committed()
                || header.propose_timeslot != timeslot
                || header.previous_block_hash != best_view.hash
                || record.dropped_in == Some(timeslot)
                || !due
            {
                continue;
            }

            record.last_validate_time = Some(now);
            let valid = match self.chain.validate_pre_sign_block(record.block()) {
                Ok(()) => {
                    record.is_valid = true;
                    true
                }
                Err(err) => {
                    log::warn!("proposal {} fails validation: {}", record.propose_hash(), err);
                    record.dropped_in = Some(timeslot);
                    false
                }
            };
            record.mark_dirty();
            Event::publish(
                &self.event_publisher,
                Event::ValidateBlock(ValidateBlockEvent {
                    timestamp: SystemTime::now(),
                    propose_hash: record.propose_hash(),
                    valid,
                }),
            );
        }
    }

    fn vote(&mut self, timeslot: TimeSlot) {
        if self.rules.vote_rule() == VoteRule::NoVote {
            return;
        }
        let best_view = self.chain.best_view();
        let mut candidates: Vec<(Duration, CryptoHash)> = self
            .records
            .values()
            .filter(|record| {
                let header = &record.block().header;
                record.is_valid
                    && !record.is_committed()
                    && header.propose_timeslot == timeslot
                    && header.previous_block_hash == best_view.hash
                    && record.dropped_in != Some(timeslot)
            })
            .map(|record| (record.receive_time(), record.propose_hash()))
            .collect();
        // Earliest received first, so that an equivocating leader cannot choose which of its
        // proposals this node locks on by the order of a hash map.
        candidates.sort();

        for (_, propose_hash) in candidates {
            if self.rules.uses_pre_votes() {
                self.pre_vote_then_vote(&propose_hash, &best_view);
            } else {
                let Some(record) = self.records.get(&propose_hash) else {
                    continue;
                };
                if !record.is_voted
                    && self.is_voteable(record, &best_view)
                    && self.cast_votes(&propose_hash, VotePhase::Vote)
                {
                    if let Some(record) = self.records.get_mut(&propose_hash) {
                        record.is_voted = true;
                        record.mark_dirty();
                    }
                }
            }
        }
    }

    fn pre_vote_then_vote(&mut self, propose_hash: &CryptoHash, best_view: &View) {
        let Some(record) = self.records.get(propose_hash) else {
            return;
        };
        if !record.is_pre_voted
            && self.is_voteable(record, best_view)
            && self.cast_votes(propose_hash, VotePhase::PreVote)
        {
            if let Some(record) = self.records.get_mut(propose_hash) {
                record.is_pre_voted = true;
                record.mark_dirty();
            }
        }

        let Some(record) = self.records.get_mut(propose_hash) else {
            return;
        };
        if !record.is_pre_voted
            || record.is_voted
            || !record.has_new_pre_vote
            || !record.has_supermajority(VotePhase::PreVote)
        {
            return;
        }
        // Retried only once another pre-vote arrives.
        record.has_new_pre_vote = false;
        let count = record.valid_vote_count(VotePhase::PreVote);
        Event::publish(
            &self.event_publisher,
            Event::CollectVotes(CollectVotesEvent {
                timestamp: SystemTime::now(),
                propose_hash: *propose_hash,
                phase: VotePhase::PreVote,
                count,
            }),
        );
        let Some(record) = self.records.get(propose_hash) else {
            return;
        };
        if self.is_voteable(record, best_view) && self.cast_votes(propose_hash, VotePhase::Vote) {
            if let Some(record) = self.records.get_mut(propose_hash) {
                record.is_voted = true;
                record.mark_dirty();
            }
        }
    }

    fn is_voteable(&self, record: &ProposalRecord, best_view: &View) -> bool {
        let block = record.block();
        let candidate = VoteCandidate {
            block,
            is_valid: record.is_valid,
            has_valid_finality_proof: record.is_valid_finality_proof,
            expected_leader: self
                .chain
                .proposer_by_timeslot(block.header.propose_timeslot, record.committee()),
            previous_propose_timeslot: best_view.propose_timeslot,
        };
        self.rules
            .validator_rule()
            .is_voteable(&candidate, self.vote_history.get(&block.height()))
    }

    /// Sign, lock on, broadcast and admit this node's votes in `phase` for a proposal. Returns whether
    /// any vote was cast.
    fn cast_votes(&mut self, propose_hash: &CryptoHash, phase: VotePhase) -> bool {
        let Some(record) = self.records.get(propose_hash) else {
            return false;
        };
        let votes = self.rules.vote_rule().create_votes(
            &self.configuration.keys,
            record.signing_committee(),
            phase,
            self.chain_id,
            record.block(),
            self.chain.requires_bridge_signatures(),
        );
        if votes.is_empty() {
            return false;
        }

        // The lock must be durable before the votes leave this node, and is only taken once it is.
        let mut vote_history = self.vote_history.clone();
        vote_history.insert(record.block().height(), VoteLock::new(record.block()));
        if let Err(err) = self.store.save_vote_history(&vote_history) {
            log::warn!("not voting, vote history was not persisted: {}", err);
            return false;
        }
        self.vote_history = vote_history;

        for mut vote in votes {
            self.network.broadcast(BftMessage::Vote(vote.clone()));
            Event::publish(
                &self.event_publisher,
                Event::Vote(VoteEvent {
                    timestamp: SystemTime::now(),
                    vote: vote.clone(),
                }),
            );
            vote.validity = VoteValidity::Valid;
            self.on_verified_vote(VerifiedVote { vote, result: Ok(()) });
        }
        true
    }

    fn commit(&mut self) {
        let best_view = self.chain.best_view();
        let ready: Vec<CryptoHash> = self
            .records
            .values()
            .filter(|record| {
                !record.is_committed()
                    && record.has_new_vote
                    && record.block().header.previous_block_hash == best_view.hash
                    && record.has_supermajority(VotePhase::Vote)
            })
            .map(|record| record.propose_hash())
            .collect();

        for propose_hash in ready {
            self.commit_record(&propose_hash);
        }
    }

    fn commit_record(&mut self, propose_hash: &CryptoHash) {
        // A block at this height may have been committed earlier in this tick.
        let best_view = self.chain.best_view();
        let Some(record) = self.records.get_mut(propose_hash) else {
            return;
        };
        if record.block().height() <= best_view.height {
            return;
        }
        record.has_new_vote = false;

        let signing_committee = record.signing_committee().clone();
        let votes: Vec<Vote> = record.votes(VotePhase::Vote).values().cloned().collect();
        let aggregated = match aggregate_votes(
            &signing_committee,
            self.chain_id,
            &record.block_hash(),
            VotePhase::Vote,
            &votes,
        ) {
            Ok(aggregated) => aggregated,
            Err(err) => {
                let offenders = err.offenders();
                log::warn!("cannot aggregate votes for {}: {}", propose_hash, err);
                record.evict_votes(VotePhase::Vote, &offenders);
                Event::publish(
                    &self.event_publisher,
                    Event::CombineSignatureFailed(CombineSignatureFailedEvent {
                        timestamp: SystemTime::now(),
                        propose_hash: *propose_hash,
                        offenders,
                    }),
                );
                return;
            }
        };
        Event::publish(
            &self.event_publisher,
            Event::CollectVotes(CollectVotesEvent {
                timestamp: SystemTime::now(),
                propose_hash: *propose_hash,
                phase: VotePhase::Vote,
                count: aggregated.validator_indices.len(),
            }),
        );

        let mut bridge_signatures: Vec<(ValidatorIndex, SignatureBytes)> = votes
            .iter()
            .filter_map(|vote| {
                let signature = vote.bridge_signature?;
                Some((signing_committee.index_of(&vote.validator)?, signature))
            })
            .collect();
        bridge_signatures.sort_by_key(|(index, _)| *index);

        let mut block = record.block().clone();
        let signatures = aggregated.validator_indices.len();
        block.validation_data = ValidationData {
            aggregate_signature: Some(aggregated.signature),
            validator_indices: aggregated.validator_indices,
            bridge_signatures,
        };
        let block_hash = record.block_hash();
        let height = block.height();
        match self.rules.insert_rule().insert(self.chain.as_ref(), block) {
            Ok(()) => {
                record.mark_committed();
                log::debug!("committed block {} at height {}", block_hash, height);
                Event::publish(
                    &self.event_publisher,
                    Event::CommitBlock(CommitBlockEvent {
                        timestamp: SystemTime::now(),
                        block: block_hash,
                        height,
                        signatures,
                    }),
                );
            }
            Err(err) => {
                log::warn!("chain refused committed block {}: {}", block_hash, err);
                record.has_new_vote = true;
            }
        }
    }

    fn prune(&mut self) {
        let final_view = self.chain.final_view();
        let ttl = self.configuration.record_ttl();
        let now = self.now;

        let mut pruned = Vec::new();
        self.records.retain(|propose_hash, record| {
            let keep = record.block().height() > final_view.height
                && (record.is_committed() || now.saturating_sub(record.receive_time()) <= ttl);
            if !keep {
                pruned.push(*propose_hash);
            }
            keep
        });
        self.tracker.prune(final_view.height);
        self.detector.prune(final_view.height);
        self.parked_votes.expire(now, ttl);

        let propose_history_len = self.propose_history.len();
        self.propose_history
            .retain(|timeslot, _| *timeslot > final_view.propose_timeslot);
        if self.propose_history.len() != propose_history_len {
            if let Err(err) = self.store.save_propose_history(&self.propose_history) {
                log::warn!("cannot persist propose history: {}", err);
            }
        }
        let vote_history_len = self.vote_history.len();
        self.vote_history
            .retain(|height, _| *height > final_view.height);
        if self.vote_history.len() != vote_history_len {
            if let Err(err) = self.store.save_vote_history(&self.vote_history) {
                log::warn!("cannot persist vote history: {}", err);
            }
        }

        if !pruned.is_empty() {
            Event::publish(
                &self.event_publisher,
                Event::PruneRecords(PruneRecordsEvent {
                    timestamp: SystemTime::now(),
                    finalized_height: final_view.height,
                    pruned: pruned.len(),
                }),
            );
            self.pending_deletions.extend(pruned);
        }
    }

    fn flush(&mut self) {
        let upserts: Vec<_> = self
            .records
            .iter_mut()
            .filter_map(|(propose_hash, record)| {
                record
                    .take_dirty()
                    .then(|| (*propose_hash, record.snapshot()))
            })
            .collect();
        let deletions = std::mem::take(&mut self.pending_deletions);
        if let Err(err) = self.store.save_records(&upserts, &deletions) {
            log::warn!("cannot persist proposal records: {}", err);
            for (propose_hash, _) in &upserts {
                if let Some(record) = self.records.get_mut(propose_hash) {
                    record.mark_dirty();
                }
            }
            self.pending_deletions.extend(deletions);
        }
    }
}

/// Caller misuse of a running actor, or a failure to construct one.
#[derive(Debug)]
pub enum ConsensusError {
    Configuration(ConfigurationError),
    Persistence(PersistenceError),
    AlreadyStarted,
    AlreadyStopped,
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::Configuration(err) => write!(f, "invalid configuration: {}", err),
            ConsensusError::Persistence(err) => write!(f, "cannot recover consensus state: {}", err),
            ConsensusError::AlreadyStarted => write!(f, "consensus already started"),
            ConsensusError::AlreadyStopped => write!(f, "consensus already stopped"),
        }
    }
}

impl From<ConfigurationError> for ConsensusError {
    fn from(value: ConfigurationError) -> Self {
        ConsensusError::Configuration(value)
    }
}

impl From<PersistenceError> for ConsensusError {
    fn from(value: PersistenceError) -> Self {
        ConsensusError::Persistence(value)
    }
}
