/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events an actor emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    byzantine::ByzantineError,
    rules::ConsensusRule,
    types::{
        data_types::{BlockHeight, CryptoHash, PeerID, TimeSlot, ValidatorID},
        vote::{Vote, VotePhase},
    },
};

pub enum Event {
    // Timeslot and rule events.
    StartTimeSlot(StartTimeSlotEvent),
    SwitchRule(SwitchRuleEvent),
    // Events that involve broadcasting a consensus message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    // Events that involve receiving a consensus message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    // Events that change the state of a proposal record.
    ValidateBlock(ValidateBlockEvent),
    CollectVotes(CollectVotesEvent),
    CommitBlock(CommitBlockEvent),
    CombineSignatureFailed(CombineSignatureFailedEvent),
    // Byzantine detection and garbage collection.
    BlacklistValidator(BlacklistValidatorEvent),
    PruneRecords(PruneRecordsEvent),
}

impl Event {
    /// Send `event` to the event bus, if there is one. A closed bus is ignored.
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

/// A new timeslot started. `leader` is the validator expected to propose in it.
pub struct StartTimeSlotEvent {
    pub timestamp: SystemTime,
    pub timeslot: TimeSlot,
    pub leader: Option<ValidatorID>,
}

pub struct SwitchRuleEvent {
    pub timestamp: SystemTime,
    /// Height of the best view when the switch happened.
    pub height: BlockHeight,
    pub from: ConsensusRule,
    pub to: ConsensusRule,
}

/// This node broadcast a proposal.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub propose_hash: CryptoHash,
    pub height: BlockHeight,
    pub timeslot: TimeSlot,
    /// Whether the proposal re-proposes a block produced in an earlier timeslot.
    pub re_proposal: bool,
    pub finality_proof_len: usize,
}

/// This node broadcast a pre-vote or vote.
pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: PeerID,
    pub propose_hash: CryptoHash,
    pub height: BlockHeight,
    pub timeslot: TimeSlot,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: PeerID,
    pub vote: Vote,
}

/// The chain validated the content of a proposed block.
pub struct ValidateBlockEvent {
    pub timestamp: SystemTime,
    pub propose_hash: CryptoHash,
    pub valid: bool,
}

/// A proposal collected a supermajority of valid pre-votes or votes.
pub struct CollectVotesEvent {
    pub timestamp: SystemTime,
    pub propose_hash: CryptoHash,
    pub phase: VotePhase,
    pub count: usize,
}

pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    /// Content hash of the committed block.
    pub block: CryptoHash,
    pub height: BlockHeight,
    pub signatures: usize,
}

pub struct CombineSignatureFailedEvent {
    pub timestamp: SystemTime,
    pub propose_hash: CryptoHash,
    /// Signers whose votes were evicted.
    pub offenders: Vec<ValidatorID>,
}

pub struct BlacklistValidatorEvent {
    pub timestamp: SystemTime,
    pub validator: ValidatorID,
    pub reason: ByzantineError,
}

pub struct PruneRecordsEvent {
    pub timestamp: SystemTime,
    pub finalized_height: BlockHeight,
    pub pruned: usize,
}
