/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which fires the handlers registered for each [`Event`] the actor publishes.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// The handlers registered for one event type: the default logger (if logging is enabled) followed by
/// the user's handler (if any).
pub(crate) struct Handlers<T>(Vec<HandlerPtr<T>>);

impl<T: Logger> Handlers<T> {
    fn new(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Self {
        let mut handlers = Vec::new();
        if log_events {
            handlers.push(T::get_logger());
        }
        handlers.extend(user_handler);
        Handlers(handlers)
    }

    fn fire(&self, event: &T) {
        self.0.iter().for_each(|handler| handler(event))
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// User-registered handlers, one optional closure per event type.
#[derive(Default)]
pub(crate) struct UserHandlers {
    pub(crate) on_start_time_slot: Option<HandlerPtr<StartTimeSlotEvent>>,
    pub(crate) on_switch_rule: Option<HandlerPtr<SwitchRuleEvent>>,
    pub(crate) on_propose: Option<HandlerPtr<ProposeEvent>>,
    pub(crate) on_vote: Option<HandlerPtr<VoteEvent>>,
    pub(crate) on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) on_validate_block: Option<HandlerPtr<ValidateBlockEvent>>,
    pub(crate) on_collect_votes: Option<HandlerPtr<CollectVotesEvent>>,
    pub(crate) on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    pub(crate) on_combine_signature_failed: Option<HandlerPtr<CombineSignatureFailedEvent>>,
    pub(crate) on_blacklist_validator: Option<HandlerPtr<BlacklistValidatorEvent>>,
    pub(crate) on_prune_records: Option<HandlerPtr<PruneRecordsEvent>>,
}

pub(crate) struct EventHandlers {
    start_time_slot_handlers: Handlers<StartTimeSlotEvent>,
    switch_rule_handlers: Handlers<SwitchRuleEvent>,
    propose_handlers: Handlers<ProposeEvent>,
    vote_handlers: Handlers<VoteEvent>,
    receive_proposal_handlers: Handlers<ReceiveProposalEvent>,
    receive_vote_handlers: Handlers<ReceiveVoteEvent>,
    validate_block_handlers: Handlers<ValidateBlockEvent>,
    collect_votes_handlers: Handlers<CollectVotesEvent>,
    commit_block_handlers: Handlers<CommitBlockEvent>,
    combine_signature_failed_handlers: Handlers<CombineSignatureFailedEvent>,
    blacklist_validator_handlers: Handlers<BlacklistValidatorEvent>,
    prune_records_handlers: Handlers<PruneRecordsEvent>,
}

impl EventHandlers {
    pub(crate) fn new(log_events: bool, user_handlers: UserHandlers) -> Self {
        EventHandlers {
            start_time_slot_handlers: Handlers::new(log_events, user_handlers.on_start_time_slot),
            switch_rule_handlers: Handlers::new(log_events, user_handlers.on_switch_rule),
            propose_handlers: Handlers::new(log_events, user_handlers.on_propose),
            vote_handlers: Handlers::new(log_events, user_handlers.on_vote),
            receive_proposal_handlers: Handlers::new(log_events, user_handlers.on_receive_proposal),
            receive_vote_handlers: Handlers::new(log_events, user_handlers.on_receive_vote),
            validate_block_handlers: Handlers::new(log_events, user_handlers.on_validate_block),
            collect_votes_handlers: Handlers::new(log_events, user_handlers.on_collect_votes),
            commit_block_handlers: Handlers::new(log_events, user_handlers.on_commit_block),
            combine_signature_failed_handlers: Handlers::new(
                log_events,
                user_handlers.on_combine_signature_failed,
            ),
            blacklist_validator_handlers: Handlers::new(
                log_events,
                user_handlers.on_blacklist_validator,
            ),
            prune_records_handlers: Handlers::new(log_events, user_handlers.on_prune_records),
        }
    }

    /// Whether no handler at all is registered, in which case the event bus thread is not started.
    pub(crate) fn is_empty(&self) -> bool {
        self.start_time_slot_handlers.is_empty()
            && self.switch_rule_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.validate_block_handlers.is_empty()
            && self.collect_votes_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.combine_signature_failed_handlers.is_empty()
            && self.blacklist_validator_handlers.is_empty()
            && self.prune_records_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartTimeSlot(start_time_slot_event) => {
                self.start_time_slot_handlers.fire(&start_time_slot_event)
            }

            Event::SwitchRule(switch_rule_event) => {
                self.switch_rule_handlers.fire(&switch_rule_event)
            }

            Event::Propose(propose_event) => self.propose_handlers.fire(&propose_event),

            Event::Vote(vote_event) => self.vote_handlers.fire(&vote_event),

            Event::ReceiveProposal(receive_proposal_event) => {
                self.receive_proposal_handlers.fire(&receive_proposal_event)
            }

            Event::ReceiveVote(receive_vote_event) => {
                self.receive_vote_handlers.fire(&receive_vote_event)
            }

            Event::ValidateBlock(validate_block_event) => {
                self.validate_block_handlers.fire(&validate_block_event)
            }

            Event::CollectVotes(collect_votes_event) => {
                self.collect_votes_handlers.fire(&collect_votes_event)
            }

            Event::CommitBlock(commit_block_event) => {
                self.commit_block_handlers.fire(&commit_block_event)
            }

            Event::CombineSignatureFailed(combine_signature_failed_event) => self
                .combine_signature_failed_handlers
                .fire(&combine_signature_failed_event),

            Event::BlacklistValidator(blacklist_validator_event) => {
                self.blacklist_validator_handlers.fire(&blacklist_validator_event)
            }

            Event::PruneRecords(prune_records_event) => {
                self.prune_records_handlers.fire(&prune_records_event)
            }
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // The actor thread (event publisher) has exited.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
