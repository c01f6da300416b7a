/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the actor's
//! [configuration](crate::config::Configuration::log_events).
//!
//! The actor logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveProposal](crate::events::ReceiveProposalEvent) is printed:
//!
//! ```text
//! ReceiveProposal, 1701329264, peer-2, fNGCJyk, 12, 56710
//! ```
//!
//! In the snippet:
//! - The third value is the peer the proposal was received from.
//! - The fourth value is the first seven characters of the Base64 encoding of the propose hash.
//! - The fifth value is the height of the proposed block.
//! - The sixth value is the timeslot it was proposed in.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const START_TIME_SLOT: &str = "StartTimeSlot";
pub const SWITCH_RULE: &str = "SwitchRule";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VOTE: &str = "ReceiveVote";

pub const VALIDATE_BLOCK: &str = "ValidateBlock";
pub const COLLECT_VOTES: &str = "CollectVotes";
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const COMBINE_SIGNATURE_FAILED: &str = "CombineSignatureFailed";

pub const BLACKLIST_VALIDATOR: &str = "BlacklistValidator";
pub const PRUNE_RECORDS: &str = "PruneRecords";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartTimeSlotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_time_slot_event: &StartTimeSlotEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_TIME_SLOT,
                secs_since_unix_epoch(start_time_slot_event.timestamp),
                start_time_slot_event.timeslot,
                start_time_slot_event
                    .leader
                    .map(|leader| first_seven_base64_chars(&leader.bytes()))
                    .unwrap_or_else(|| String::from("none")),
            )
        };
        Box::new(logger)
    }
}

impl Logger for SwitchRuleEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |switch_rule_event: &SwitchRuleEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SWITCH_RULE,
                secs_since_unix_epoch(switch_rule_event.timestamp),
                switch_rule_event.height,
                switch_rule_event.from,
                switch_rule_event.to,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars(&propose_event.propose_hash.bytes()),
                propose_event.height,
                propose_event.timeslot,
                propose_event.re_proposal,
                propose_event.finality_proof_len,
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                first_seven_base64_chars(&vote_event.vote.validator.bytes()),
                vote_event.vote.phase,
                first_seven_base64_chars(&vote_event.vote.block_hash.bytes()),
                vote_event.vote.propose_timeslot,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                receive_proposal_event.origin.as_str(),
                first_seven_base64_chars(&receive_proposal_event.propose_hash.bytes()),
                receive_proposal_event.height,
                receive_proposal_event.timeslot,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}, {}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                receive_vote_event.origin.as_str(),
                first_seven_base64_chars(&receive_vote_event.vote.validator.bytes()),
                receive_vote_event.vote.phase,
                first_seven_base64_chars(&receive_vote_event.vote.block_hash.bytes()),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ValidateBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |validate_block_event: &ValidateBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                VALIDATE_BLOCK,
                secs_since_unix_epoch(validate_block_event.timestamp),
                first_seven_base64_chars(&validate_block_event.propose_hash.bytes()),
                validate_block_event.valid,
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollectVotesEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |collect_votes_event: &CollectVotesEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}",
                COLLECT_VOTES,
                secs_since_unix_epoch(collect_votes_event.timestamp),
                first_seven_base64_chars(&collect_votes_event.propose_hash.bytes()),
                collect_votes_event.phase,
                collect_votes_event.count,
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.height,
                commit_block_event.signatures,
            )
        };
        Box::new(logger)
    }
}

impl Logger for CombineSignatureFailedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |combine_signature_failed_event: &CombineSignatureFailedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMBINE_SIGNATURE_FAILED,
                secs_since_unix_epoch(combine_signature_failed_event.timestamp),
                first_seven_base64_chars(&combine_signature_failed_event.propose_hash.bytes()),
                combine_signature_failed_event
                    .offenders
                    .iter()
                    .map(|offender| first_seven_base64_chars(&offender.bytes()))
                    .collect::<Vec<String>>()
                    .join(" "),
            )
        };
        Box::new(logger)
    }
}

impl Logger for BlacklistValidatorEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |blacklist_validator_event: &BlacklistValidatorEvent| {
            log::info!(
                "{}, {}, {}, {}",
                BLACKLIST_VALIDATOR,
                secs_since_unix_epoch(blacklist_validator_event.timestamp),
                first_seven_base64_chars(&blacklist_validator_event.validator.bytes()),
                blacklist_validator_event.reason,
            )
        };
        Box::new(logger)
    }
}

impl Logger for PruneRecordsEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prune_records_event: &PruneRecordsEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PRUNE_RECORDS,
                secs_since_unix_epoch(prune_records_event.timestamp),
                prune_records_event.finalized_height,
                prune_records_event.pruned,
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

// Events are timestamped by the local clock; a clock set before 1970 logs as 0.
fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
