/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Detection of equivocating validators.
//!
//! The [`ByzantineDetector`] is applied to every inbound vote before it is admitted into a proposal
//! record. It checks, in order:
//! 1. The validator is not already blacklisted.
//! 2. The vote passes the caller-supplied ownership check.
//! 3. The validator has not cast a different vote of the same phase in the same timeslot.
//! 4. The vote's timeslot is not lower than the smallest timeslot previously recorded for the validator
//!    at the vote's height ("equivocation by timeslot regression").
//! 5. The vote's height is not lower than the latest height previously recorded for the validator.
//!
//! Any violation blacklists the validator, with the violation as the reason. Blacklisted validators'
//! votes are rejected outright without further checks. Votes that pass update the bookkeeping.
//!
//! Replaying a vote that already passed (same validator, phase, timeslot and block) is not a
//! violation and changes nothing.
//!
//! When the block a vote names is known, [`ByzantineDetector::validate_for_block`] also requires the
//! vote's timeslots and previous hash to be the block's. Checks 3 to 5 key on the vote's own
//! timeslot, so an owned vote that misstates it is itself a violation.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Display, Formatter},
};

use crate::types::{
    block::BlockHeader,
    data_types::{BlockHeight, CryptoHash, TimeSlot, ValidatorID},
    vote::{Vote, VotePhase},
};

#[derive(Default)]
pub struct ByzantineDetector {
    blacklist: HashMap<ValidatorID, ByzantineError>,
    /// (validator, phase, timeslot) -> (block voted for, height of that block).
    vote_in_timeslot: HashMap<(ValidatorID, VotePhase, TimeSlot), (CryptoHash, BlockHeight)>,
    /// validator -> height -> smallest timeslot voted in at that height.
    smallest_timeslot_at_height: HashMap<ValidatorID, BTreeMap<BlockHeight, TimeSlot>>,
    latest_height: HashMap<ValidatorID, BlockHeight>,
}

impl ByzantineDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `vote`, for a block at `height`, and record it if it passes.
    pub fn validate(
        &mut self,
        height: BlockHeight,
        vote: &Vote,
        ownership_check: impl FnOnce(&Vote) -> bool,
    ) -> Result<(), ByzantineError> {
        let validator = vote.validator;

        // 1. Blacklisted validators are rejected outright.
        if let Some(reason) = self.blacklist.get(&validator) {
            return Err(ByzantineError::Blacklisted(Box::new(reason.clone())));
        }

        if let Err(violation) = self.check(height, vote, ownership_check) {
            self.blacklist.insert(validator, violation.clone());
            return Err(violation);
        }

        self.record(height, vote);
        Ok(())
    }

    /// Validate `vote` for the block with `header`, the block its propose hash names, and record it
    /// if it passes.
    pub fn validate_for_block(
        &mut self,
        header: &BlockHeader,
        vote: &Vote,
        ownership_check: impl FnOnce(&Vote) -> bool,
    ) -> Result<(), ByzantineError> {
        let validator = vote.validator;
        if let Some(reason) = self.blacklist.get(&validator) {
            return Err(ByzantineError::Blacklisted(Box::new(reason.clone())));
        }
        if !ownership_check(vote) {
            let violation = ByzantineError::InvalidOwnership { validator };
            self.blacklist.insert(validator, violation.clone());
            return Err(violation);
        }
        if vote.propose_timeslot != header.propose_timeslot
            || vote.produce_timeslot != header.produce_timeslot
            || vote.previous_block_hash != header.previous_block_hash
        {
            let violation = ByzantineError::MisstatedBlock {
                validator,
                block: vote.block_hash,
                stated: vote.propose_timeslot,
                actual: header.propose_timeslot,
            };
            self.blacklist.insert(validator, violation.clone());
            return Err(violation);
        }
        self.validate(header.height, vote, |_| true)
    }

    fn check(
        &self,
        height: BlockHeight,
        vote: &Vote,
        ownership_check: impl FnOnce(&Vote) -> bool,
    ) -> Result<(), ByzantineError> {
        let validator = vote.validator;

        // 2. Ownership.
        if !ownership_check(vote) {
            return Err(ByzantineError::InvalidOwnership { validator });
        }

        // 3. At most one vote per phase per timeslot.
        if let Some((block_hash, _)) =
            self.vote_in_timeslot
                .get(&(validator, vote.phase, vote.propose_timeslot))
        {
            if *block_hash == vote.block_hash {
                return Ok(());
            }
            return Err(ByzantineError::DoubleVoteInTimeSlot {
                validator,
                timeslot: vote.propose_timeslot,
                first: *block_hash,
                second: vote.block_hash,
            });
        }

        // 4. No timeslot regression at a height.
        if let Some(smallest) = self
            .smallest_timeslot_at_height
            .get(&validator)
            .and_then(|heights| heights.get(&height))
        {
            if vote.propose_timeslot < *smallest {
                return Err(ByzantineError::TimeSlotRegression {
                    validator,
                    height,
                    recorded: *smallest,
                    received: vote.propose_timeslot,
                });
            }
        }

        // 5. No height regression.
        if let Some(latest) = self.latest_height.get(&validator) {
            if height < *latest {
                return Err(ByzantineError::HeightRegression {
                    validator,
                    recorded: *latest,
                    received: height,
                });
            }
        }

        Ok(())
    }

    fn record(&mut self, height: BlockHeight, vote: &Vote) {
        let validator = vote.validator;
        self.vote_in_timeslot.insert(
            (validator, vote.phase, vote.propose_timeslot),
            (vote.block_hash, height),
        );

        let smallest = self
            .smallest_timeslot_at_height
            .entry(validator)
            .or_default()
            .entry(height)
            .or_insert(vote.propose_timeslot);
        if vote.propose_timeslot < *smallest {
            *smallest = vote.propose_timeslot;
        }

        let latest = self.latest_height.entry(validator).or_insert(height);
        if height > *latest {
            *latest = height;
        }
    }

    pub fn is_blacklisted(&self, validator: &ValidatorID) -> bool {
        self.blacklist.contains_key(validator)
    }

    /// Blacklisted validators and the violation that got each of them blacklisted.
    pub fn blacklist(&self) -> &HashMap<ValidatorID, ByzantineError> {
        &self.blacklist
    }

    /// Drop per-height bookkeeping for heights at or below `finalized_height`. Blacklist entries and
    /// latest heights are kept.
    pub fn prune(&mut self, finalized_height: BlockHeight) {
        self.vote_in_timeslot
            .retain(|_, (_, height)| *height > finalized_height);
        for heights in self.smallest_timeslot_at_height.values_mut() {
            *heights = heights.split_off(&(finalized_height + 1));
        }
        self.smallest_timeslot_at_height
            .retain(|_, heights| !heights.is_empty());
    }
}

/// A vote that proves, or is rejected because of, Byzantine behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByzantineError {
    Blacklisted(Box<ByzantineError>),
    InvalidOwnership {
        validator: ValidatorID,
    },
    DoubleVoteInTimeSlot {
        validator: ValidatorID,
        timeslot: TimeSlot,
        first: CryptoHash,
        second: CryptoHash,
    },
    TimeSlotRegression {
        validator: ValidatorID,
        height: BlockHeight,
        recorded: TimeSlot,
        received: TimeSlot,
    },
    HeightRegression {
        validator: ValidatorID,
        recorded: BlockHeight,
        received: BlockHeight,
    },
    /// An owned vote whose timeslots or previous hash are not those of the block it names.
    MisstatedBlock {
        validator: ValidatorID,
        block: CryptoHash,
        stated: TimeSlot,
        actual: TimeSlot,
    },
}

impl Display for ByzantineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ByzantineError::Blacklisted(reason) => write!(f, "blacklisted: {}", reason),
            ByzantineError::InvalidOwnership { validator } => {
                write!(f, "vote is not owned by {}", validator)
            }
            ByzantineError::DoubleVoteInTimeSlot {
                validator,
                timeslot,
                first,
                second,
            } => write!(
                f,
                "{} voted for {} and {} in timeslot {}",
                validator, first, second, timeslot
            ),
            ByzantineError::TimeSlotRegression {
                validator,
                height,
                recorded,
                received,
            } => write!(
                f,
                "{} voted at height {} in timeslot {} after voting in timeslot {}",
                validator, height, received, recorded
            ),
            ByzantineError::HeightRegression {
                validator,
                recorded,
                received,
            } => write!(
                f,
                "{} voted at height {} after voting at height {}",
                validator, received, recorded
            ),
            ByzantineError::MisstatedBlock {
                validator,
                block,
                stated,
                actual,
            } => write!(
                f,
                "{} voted for {} in timeslot {}, but it was proposed in timeslot {}",
                validator, block, stated, actual
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        data_types::{BlsSignatureBytes, ChainID, SignatureBytes},
        vote::VoteValidity,
    };

    fn vote(validator: u8, block: u8, timeslot: u64) -> Vote {
        Vote {
            phase: VotePhase::Vote,
            chain_id: ChainID::new(0),
            validator: ValidatorID::new([validator; 32]),
            block_hash: CryptoHash::new([block; 32]),
            previous_block_hash: CryptoHash::zero(),
            produce_timeslot: TimeSlot::new(timeslot),
            propose_timeslot: TimeSlot::new(timeslot),
            bls_signature: BlsSignatureBytes::new([0; 96]),
            bridge_signature: None,
            confirmation_signature: SignatureBytes::new([0; 64]),
            validity: VoteValidity::Valid,
        }
    }

    fn owned(_: &Vote) -> bool {
        true
    }

    #[test]
    fn second_distinct_vote_in_a_timeslot_blacklists() {
        let mut detector = ByzantineDetector::new();
        let height = BlockHeight::new(3);

        assert_eq!(detector.validate(height, &vote(1, 0xA, 10), owned), Ok(()));
        // Replays are idempotent.
        assert_eq!(detector.validate(height, &vote(1, 0xA, 10), owned), Ok(()));

        let result = detector.validate(height, &vote(1, 0xB, 10), owned);
        assert!(matches!(result, Err(ByzantineError::DoubleVoteInTimeSlot { .. })));
        assert!(detector.is_blacklisted(&ValidatorID::new([1; 32])));

        // Every later vote is rejected without further checks, even a valid-looking one.
        assert!(matches!(
            detector.validate(BlockHeight::new(4), &vote(1, 0xC, 11), owned),
            Err(ByzantineError::Blacklisted(_))
        ));

        // Other validators are unaffected.
        assert_eq!(detector.validate(height, &vote(2, 0xB, 10), owned), Ok(()));
    }

    #[test]
    fn timeslot_regression_at_a_height_blacklists() {
        let mut detector = ByzantineDetector::new();
        let height = BlockHeight::new(3);

        assert_eq!(detector.validate(height, &vote(1, 0xA, 10), owned), Ok(()));
        assert_eq!(detector.validate(height, &vote(1, 0xA, 12), owned), Ok(()));
        assert!(matches!(
            detector.validate(height, &vote(1, 0xB, 9), owned),
            Err(ByzantineError::TimeSlotRegression { .. })
        ));
    }

    #[test]
    fn height_regression_and_ownership_failures_blacklist() {
        let mut detector = ByzantineDetector::new();
        assert_eq!(detector.validate(BlockHeight::new(5), &vote(1, 0xA, 10), owned), Ok(()));
        assert!(matches!(
            detector.validate(BlockHeight::new(4), &vote(1, 0xB, 11), owned),
            Err(ByzantineError::HeightRegression { .. })
        ));

        assert!(matches!(
            detector.validate(BlockHeight::new(5), &vote(2, 0xA, 10), |_| false),
            Err(ByzantineError::InvalidOwnership { .. })
        ));
        assert_eq!(detector.blacklist().len(), 2);
    }

    #[test]
    fn vote_that_misstates_its_block_blacklists() {
        let mut detector = ByzantineDetector::new();
        let block_b = vote(1, 0xB, 10);
        let header = |timeslot: u64| BlockHeader {
            height: BlockHeight::new(3),
            previous_block_hash: CryptoHash::zero(),
            producer: ValidatorID::new([9; 32]),
            produce_timeslot: TimeSlot::new(timeslot),
            proposer: ValidatorID::new([9; 32]),
            propose_timeslot: TimeSlot::new(timeslot),
            aggregate_root_hash: CryptoHash::zero(),
        };
        assert_eq!(detector.validate_for_block(&header(10), &block_b, owned), Ok(()));

        // A vote for C, proposed in the same timeslot, that claims a later one to dodge check 3.
        let mut block_c = vote(1, 0xC, 11);
        block_c.produce_timeslot = TimeSlot::new(10);
        assert!(matches!(
            detector.validate_for_block(&header(10), &block_c, owned),
            Err(ByzantineError::MisstatedBlock { .. })
        ));
        assert!(detector.is_blacklisted(&ValidatorID::new([1; 32])));

        // Stating the true timeslot is caught as a double vote instead.
        let honest_c = vote(2, 0xC, 10);
        assert_eq!(detector.validate_for_block(&header(10), &vote(2, 0xB, 10), owned), Ok(()));
        assert!(matches!(
            detector.validate_for_block(&header(10), &honest_c, owned),
            Err(ByzantineError::DoubleVoteInTimeSlot { .. })
        ));
    }

    #[test]
    fn prune_forgets_finalized_heights_but_keeps_blacklist() {
        let mut detector = ByzantineDetector::new();
        assert_eq!(detector.validate(BlockHeight::new(3), &vote(1, 0xA, 10), owned), Ok(()));
        assert!(detector.validate(BlockHeight::new(3), &vote(2, 0xA, 10), |_| false).is_err());

        detector.prune(BlockHeight::new(3));
        assert!(detector.vote_in_timeslot.is_empty());
        assert!(detector.smallest_timeslot_at_height.is_empty());
        assert!(detector.is_blacklisted(&ValidatorID::new([2; 32])));
    }
}
