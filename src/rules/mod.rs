/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The rule strategy: the policies an actor applies, selected by the height it is deciding.
//!
//! Two consensus rules exist:
//! - **Lemma1**: single-phase. A node votes for a valid proposal that respects its lock, and a block is
//!   committed once its votes form a supermajority of its signing committee. Finality proofs are not
//!   attached or checked.
//! - **Lemma2**: two-phase. A node pre-votes a valid proposal that either carries a valid finality proof
//!   or is the canonical first block of its height. Once the proposal's pre-votes form a supermajority,
//!   it votes, and a block is committed on a vote supermajority. Locks may change on a newer finality
//!   proof.
//!
//! The rule is chosen per tick by comparing the next height to decide (`best_view.height + 1`) with
//! the configured Lemma2 activation height, so a running actor switches rules as its chain grows
//! without restarting. The vote, handle-vote-message and insert rules come from the
//! [`Configuration`].

pub mod policies;

pub mod propose;

pub mod validator;

use std::fmt::{self, Display, Formatter};

use self::{
    policies::{HandleVoteRule, InsertRule, VoteRule},
    propose::ProposeRule,
    validator::ValidatorRule,
};
use crate::{config::Configuration, types::data_types::BlockHeight};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusRule {
    Lemma1,
    Lemma2,
}

impl ConsensusRule {
    /// The rule that decides blocks at `height`.
    pub fn at_height(height: BlockHeight, lemma2_activation_height: BlockHeight) -> ConsensusRule {
        if height >= lemma2_activation_height {
            ConsensusRule::Lemma2
        } else {
            ConsensusRule::Lemma1
        }
    }
}

impl Display for ConsensusRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusRule::Lemma1 => write!(f, "Lemma1"),
            ConsensusRule::Lemma2 => write!(f, "Lemma2"),
        }
    }
}

/// The set of policies currently in force.
#[derive(Clone, Debug)]
pub struct RuleStrategy {
    lemma2_activation_height: BlockHeight,
    consensus_rule: ConsensusRule,
    propose_rule: ProposeRule,
    validator_rule: ValidatorRule,
    vote_rule: VoteRule,
    handle_vote_rule: HandleVoteRule,
    insert_rule: InsertRule,
}

impl RuleStrategy {
    /// Select the policies for a chain whose best view is at `best_height`.
    pub fn new(configuration: &Configuration, best_height: BlockHeight) -> RuleStrategy {
        let consensus_rule =
            ConsensusRule::at_height(best_height + 1, configuration.lemma2_activation_height);
        let (propose_rule, validator_rule) = Self::lemma_policies(consensus_rule);
        RuleStrategy {
            lemma2_activation_height: configuration.lemma2_activation_height,
            consensus_rule,
            propose_rule,
            validator_rule,
            vote_rule: if configuration.vote_enabled {
                VoteRule::Vote
            } else {
                VoteRule::NoVote
            },
            handle_vote_rule: if configuration.handle_vote_messages {
                HandleVoteRule::Collect
            } else {
                HandleVoteRule::Ignore
            },
            insert_rule: if configuration.broadcast_on_insert {
                InsertRule::InsertAndBroadcast
            } else {
                InsertRule::InsertOnly
            },
        }
    }

    /// Re-select the consensus rule for a best view at `best_height`. Returns the previous and the new
    /// rule if they differ.
    pub fn update(&mut self, best_height: BlockHeight) -> Option<(ConsensusRule, ConsensusRule)> {
        let rule = ConsensusRule::at_height(best_height + 1, self.lemma2_activation_height);
        if rule == self.consensus_rule {
            return None;
        }
        let previous = self.consensus_rule;
        self.consensus_rule = rule;
        (self.propose_rule, self.validator_rule) = Self::lemma_policies(rule);
        Some((previous, rule))
    }

    fn lemma_policies(rule: ConsensusRule) -> (ProposeRule, ValidatorRule) {
        match rule {
            ConsensusRule::Lemma1 => (ProposeRule::Plain, ValidatorRule::Lemma1),
            ConsensusRule::Lemma2 => (ProposeRule::WithFinalityProof, ValidatorRule::Lemma2),
        }
    }

    pub fn consensus_rule(&self) -> ConsensusRule {
        self.consensus_rule
    }

    /// Whether a proposal must collect a pre-vote supermajority before this node votes for it.
    pub fn uses_pre_votes(&self) -> bool {
        self.consensus_rule == ConsensusRule::Lemma2
    }

    pub fn propose_rule(&self) -> ProposeRule {
        self.propose_rule
    }

    pub fn validator_rule(&self) -> ValidatorRule {
        self.validator_rule
    }

    pub fn vote_rule(&self) -> VoteRule {
        self.vote_rule
    }

    pub fn handle_vote_rule(&self) -> HandleVoteRule {
        self.handle_vote_rule
    }

    pub fn insert_rule(&self) -> InsertRule {
        self.insert_rule
    }

    pub fn set_vote_rule(&mut self, vote_rule: VoteRule) {
        self.vote_rule = vote_rule;
    }

    pub fn set_handle_vote_rule(&mut self, handle_vote_rule: HandleVoteRule) {
        self.handle_vote_rule = handle_vote_rule;
    }

    pub fn set_insert_rule(&mut self, insert_rule: InsertRule) {
        self.insert_rule = insert_rule;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::data_types::ChainID;

    #[test]
    fn switches_to_lemma2_at_the_activation_height() {
        let configuration = Configuration::builder()
            .chain_id(ChainID::new(1))
            .keys(vec![])
            .timeslot_duration(Duration::from_secs(1))
            .lemma2_activation_height(BlockHeight::new(10))
            .vote_enabled(false)
            .build();

        let mut rules = RuleStrategy::new(&configuration, BlockHeight::new(8));
        assert_eq!(rules.consensus_rule(), ConsensusRule::Lemma1);
        assert_eq!(rules.propose_rule(), ProposeRule::Plain);
        assert!(!rules.uses_pre_votes());
        assert_eq!(rules.vote_rule(), VoteRule::NoVote);
        assert_eq!(rules.insert_rule(), InsertRule::InsertAndBroadcast);

        assert_eq!(rules.update(BlockHeight::new(8)), None);
        assert_eq!(
            rules.update(BlockHeight::new(9)),
            Some((ConsensusRule::Lemma1, ConsensusRule::Lemma2))
        );
        assert_eq!(rules.validator_rule(), ValidatorRule::Lemma2);
        assert_eq!(rules.propose_rule(), ProposeRule::WithFinalityProof);
        assert!(rules.uses_pre_votes());
        assert_eq!(rules.update(BlockHeight::new(12)), None);

        rules.set_vote_rule(VoteRule::Vote);
        assert_eq!(rules.vote_rule(), VoteRule::Vote);
    }
}
