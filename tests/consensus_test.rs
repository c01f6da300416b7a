//! Committees of actors driven tick by tick, checking what ends up committed under each rule.

mod common;

use std::cell::RefCell;

use log::LevelFilter;
use timeslot_bft::{
    aggregation::{verify_aggregated, AggregatedSignature},
    chain::Chain,
    events::Event,
    finality::proof::{sign_re_propose, FinalityProof},
    messages::{BftMessage, ProposeMessage},
    networking::Network,
    rules::ConsensusRule,
    types::{
        block::Block,
        data_types::{BlockHeight, TimeSlot, ValidatorIndex},
        vote::VotePhase,
    },
};

use common::{
    cluster::{everything, Cluster, CHAIN_ID},
    logging::setup_logger,
    mock_chain::{genesis, new_block},
};

fn assert_committed_with_valid_aggregate(cluster: &Cluster, height: u64) -> Vec<Block> {
    cluster
        .nodes
        .iter()
        .map(|node| {
            let block = node.chain.best_block().unwrap();
            assert_eq!(block.height(), BlockHeight::new(height));
            let aggregated = AggregatedSignature {
                signature: block.validation_data.aggregate_signature.unwrap(),
                validator_indices: block.validation_data.validator_indices.clone(),
            };
            assert!(cluster.committee.is_supermajority(aggregated.validator_indices.len()));
            assert!(verify_aggregated(
                &cluster.committee,
                CHAIN_ID,
                &block.hash(),
                VotePhase::Vote,
                &aggregated
            ));
            block
        })
        .collect()
}

#[test]
fn lemma1_commits_one_block_per_timeslot() {
    setup_logger(LevelFilter::Warn);
    let mut cluster = Cluster::new(4, BlockHeight::new(100));

    cluster.run(1, everything);
    let first = assert_committed_with_valid_aggregate(&cluster, 1);
    assert!(first.iter().all(|block| block.hash() == first[0].hash()));

    cluster.run(2, everything);
    let second = assert_committed_with_valid_aggregate(&cluster, 2);
    assert_eq!(second[0].header.previous_block_hash, first[0].hash());
    assert!(cluster
        .nodes
        .iter()
        .all(|node| node.actor.rules().consensus_rule() == ConsensusRule::Lemma1));
}

#[test]
fn lemma2_commits_after_pre_votes_and_rule_switches_at_activation_height() {
    setup_logger(LevelFilter::Warn);
    let mut cluster = Cluster::new(4, BlockHeight::new(2));
    assert_eq!(cluster.nodes[0].actor.rules().consensus_rule(), ConsensusRule::Lemma1);

    cluster.run(1, everything);
    assert_committed_with_valid_aggregate(&cluster, 1);
    // The switch is taken on the first tick after the activation height becomes the next height.
    cluster.tick(1);
    assert!(cluster
        .nodes
        .iter()
        .all(|node| node.actor.rules().consensus_rule() == ConsensusRule::Lemma2));

    let pre_votes = RefCell::new(0);
    cluster.run(2, |_, message| {
        if matches!(message, BftMessage::Vote(vote) if vote.phase == VotePhase::PreVote) {
            *pre_votes.borrow_mut() += 1;
        }
        true
    });
    assert_committed_with_valid_aggregate(&cluster, 2);
    // Every validator broadcast one pre-vote, to every node.
    assert_eq!(*pre_votes.borrow(), 16);
}

#[test]
fn locked_block_is_re_proposed_with_finality_proof_and_other_locks_hold() {
    setup_logger(LevelFilter::Warn);
    let mut cluster = Cluster::new(4, BlockHeight::new(0));
    let first_leader = cluster.leader_of(1);
    let second_leader = cluster.leader_of(2);
    let equivocation_target = (0..4)
        .find(|index| *index != first_leader && *index != second_leader)
        .unwrap();

    // Timeslot 1: the leader equivocates. The target only sees C, everyone else only sees B, and every
    // vote is lost.
    let first_leader_id = cluster.nodes[first_leader].keypair.id();
    let block_c = new_block(&genesis(), first_leader_id, TimeSlot::new(1), vec![0xC]);
    let propose_c = ProposeMessage::new(
        cluster.nodes[first_leader].network.peer_id().clone(),
        &block_c,
        FinalityProof::empty(),
        sign_re_propose(&cluster.nodes[first_leader].keypair, &block_c.header, TimeSlot::new(1)),
    )
    .unwrap();
    let lossy = move |recipient: usize, message: &BftMessage| match message {
        BftMessage::Vote(_) => false,
        BftMessage::Propose(_) => recipient != equivocation_target,
        BftMessage::RequestBlock(_) => true,
    };

    cluster.tick(1);
    cluster.deliver(&lossy);
    let origin = cluster.nodes[first_leader].network.peer_id().clone();
    cluster.nodes[equivocation_target]
        .actor
        .on_message(origin, BftMessage::Propose(propose_c));
    cluster.run(1, lossy);

    let block_b_hash = cluster.nodes[first_leader]
        .actor
        .vote_lock(BlockHeight::new(1))
        .unwrap()
        .block_hash;
    assert_ne!(block_b_hash, block_c.hash());
    for (index, node) in cluster.nodes.iter().enumerate() {
        let lock = node.actor.vote_lock(BlockHeight::new(1)).unwrap();
        let expected = if index == equivocation_target {
            block_c.hash()
        } else {
            block_b_hash
        };
        assert_eq!(lock.block_hash, expected);
        assert_eq!(node.chain.best_view().height, BlockHeight::new(0));
    }

    // Timeslot 2: the next leader re-proposes B with the first leader's re-propose signature as proof.
    let proof_lens = RefCell::new(Vec::new());
    cluster.run(2, |_, message| {
        if let BftMessage::Propose(propose) = message {
            let block = propose.block().unwrap();
            assert_eq!(block.hash(), block_b_hash);
            assert_eq!(block.header.propose_timeslot, TimeSlot::new(2));
            proof_lens.borrow_mut().push(propose.finality_proof.len());
        }
        true
    });
    assert!(!proof_lens.borrow().is_empty());
    assert!(proof_lens.borrow().iter().all(|len| *len == 1));

    let target_index = cluster
        .committee
        .index_of(&cluster.nodes[equivocation_target].keypair.id())
        .unwrap();
    for block in assert_committed_with_valid_aggregate(&cluster, 1) {
        assert_eq!(block.hash(), block_b_hash);
        assert!(!block.validation_data.validator_indices.contains(&target_index));
    }
}

#[test]
fn node_that_fails_validation_does_not_vote() {
    setup_logger(LevelFilter::Warn);
    let mut cluster = Cluster::new(4, BlockHeight::new(100));
    let leader = cluster.leader_of(1);
    let dissenter = (leader + 1) % 4;

    let leader_id = cluster.nodes[leader].keypair.id();
    let mut body = leader_id.bytes().to_vec();
    body.extend_from_slice(&TimeSlot::new(1).to_le_bytes());
    let block = new_block(&genesis(), leader_id, TimeSlot::new(1), body);
    cluster.nodes[dissenter].chain.reject(block.hash());

    cluster.run(1, everything);

    let dissenter_index: ValidatorIndex = cluster
        .committee
        .index_of(&cluster.nodes[dissenter].keypair.id())
        .unwrap();
    for committed in assert_committed_with_valid_aggregate(&cluster, 1) {
        assert_eq!(committed.hash(), block.hash());
        assert_eq!(committed.validation_data.validator_indices.len(), 3);
        assert!(!committed.validation_data.validator_indices.contains(&dissenter_index));
    }
}

#[test]
fn replayed_messages_are_idempotent() {
    setup_logger(LevelFilter::Warn);
    let mut cluster = Cluster::new(4, BlockHeight::new(100));
    let observer = (cluster.leader_of(1) + 1) % 4;

    // The leader proposes and votes in the same tick, so its vote is delivered with the proposal.
    cluster.tick(1);
    cluster.deliver(&everything);
    cluster.tick(1);

    // The observer's own vote, looped back by the broadcast, and the two other followers' votes.
    let mut messages = Vec::new();
    while let Some(message) = cluster.nodes[observer].network.recv() {
        messages.push(message);
    }
    assert_eq!(messages.len(), 3);
    assert!(messages
        .iter()
        .all(|(_, message)| matches!(message, BftMessage::Vote(_))));

    let deliver_all = |cluster: &mut Cluster| {
        for (origin, message) in &messages {
            cluster.nodes[observer]
                .actor
                .on_message(origin.clone(), message.clone());
        }
    };
    deliver_all(&mut cluster);
    let votes_once: Vec<_> = {
        let record = cluster.nodes[observer].actor.records().next().unwrap();
        let mut votes: Vec<_> = record.votes(VotePhase::Vote).keys().copied().collect();
        votes.sort();
        votes
    };
    assert_eq!(votes_once.len(), 4);

    deliver_all(&mut cluster);
    deliver_all(&mut cluster);

    let actor = &cluster.nodes[observer].actor;
    assert_eq!(actor.records().count(), 1);
    let record = actor.records().next().unwrap();
    let mut votes: Vec<_> = record.votes(VotePhase::Vote).keys().copied().collect();
    votes.sort();
    assert_eq!(votes, votes_once);
    assert_eq!(record.error_vote_count, 0);
    assert!(actor.detector().blacklist().is_empty());
}

#[test]
fn lock_moves_to_a_later_block_with_a_finality_proof() {
    setup_logger(LevelFilter::Warn);
    let mut cluster = Cluster::new(4, BlockHeight::new(0));
    let first_leader = cluster.leader_of(1);
    let second_leader = cluster.leader_of(2);
    let third_leader = cluster.leader_of(3);
    let switcher = cluster.leader_of(4);
    let height = BlockHeight::new(1);

    // Timeslot 1: only the switcher sees the first leader's block C, and every vote is lost.
    cluster.run(1, move |recipient, message| match message {
        BftMessage::Vote(_) => false,
        BftMessage::Propose(_) => recipient == switcher,
        BftMessage::RequestBlock(_) => true,
    });
    let lock_c = *cluster.nodes[switcher].actor.vote_lock(height).unwrap();
    assert_eq!(lock_c.propose_timeslot, TimeSlot::new(1));
    assert_eq!(cluster.nodes[first_leader].actor.vote_lock(height), Some(&lock_c));

    // Timeslot 2: everyone sees the second leader's block B. Nodes locked on C do not take a first
    // proposal as a reason to move, and every vote is lost again.
    let no_votes = |_: usize, message: &BftMessage| !matches!(message, BftMessage::Vote(_));
    cluster.run(2, no_votes);
    let lock_b = *cluster.nodes[second_leader].actor.vote_lock(height).unwrap();
    assert_ne!(lock_b.block_hash, lock_c.block_hash);
    assert_eq!(cluster.nodes[third_leader].actor.vote_lock(height), Some(&lock_b));
    assert_eq!(cluster.nodes[switcher].actor.vote_lock(height), Some(&lock_c));
    assert_eq!(cluster.nodes[first_leader].actor.vote_lock(height), Some(&lock_c));

    // Timeslot 3: the third leader re-proposes B with a proof, which was produced after C was proposed.
    let proof_lens = RefCell::new(Vec::new());
    cluster.run(3, |_, message| {
        if let BftMessage::Propose(propose) = message {
            proof_lens.borrow_mut().push(propose.finality_proof.len());
        }
        true
    });
    assert!(!proof_lens.borrow().is_empty());
    assert!(proof_lens.borrow().iter().all(|len| *len == 1));

    // Both nodes locked on C voted for B.
    for index in [switcher, first_leader] {
        let voted_for_b = cluster.events(index).into_iter().any(|event| match event {
            Event::Vote(event) => {
                event.vote.phase == VotePhase::Vote && event.vote.propose_timeslot == TimeSlot::new(3)
            }
            _ => false,
        });
        assert!(voted_for_b);
    }
    for block in assert_committed_with_valid_aggregate(&cluster, 1) {
        assert_eq!(block.hash(), lock_b.block_hash);
        assert_eq!(block.header.propose_timeslot, TimeSlot::new(3));
    }
}
