//! Restarting an actor over its store must not make it propose or vote twice.

mod common;

use log::LevelFilter;
use timeslot_bft::{
    chain::Chain,
    events::Event,
    networking::Network,
    types::{data_types::BlockHeight, vote::VotePhase},
};

use common::{
    cluster::{everything, Cluster},
    logging::setup_logger,
    mock_chain::at,
};

#[test]
fn restarted_leader_keeps_its_lock_and_does_not_propose_again() {
    setup_logger(LevelFilter::Warn);
    let mut cluster = Cluster::new(4, BlockHeight::new(0));
    let leader = cluster.leader_of(1);
    let follower = (leader + 1) % 4;

    // The proposal reaches everyone, then every pre-vote is lost.
    cluster.tick(1);
    cluster.deliver(&everything);
    cluster.tick(1);
    cluster.deliver(&|_, _| false);

    let lock = *cluster.nodes[leader]
        .actor
        .vote_lock(BlockHeight::new(1))
        .unwrap();
    assert!(cluster.nodes[leader].kv_store.len() > 0);

    cluster.restart(leader);
    let restarted = &cluster.nodes[leader].actor;
    assert_eq!(restarted.vote_lock(BlockHeight::new(1)), Some(&lock));
    assert_eq!(restarted.records().count(), 1);
    let record = restarted.records().next().unwrap();
    assert_eq!(record.block_hash(), lock.block_hash);
    assert!(record.is_valid && record.is_pre_voted && !record.is_voted);
    assert_eq!(record.valid_vote_count(VotePhase::PreVote), 1);

    // Same timeslot again: neither the proposal nor the pre-vote goes out a second time.
    cluster.nodes[leader].actor.on_tick(at(1));
    assert!(cluster.nodes[follower].network.recv().is_none());

    // The next leader re-proposes the locked block, and the committee commits it.
    cluster.run(2, everything);
    for node in &cluster.nodes {
        let block = node.chain.best_block().unwrap();
        assert_eq!(block.height(), BlockHeight::new(1));
        assert_eq!(block.hash(), lock.block_hash);
    }
}

#[test]
fn committed_records_are_pruned_from_memory_and_store() {
    setup_logger(LevelFilter::Warn);
    let mut cluster = Cluster::new(4, BlockHeight::new(100));

    cluster.run(1, everything);
    // The mock chain finalizes on insert, so the next tick prunes everything at height 1.
    cluster.tick(1);
    for node in &cluster.nodes {
        assert_eq!(node.chain.best_view().height, BlockHeight::new(1));
        assert_eq!(node.actor.records().count(), 0);
        assert!(node.actor.vote_lock(BlockHeight::new(1)).is_none());
    }

    cluster.restart(0);
    assert_eq!(cluster.nodes[0].actor.records().count(), 0);
    assert!(cluster.nodes[0].actor.vote_lock(BlockHeight::new(1)).is_none());
}

#[test]
fn vote_is_withheld_until_its_lock_is_stored() {
    setup_logger(LevelFilter::Warn);
    let mut cluster = Cluster::new(4, BlockHeight::new(100));
    let leader = cluster.leader_of(1);
    let follower = (leader + 1) % 4;

    cluster.tick(1);
    cluster.deliver(&everything);

    // The store refuses the lock, so the vote is not cast.
    cluster.nodes[follower].kv_store.fail_writes(true);
    cluster.nodes[follower].actor.on_tick(at(1));
    assert!(cluster.nodes[follower].actor.vote_lock(BlockHeight::new(1)).is_none());
    assert!(cluster.nodes[leader].network.recv().is_none());
    assert!(!cluster
        .events(follower)
        .iter()
        .any(|event| matches!(event, Event::Vote(_))));
    let record = cluster.nodes[follower].actor.records().next().unwrap();
    assert!(!record.is_voted);

    // Once the store accepts writes again, the lock is taken, stored, and the vote goes out.
    cluster.nodes[follower].kv_store.fail_writes(false);
    cluster.nodes[follower].actor.on_tick(at(1));
    let lock = *cluster.nodes[follower]
        .actor
        .vote_lock(BlockHeight::new(1))
        .unwrap();
    assert!(cluster.nodes[leader].network.recv().is_some());

    cluster.restart(follower);
    assert_eq!(cluster.nodes[follower].actor.vote_lock(BlockHeight::new(1)), Some(&lock));
}
