/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A bounded pool of threads that verify vote signatures off the actor thread.
//!
//! Jobs are queued on a bounded channel. Workers push their results into the actor's inbox as
//! [`ActorInput::VerifiedVote`], so the actor thread remains the only writer of proposal records. If the
//! queue is full, the caller verifies the vote inline instead of dropping it.

use std::{
    sync::{
        mpsc::{self, Receiver, Sender, SyncSender, TrySendError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use super::ActorInput;
use crate::{
    aggregation::{verify_vote, SignatureError},
    types::{
        committee::Committee,
        data_types::CryptoHash,
        vote::{Vote, VoteValidity},
    },
};

/// A vote, and everything needed to verify it.
pub(crate) struct VerificationJob {
    pub(crate) signing_committee: Committee,
    /// Content hash of the block the vote is for.
    pub(crate) content_hash: CryptoHash,
    pub(crate) vote: Vote,
}

impl VerificationJob {
    pub(crate) fn run(self) -> VerifiedVote {
        let VerificationJob {
            signing_committee,
            content_hash,
            mut vote,
        } = self;
        let result = verify_vote(&signing_committee, &content_hash, &vote);
        vote.validity = if result.is_ok() {
            VoteValidity::Valid
        } else {
            VoteValidity::Invalid
        };
        VerifiedVote { vote, result }
    }
}

/// The outcome of verifying a vote. `vote.validity` agrees with `result`.
#[derive(Debug)]
pub struct VerifiedVote {
    pub vote: Vote,
    pub result: Result<(), SignatureError>,
}

pub(crate) struct VerifierPool {
    jobs: Option<SyncSender<VerificationJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl VerifierPool {
    pub(crate) fn start(threads: usize, capacity: usize, results: Sender<ActorInput>) -> Self {
        let (jobs, job_receiver) = mpsc::sync_channel(capacity);
        let job_receiver = Arc::new(Mutex::new(job_receiver));
        let workers = (0..threads.max(1))
            .map(|_| start_worker(job_receiver.clone(), results.clone()))
            .collect();
        Self {
            jobs: Some(jobs),
            workers,
        }
    }

    /// Queue `job`. If the queue is full, `job` is run on the calling thread and its outcome is returned.
    pub(crate) fn submit(&self, job: VerificationJob) -> Option<VerifiedVote> {
        let Some(jobs) = &self.jobs else {
            return Some(job.run());
        };
        match jobs.try_send(job) {
            Ok(()) => None,
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => Some(job.run()),
        }
    }
}

impl Drop for VerifierPool {
    fn drop(&mut self) {
        // Closing the queue makes every worker's `recv` fail once the queue is drained.
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn start_worker(
    jobs: Arc<Mutex<Receiver<VerificationJob>>>,
    results: Sender<ActorInput>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let job = match jobs.lock() {
            Ok(jobs) => jobs.recv(),
            Err(_) => return,
        };
        let Ok(job) = job else {
            return;
        };
        // The actor may already have stopped; its results are no longer needed.
        let _ = results.send(ActorInput::VerifiedVote(job.run()));
    })
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use super::*;
    use crate::types::{
        block::{Block, BlockHeader},
        crypto_primitives::ConsensusKeypair,
        data_types::{BlockHeight, ChainID, TimeSlot},
        vote::VotePhase,
    };

    #[test]
    fn workers_feed_results_back_to_the_inbox() {
        let keypair = ConsensusKeypair::generate(&mut OsRng).unwrap();
        let stranger = ConsensusKeypair::generate(&mut OsRng).unwrap();
        let committee = Committee::new(vec![keypair.validator_key()]);
        let block = Block::new(
            BlockHeader {
                height: BlockHeight::new(1),
                previous_block_hash: CryptoHash::zero(),
                producer: keypair.id(),
                produce_timeslot: TimeSlot::new(1),
                proposer: keypair.id(),
                propose_timeslot: TimeSlot::new(1),
                aggregate_root_hash: CryptoHash::zero(),
            },
            vec![],
        );
        let job = |signer: &ConsensusKeypair| VerificationJob {
            signing_committee: committee.clone(),
            content_hash: block.hash(),
            vote: Vote::new(signer, VotePhase::Vote, ChainID::new(0), &block, false),
        };

        let (inbox, inbox_receiver) = mpsc::channel();
        let pool = VerifierPool::start(2, 8, inbox);
        assert!(pool.submit(job(&keypair)).is_none());
        assert!(pool.submit(job(&stranger)).is_none());

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            match inbox_receiver.recv().unwrap() {
                ActorInput::VerifiedVote(verified) => outcomes.push(verified),
                ActorInput::Message(..) => panic!("unexpected message"),
            }
        }
        drop(pool);

        let valid = outcomes.iter().find(|v| v.vote.validator == keypair.id()).unwrap();
        assert_eq!(valid.vote.validity, VoteValidity::Valid);
        assert!(valid.result.is_ok());
        let invalid = outcomes.iter().find(|v| v.vote.validator == stranger.id()).unwrap();
        assert_eq!(invalid.vote.validity, VoteValidity::Invalid);
        assert!(invalid.result.is_err());
    }
}
