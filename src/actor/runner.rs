/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run an [`Actor`] on its own threads.
//!
//! ## Starting an actor
//!
//! ```ignore
//! let handle =
//!     ActorSpec::builder()
//!     .chain(chain)
//!     .committee_chain(committee_chain)
//!     .network(network)
//!     .kv_store(kv_store)
//!     .configuration(configuration)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! `start` spawns:
//! 1. The poller, which moves messages from the [`Network`] into the actor's inbox.
//! 2. The verifier pool, which checks vote signatures and sends the results into the same inbox.
//! 3. The actor thread, which drains the inbox and calls [`Actor::on_tick`] every
//!    [tick interval](crate::config::Configuration::tick_interval).
//! 4. The event bus, if any handler is registered or event logging is enabled.
//!
//! The returned [`ActorHandle`] pauses and resumes the actor, and shuts every thread down when dropped.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use typed_builder::TypedBuilder;

use super::{
    timeslot::{Clock, SystemClock},
    verifier::VerifierPool,
    Actor, ActorInput, ConsensusError,
};
use crate::{
    chain::{Chain, CommitteeChain},
    config::Configuration,
    event_bus::*,
    events::*,
    networking::{start_polling, Network},
    persistence::pluggables::KVStore,
};

#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [ActorSpec]. On the builder call the following methods to construct a valid [ActorSpec].

    Required:
    - `.chain(...)`
    - `.committee_chain(...)`
    - `.network(...)`
    - `.kv_store(...)`
    - `.configuration(...)`

    Optional:
    - `.clock(...)`
    - `.on_start_time_slot(...)`
    - `.on_switch_rule(...)`
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_vote(...)`
    - `.on_validate_block(...)`
    - `.on_collect_votes(...)`
    - `.on_commit_block(...)`
    - `.on_combine_signature_failed(...)`
    - `.on_blacklist_validator(...)`
    - `.on_prune_records(...)`
"))]
pub struct ActorSpec<C: Chain, CC: CommitteeChain, N: Network, K: KVStore> {
    // Required parameters
    #[builder(setter(doc = "Set the chain being decided. The argument must implement the [Chain](crate::chain::Chain) trait. Required."))]
    chain: Arc<C>,
    #[builder(setter(doc = "Set the source of committees. The argument must implement the [CommitteeChain](crate::chain::CommitteeChain) trait. Required."))]
    committee_chain: Arc<CC>,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the key-value store consensus state is persisted in. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the [configuration](Configuration). Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default = Box::new(SystemClock), setter(transform = |clock: impl Clock| Box::new(clock) as Box<dyn Clock>,
    doc = "Set the clock timeslots are computed from. Defaults to the system clock. Optional."))]
    clock: Box<dyn Clock>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartTimeSlotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartTimeSlotEvent>),
    doc = "Register a handler closure to be invoked when a new timeslot starts. Optional."))]
    on_start_time_slot: Option<HandlerPtr<StartTimeSlotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SwitchRuleEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SwitchRuleEvent>),
    doc = "Register a handler closure to be invoked when the consensus rule switches. Optional."))]
    on_switch_rule: Option<HandlerPtr<SwitchRuleEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the actor broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the actor broadcasts a vote. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the actor accepts a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the actor receives a vote for a known proposal. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ValidateBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ValidateBlockEvent>),
    doc = "Register a handler closure to be invoked after a proposal's content is validated. Optional."))]
    on_validate_block: Option<HandlerPtr<ValidateBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectVotesEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectVotesEvent>),
    doc = "Register a handler closure to be invoked when a proposal collects a supermajority in a phase. Optional."))]
    on_collect_votes: Option<HandlerPtr<CollectVotesEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CombineSignatureFailedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CombineSignatureFailedEvent>),
    doc = "Register a handler closure to be invoked when votes fail to aggregate. Optional."))]
    on_combine_signature_failed: Option<HandlerPtr<CombineSignatureFailedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BlacklistValidatorEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BlacklistValidatorEvent>),
    doc = "Register a handler closure to be invoked when a validator is blacklisted. Optional."))]
    on_blacklist_validator: Option<HandlerPtr<BlacklistValidatorEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PruneRecordsEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PruneRecordsEvent>),
    doc = "Register a handler closure to be invoked after proposal records are pruned. Optional."))]
    on_prune_records: Option<HandlerPtr<PruneRecordsEvent>>,
}

impl<C: Chain, CC: CommitteeChain, N: Network, K: KVStore> ActorSpec<C, CC, N, K> {
    /// Starts all threads and channels associated with running an actor, and returns the handles to them
    /// in an [ActorHandle]. The actor starts running immediately.
    pub fn start(self) -> Result<ActorHandle, ConsensusError> {
        let tick_interval = self.configuration.tick_interval;
        let verifier_threads = self.configuration.verifier_threads;
        let verifier_queue_capacity = self.configuration.verifier_queue_capacity;

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            UserHandlers {
                on_start_time_slot: self.on_start_time_slot,
                on_switch_rule: self.on_switch_rule,
                on_propose: self.on_propose,
                on_vote: self.on_vote,
                on_receive_proposal: self.on_receive_proposal,
                on_receive_vote: self.on_receive_vote,
                on_validate_block: self.on_validate_block,
                on_collect_votes: self.on_collect_votes,
                on_commit_block: self.on_commit_block,
                on_combine_signature_failed: self.on_combine_signature_failed,
                on_blacklist_validator: self.on_blacklist_validator,
                on_prune_records: self.on_prune_records,
            },
        );
        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        // The actor is built before any thread is spawned, so that a bad configuration or an unreadable
        // store leaves nothing running.
        let mut actor = Actor::new(
            self.configuration,
            self.chain,
            self.committee_chain,
            self.network.clone(),
            self.kv_store,
            event_publisher,
        )?;

        let (inbox, inbox_receiver) = mpsc::channel();
        actor.set_verifier(VerifierPool::start(
            verifier_threads,
            verifier_queue_capacity,
            inbox.clone(),
        ));

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(self.network, inbox, poller_shutdown_receiver);

        let running = Arc::new(AtomicBool::new(true));
        let (actor_shutdown, actor_shutdown_receiver) = mpsc::channel();
        let actor = start_actor(
            actor,
            self.clock,
            tick_interval,
            inbox_receiver,
            actor_shutdown_receiver,
            running.clone(),
        );

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(ActorHandle {
            running,
            poller: Some(poller),
            poller_shutdown,
            actor: Some(actor),
            actor_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

fn start_actor<C: Chain, CC: CommitteeChain, N: Network, K: KVStore>(
    mut actor: Actor<C, CC, N, K>,
    clock: Box<dyn Clock>,
    tick_interval: Duration,
    inbox: Receiver<ActorInput>,
    shutdown_signal: Receiver<()>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut next_tick = Instant::now();
        loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            if Instant::now() >= next_tick {
                if running.load(Ordering::Acquire) {
                    actor.on_tick(clock.now());
                }
                next_tick = Instant::now() + tick_interval;
            }

            match inbox.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
                // A stopped actor drops its inputs. Peers re-send what matters with the next proposal.
                Ok(input) if running.load(Ordering::Acquire) => actor.on_input(input),
                Ok(_) | Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    })
}

/// A handle to the background threads of a running actor. When this value is dropped, all background
/// threads are gracefully shut down.
pub struct ActorHandle {
    running: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    actor: Option<JoinHandle<()>>,
    actor_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl ActorHandle {
    /// Resume a stopped actor.
    pub fn start(&self) -> Result<(), ConsensusError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ConsensusError::AlreadyStarted);
        }
        Ok(())
    }

    /// Pause the actor: it neither ticks nor handles messages until it is started again.
    pub fn stop(&self) -> Result<(), ConsensusError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(ConsensusError::AlreadyStopped);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for ActorHandle {
    fn drop(&mut self) {
        // The actor thread receives from the poller, and assumes the poller outlives it. A thread that
        // already exited has dropped its receiver, so send errors are ignored.
        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.actor_shutdown.send(());
        if let Some(actor) = self.actor.take() {
            let _ = actor.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}
