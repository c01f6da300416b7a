/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of a timeslot-driven Byzantine fault tolerant consensus core.
//!
//! Time is divided into fixed-length timeslots, and every timeslot has one leader, chosen round-robin
//! from the committee. The leader proposes a block. The committee votes with BLS partial signatures, and
//! a supermajority of votes is aggregated into one signature that commits the block. A block that was not
//! committed in its timeslot may be re-proposed by later leaders, together with a finality proof: the
//! chain of re-propose signatures of every leader in between.
//!
//! Two rules decide when a validator may vote:
//! - Lemma1: a single vote phase. A validator votes once per height, for the block it first votes for.
//! - Lemma2: a pre-vote phase, then a vote phase. A validator may move its vote lock to a later block
//!   only if that block comes with a valid finality proof.
//!
//! Which rule applies is decided by block height (see [`rules`]).
//!
//! ## Components
//!
//! - [`actor`]: the state machine, and the [runner](actor::runner) that drives it on its own threads.
//! - [`aggregation`]: vote verification and BLS signature aggregation.
//! - [`byzantine`]: detection and blacklisting of equivocating validators.
//! - [`finality`]: finality proofs and the tracker that assembles them.
//! - [`messages`]: the wire envelope exchanged between actors.
//! - [`persistence`]: crash-recovery state in a pluggable key-value store.
//!
//! The library user plugs in a [chain](chain::Chain), a [committee chain](chain::CommitteeChain), a
//! [network](networking::Network) and a [key-value store](persistence::pluggables::KVStore).

pub mod actor;

pub mod aggregation;

pub mod byzantine;

pub mod chain;

pub mod config;

pub(crate) mod event_bus;

pub mod events;

pub mod finality;

pub(crate) mod logging;

pub mod messages;

pub mod networking;

pub mod persistence;

pub mod rules;

pub mod types;
