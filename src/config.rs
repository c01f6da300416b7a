/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The actor's configuration.
//!
//! A [`Configuration`] is built once with the builder pattern and is read-only afterwards:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .chain_id(ChainID::new(1))
//!     .keys(vec![keypair])
//!     .timeslot_duration(Duration::from_secs(10))
//!     .lemma2_activation_height(BlockHeight::new(1_000))
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use typed_builder::TypedBuilder;

use crate::{
    finality::proof::DEFAULT_MAX_FINALITY_PROOF,
    types::{
        crypto_primitives::ConsensusKeypair,
        data_types::{BlockHeight, ChainID, PeerID},
    },
};

/// Stores the user-defined parameters of a consensus actor.
///
/// ## Keys
///
/// A node may hold several [`ConsensusKeypair`]s, one per committee seat it controls. It proposes in
/// every timeslot whose leader is one of its keys, and votes with each of its keys that is in a
/// proposal's signing committee. An actor with no keys cannot be constructed
/// ([`ConfigurationError::MissingKeys`]).
///
/// ## Lemma2 activation height
///
/// Blocks at or above this height are decided under the two-phase, finality-proof rule. Below it, the
/// single-phase rule applies. See [`rules`](crate::rules).
///
/// ## Log Events
///
/// The actor logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.chain_id(...)`
    - `.keys(...)`
    - `.timeslot_duration(...)`
    - `.lemma2_activation_height(...)`

    Optional:
    - `.peer_id(...)`
    - `.tick_interval(...)`
    - `.vote_enabled(...)`
    - `.handle_vote_messages(...)`
    - `.broadcast_on_insert(...)`
    - `.validate_interval(...)`
    - `.record_ttl(...)`
    - `.max_finality_proof(...)`
    - `.verifier_threads(...)`
    - `.verifier_queue_capacity(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the id of the chain this actor drives. Required."))]
    pub chain_id: ChainID,
    #[builder(setter(doc = "Set the keypairs this node proposes and votes with. Required."))]
    pub keys: Vec<ConsensusKeypair>,
    #[builder(setter(doc = "Set the length of a timeslot. Required."))]
    pub timeslot_duration: Duration,
    #[builder(setter(doc = "Set the height from which the two-phase finality-proof rule applies. Required."))]
    pub lemma2_activation_height: BlockHeight,
    #[builder(default, setter(strip_option, doc = "Set the id this node is known by on the peer-to-peer network. Optional, defaults to the Base64 encoding of the first key's identity."))]
    pub peer_id: Option<PeerID>,
    #[builder(default = Duration::from_millis(100), setter(doc = "Set how often the actor ticks. Optional, defaults to 100ms."))]
    pub tick_interval: Duration,
    #[builder(default = true, setter(doc = "Set whether this node votes. Optional, defaults to true."))]
    pub vote_enabled: bool,
    #[builder(default = true, setter(doc = "Set whether this node collects votes from peers. Optional, defaults to true."))]
    pub handle_vote_messages: bool,
    #[builder(default = true, setter(doc = "Set whether committed blocks are broadcast on insertion. Optional, defaults to true."))]
    pub broadcast_on_insert: bool,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the minimum time between two content validations of the same proposal. Optional, defaults to 1s."))]
    pub validate_interval: Duration,
    #[builder(default, setter(strip_option, doc = "Set how long an uncommitted proposal record is kept. Optional, defaults to 10 timeslots."))]
    pub record_ttl: Option<Duration>,
    #[builder(default = DEFAULT_MAX_FINALITY_PROOF, setter(doc = "Set the maximum number of entries in a finality proof. Optional, defaults to 64."))]
    pub max_finality_proof: usize,
    #[builder(default = 4, setter(doc = "Set the number of vote verification threads. Optional, defaults to 4."))]
    pub verifier_threads: usize,
    #[builder(default = 1024, setter(doc = "Set the number of votes that may wait for verification. Optional, defaults to 1024."))]
    pub verifier_queue_capacity: usize,
    #[builder(default = false, setter(doc = "Enable logging of events? Optional, defaults to false."))]
    pub log_events: bool,
}

impl Configuration {
    /// Check the parts of the configuration that the actor cannot start without.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.keys.is_empty() {
            return Err(ConfigurationError::MissingKeys);
        }
        if self.timeslot_duration.is_zero() {
            return Err(ConfigurationError::ZeroTimeSlotDuration);
        }
        Ok(())
    }

    pub fn peer_id(&self) -> PeerID {
        match (&self.peer_id, self.keys.first()) {
            (Some(peer_id), _) => peer_id.clone(),
            (None, Some(keypair)) => PeerID::new(STANDARD_NO_PAD.encode(keypair.id().bytes())),
            (None, None) => PeerID::new(""),
        }
    }

    pub fn record_ttl(&self) -> Duration {
        self.record_ttl
            .unwrap_or_else(|| self.timeslot_duration.saturating_mul(10))
    }

    /// Half a timeslot: the longest the actor waits for the chain to create a block.
    pub fn block_creation_timeout(&self) -> Duration {
        self.timeslot_duration / 2
    }
}

/// The configuration cannot run an actor. Fatal: the actor is not constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    MissingKeys,
    ZeroTimeSlotDuration,
    /// The configured chain is not the chain the actor was given.
    ChainMismatch { configured: ChainID, chain: ChainID },
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MissingKeys => write!(f, "no consensus keys configured"),
            ConfigurationError::ZeroTimeSlotDuration => write!(f, "timeslot duration is zero"),
            ConfigurationError::ChainMismatch { configured, chain } => write!(
                f,
                "configured for chain {} but given chain {}",
                configured, chain
            ),
        }
    }
}

impl std::error::Error for ConfigurationError {}
