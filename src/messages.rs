/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus message envelope.
//!
//! Messages are Borsh-encoded. The block inside a [`ProposeMessage`] is carried as bytes and is only
//! decoded by the actor, so that a malformed block is dropped without affecting the rest of the
//! message stream.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    finality::proof::FinalityProof,
    types::{
        block::Block,
        data_types::{CryptoHash, PeerID, SignatureBytes, TimeSlot},
        vote::Vote,
    },
};

/// All message variants exchanged by consensus actors.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BftMessage {
    /// See: [`ProposeMessage`].
    Propose(ProposeMessage),

    /// A pre-vote or vote. See: [`Vote`].
    Vote(Vote),

    /// See: [`RequestBlockMessage`].
    RequestBlock(RequestBlockMessage),
}

impl BftMessage {
    pub fn encode(&self) -> Result<Vec<u8>, std::io::Error> {
        self.try_to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<BftMessage, DecodeError> {
        BftMessage::try_from_slice(bytes).map_err(DecodeError::Message)
    }
}

impl From<ProposeMessage> for BftMessage {
    fn from(value: ProposeMessage) -> Self {
        BftMessage::Propose(value)
    }
}

impl From<Vote> for BftMessage {
    fn from(value: Vote) -> Self {
        BftMessage::Vote(value)
    }
}

impl From<RequestBlockMessage> for BftMessage {
    fn from(value: RequestBlockMessage) -> Self {
        BftMessage::RequestBlock(value)
    }
}

/// A proposal (or re-proposal) of a block in `timeslot`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposeMessage {
    /// The peer that relayed the proposal. Block requests for unknown previous blocks go here.
    pub peer_id: PeerID,
    pub block_bytes: Vec<u8>,
    pub finality_proof: FinalityProof,
    /// The proposer's re-propose signature for `timeslot`.
    pub re_propose_signature: SignatureBytes,
    pub timeslot: TimeSlot,
}

impl ProposeMessage {
    pub fn new(
        peer_id: PeerID,
        block: &Block,
        finality_proof: FinalityProof,
        re_propose_signature: SignatureBytes,
    ) -> Result<ProposeMessage, std::io::Error> {
        Ok(ProposeMessage {
            peer_id,
            block_bytes: block.try_to_vec()?,
            finality_proof,
            re_propose_signature,
            timeslot: block.header.propose_timeslot,
        })
    }

    pub fn block(&self) -> Result<Block, DecodeError> {
        Block::try_from_slice(&self.block_bytes).map_err(DecodeError::Block)
    }
}

/// A request for the proposal with `block_hash` (a propose hash), by `peer_id`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RequestBlockMessage {
    pub block_hash: CryptoHash,
    pub peer_id: PeerID,
}

/// An inbound message could not be decoded. The message is dropped.
#[derive(Debug)]
pub enum DecodeError {
    Message(std::io::Error),
    Block(std::io::Error),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Message(err) => write!(f, "cannot decode message: {}", err),
            DecodeError::Block(err) => write!(f, "cannot decode proposed block: {}", err),
        }
    }
}
