/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Verification of individual votes and aggregation of their partial BLS signatures.
//!
//! ## Aggregation
//!
//! [`aggregate_votes`] combines the partial signatures of a set of individually-verified votes into a
//! single [`AggregatedSignature`]:
//! 1. Each vote is mapped to its signer's index in the signing committee.
//! 2. The votes are sorted by index. Two votes with the same index make the whole set invalid.
//! 3. The partial signatures are aggregated, and so are the public keys of the contributing indices.
//! 4. The aggregate is re-verified against the aggregate public key.
//! 5. If re-verification fails, every partial signature is checked one by one, and the signers whose
//!    partial signatures fail are returned in [`CombineSignatureError::InvalidSigners`].
//!
//! Step 5 catches crafted signatures that were admitted by a race with per-vote verification: the
//! caller evicts the isolated signers and retries with the remaining votes.

use std::fmt::{self, Display, Formatter};

use blst::BLST_ERROR;

use crate::types::{
    committee::Committee,
    crypto_primitives::{BlsAggregatePublicKey, BlsAggregateSignature, BlsPublicKey, BlsSignature},
    data_types::{BlsSignatureBytes, ChainID, CryptoHash, ValidatorID, ValidatorIndex},
    vote::{bls_message, Vote, VotePhase},
};

/// An aggregate of partial BLS signatures over the same message, together with the committee indices
/// of the signers in ascending order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatedSignature {
    pub signature: BlsSignatureBytes,
    pub validator_indices: Vec<ValidatorIndex>,
}

/// Check a single vote before it is admitted into a proposal record:
/// 1. The signer must be a member of `committee`.
/// 2. The confirmation signature must be the signer's.
/// 3. The partial BLS signature must verify against the signer's BLS key, over the block with content
///    hash `content_hash`.
/// 4. The bridge co-signature, if any, must be the signer's.
pub fn verify_vote(
    committee: &Committee,
    content_hash: &CryptoHash,
    vote: &Vote,
) -> Result<(), SignatureError> {
    let member = committee
        .member(&vote.validator)
        .ok_or(CommitteeSignatureError::NotInCommittee(vote.validator))?;

    if !vote.is_owned() {
        return Err(SignatureError::NotOwned(vote.validator));
    }
    if !vote.is_partial_signature_correct(&member.bls, content_hash) {
        return Err(SignatureError::InvalidPartialSignature(vote.validator));
    }
    if !vote.is_bridge_signature_correct(content_hash) {
        return Err(SignatureError::InvalidBridgeSignature(vote.validator));
    }
    Ok(())
}

/// Aggregate the partial signatures of `votes`, all in `phase` and all for the block with content hash
/// `content_hash` on chain `chain_id`.
///
/// # Preconditions
///
/// Every vote in `votes` has already passed [`verify_vote`]. Aggregation is still safe if one has not:
/// the aggregate is re-verified before it is returned.
pub fn aggregate_votes<'a>(
    committee: &Committee,
    chain_id: ChainID,
    content_hash: &CryptoHash,
    phase: VotePhase,
    votes: impl IntoIterator<Item = &'a Vote>,
) -> Result<AggregatedSignature, CombineSignatureError> {
    // 1. Map each vote to its signer's committee index.
    let mut indexed: Vec<(ValidatorIndex, &Vote)> = Vec::new();
    for vote in votes {
        let index = committee
            .index_of(&vote.validator)
            .ok_or(CommitteeSignatureError::NotInCommittee(vote.validator))?;
        indexed.push((index, vote));
    }
    if indexed.is_empty() {
        return Err(CombineSignatureError::NoVotes);
    }

    // 2. Sort by index and reject duplicates.
    indexed.sort_by_key(|(index, _)| *index);
    if let Some(pair) = indexed.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(CombineSignatureError::DuplicateIndex(pair[0].0));
    }

    // 3. Aggregate signatures and public keys.
    let mut signatures = Vec::with_capacity(indexed.len());
    let mut public_keys = Vec::with_capacity(indexed.len());
    for (index, vote) in &indexed {
        let signature = BlsSignature::from_bytes(&vote.bls_signature.bytes())
            .map_err(|_| CombineSignatureError::InvalidSigners(vec![vote.validator]))?;
        signatures.push(signature);
        public_keys.push(committee_public_key(committee, *index)?);
    }
    let signature_refs: Vec<&BlsSignature> = signatures.iter().collect();
    let aggregate = BlsAggregateSignature::aggregate(&signature_refs, false)
        .map_err(CombineSignatureError::Blst)?
        .to_signature();
    let public_key_refs: Vec<&BlsPublicKey> = public_keys.iter().collect();
    let aggregate_public_key = BlsAggregatePublicKey::aggregate(&public_key_refs, false)
        .map_err(CombineSignatureError::Blst)?
        .to_public_key();

    // 4. Re-verify.
    let message = bls_message(chain_id, content_hash);
    let result = aggregate.verify(true, &message, phase.dst(), &[], &aggregate_public_key, false);
    if result == BLST_ERROR::BLST_SUCCESS {
        return Ok(AggregatedSignature {
            signature: BlsSignatureBytes::new(aggregate.to_bytes()),
            validator_indices: indexed.iter().map(|(index, _)| *index).collect(),
        });
    }

    // 5. Isolate the bad signers.
    let mut invalid_signers = Vec::new();
    for ((_, vote), (signature, public_key)) in
        indexed.iter().zip(signatures.iter().zip(public_keys.iter()))
    {
        if signature.verify(true, &message, phase.dst(), &[], public_key, false)
            != BLST_ERROR::BLST_SUCCESS
        {
            invalid_signers.push(vote.validator);
        }
    }
    Err(CombineSignatureError::InvalidSigners(invalid_signers))
}

/// Check that `aggregated` is a correct aggregate signature by the members of `committee` at its
/// validator indices, over the block with content hash `content_hash`.
pub fn verify_aggregated(
    committee: &Committee,
    chain_id: ChainID,
    content_hash: &CryptoHash,
    phase: VotePhase,
    aggregated: &AggregatedSignature,
) -> bool {
    if aggregated.validator_indices.is_empty()
        || aggregated
            .validator_indices
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
    {
        return false;
    }

    let Ok(public_keys) = aggregated
        .validator_indices
        .iter()
        .map(|index| committee_public_key(committee, *index))
        .collect::<Result<Vec<BlsPublicKey>, CombineSignatureError>>()
    else {
        return false;
    };
    let public_key_refs: Vec<&BlsPublicKey> = public_keys.iter().collect();
    let Ok(aggregate_public_key) = BlsAggregatePublicKey::aggregate(&public_key_refs, false) else {
        return false;
    };
    let Ok(signature) = BlsSignature::from_bytes(&aggregated.signature.bytes()) else {
        return false;
    };

    signature.verify(
        true,
        &bls_message(chain_id, content_hash),
        phase.dst(),
        &[],
        &aggregate_public_key.to_public_key(),
        false,
    ) == BLST_ERROR::BLST_SUCCESS
}

fn committee_public_key(
    committee: &Committee,
    index: ValidatorIndex,
) -> Result<BlsPublicKey, CombineSignatureError> {
    let member = committee
        .get(index)
        .ok_or(CommitteeSignatureError::IndexOutOfRange(index))?;
    BlsPublicKey::from_bytes(&member.bls.bytes()).map_err(|_| {
        CombineSignatureError::from(CommitteeSignatureError::MalformedPublicKey(member.identity))
    })
}

/// A single vote's signatures are wrong. Recoverable: the vote is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    NotOwned(ValidatorID),
    InvalidPartialSignature(ValidatorID),
    InvalidBridgeSignature(ValidatorID),
    Committee(CommitteeSignatureError),
}

impl SignatureError {
    pub fn validator(&self) -> Option<ValidatorID> {
        match self {
            SignatureError::NotOwned(validator)
            | SignatureError::InvalidPartialSignature(validator)
            | SignatureError::InvalidBridgeSignature(validator) => Some(*validator),
            SignatureError::Committee(CommitteeSignatureError::NotInCommittee(validator))
            | SignatureError::Committee(CommitteeSignatureError::MalformedPublicKey(validator)) => {
                Some(*validator)
            }
            SignatureError::Committee(CommitteeSignatureError::IndexOutOfRange(_)) => None,
        }
    }
}

impl Display for SignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::NotOwned(validator) => {
                write!(f, "vote confirmation signature is not {}'s", validator)
            }
            SignatureError::InvalidPartialSignature(validator) => {
                write!(f, "partial signature of {} does not verify", validator)
            }
            SignatureError::InvalidBridgeSignature(validator) => {
                write!(f, "bridge signature of {} does not verify", validator)
            }
            SignatureError::Committee(err) => Display::fmt(err, f),
        }
    }
}

impl From<CommitteeSignatureError> for SignatureError {
    fn from(value: CommitteeSignatureError) -> Self {
        SignatureError::Committee(value)
    }
}

/// The signing committee cannot account for a signature. Recoverable: the vote is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitteeSignatureError {
    NotInCommittee(ValidatorID),
    IndexOutOfRange(ValidatorIndex),
    MalformedPublicKey(ValidatorID),
}

impl Display for CommitteeSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CommitteeSignatureError::NotInCommittee(validator) => {
                write!(f, "{} is not in the signing committee", validator)
            }
            CommitteeSignatureError::IndexOutOfRange(index) => {
                write!(f, "validator index {} is out of range", index.int())
            }
            CommitteeSignatureError::MalformedPublicKey(validator) => {
                write!(f, "BLS public key of {} is malformed", validator)
            }
        }
    }
}

/// Aggregation failed. Recoverable: the commit attempt is abandoned for this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombineSignatureError {
    NoVotes,
    DuplicateIndex(ValidatorIndex),
    Committee(CommitteeSignatureError),
    Blst(BLST_ERROR),
    /// The aggregate did not verify. Contains the signers whose partial signatures failed individually.
    InvalidSigners(Vec<ValidatorID>),
}

impl CombineSignatureError {
    /// Validators whose votes should be evicted before the next attempt.
    pub fn offenders(&self) -> Vec<ValidatorID> {
        match self {
            CombineSignatureError::InvalidSigners(signers) => signers.clone(),
            CombineSignatureError::Committee(CommitteeSignatureError::NotInCommittee(validator))
            | CombineSignatureError::Committee(CommitteeSignatureError::MalformedPublicKey(
                validator,
            )) => vec![*validator],
            _ => Vec::new(),
        }
    }
}

impl Display for CombineSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CombineSignatureError::NoVotes => write!(f, "no votes to aggregate"),
            CombineSignatureError::DuplicateIndex(index) => {
                write!(f, "validator index {} contributes twice", index.int())
            }
            CombineSignatureError::Committee(err) => Display::fmt(err, f),
            CombineSignatureError::Blst(err) => write!(f, "blst error: {:?}", err),
            CombineSignatureError::InvalidSigners(signers) => {
                write!(f, "aggregate does not verify, {} invalid signers", signers.len())
            }
        }
    }
}

impl From<CommitteeSignatureError> for CombineSignatureError {
    fn from(value: CommitteeSignatureError) -> Self {
        CombineSignatureError::Committee(value)
    }
}
