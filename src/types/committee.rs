/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Ordered committee snapshots and leader selection.
//!
//! A [`Committee`] is consumed as an opaque, ordered list supplied by the
//! [committee chain](crate::chain::CommitteeChain). Snapshots are immutable after construction and
//! are shared between proposal records by reference count.

use std::{
    io::{Read, Result as IoResult, Write},
    sync::Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{BlsPublicKeyBytes, TimeSlot, ValidatorID, ValidatorIndex};

/// The public keys a committee member signs consensus messages with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct ValidatorKey {
    pub identity: ValidatorID,
    pub bls: BlsPublicKeyBytes,
}

impl ValidatorKey {
    pub const fn new(identity: ValidatorID, bls: BlsPublicKeyBytes) -> Self {
        Self { identity, bls }
    }
}

/// An ordered, immutable snapshot of committee members. Cloning a `Committee` is a reference count
/// bump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee(Arc<[ValidatorKey]>);

impl Committee {
    /// Create a snapshot from an ordered list of members. A key that appears more than once keeps only
    /// its first position.
    pub fn new(members: Vec<ValidatorKey>) -> Self {
        let mut deduplicated: Vec<ValidatorKey> = Vec::with_capacity(members.len());
        for member in members {
            if !deduplicated.iter().any(|m| m.identity == member.identity) {
                deduplicated.push(member);
            }
        }
        Self(deduplicated.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn members(&self) -> &[ValidatorKey] {
        &self.0
    }

    pub fn get(&self, index: ValidatorIndex) -> Option<&ValidatorKey> {
        self.0.get(index.int() as usize)
    }

    pub fn index_of(&self, validator: &ValidatorID) -> Option<ValidatorIndex> {
        self.0
            .iter()
            .position(|member| &member.identity == validator)
            .map(|position| ValidatorIndex::new(position as u32))
    }

    pub fn member(&self, validator: &ValidatorID) -> Option<&ValidatorKey> {
        self.0.iter().find(|member| &member.identity == validator)
    }

    pub fn contains(&self, validator: &ValidatorID) -> bool {
        self.member(validator).is_some()
    }

    /// Whether `count` members amount to strictly more than two-thirds of the committee.
    pub fn is_supermajority(&self, count: usize) -> bool {
        !self.is_empty() && count * 3 > self.len() * 2
    }

    /// The smallest number of members that is a supermajority.
    pub fn quorum(&self) -> usize {
        (self.len() * 2) / 3 + 1
    }
}

impl BorshSerialize for Committee {
    fn serialize<W: Write>(&self, writer: &mut W) -> IoResult<()> {
        self.0.to_vec().serialize(writer)
    }
}

impl BorshDeserialize for Committee {
    fn deserialize_reader<R: Read>(reader: &mut R) -> IoResult<Self> {
        Ok(Committee::new(Vec::<ValidatorKey>::deserialize_reader(reader)?))
    }
}

/// Get the leader expected to propose in `timeslot`: member `timeslot mod |committee|`.
///
/// Returns `None` if the committee is empty.
pub fn select_leader(timeslot: TimeSlot, committee: &Committee) -> Option<ValidatorID> {
    if committee.is_empty() {
        return None;
    }
    let position = (timeslot.int() % committee.len() as u64) as usize;
    Some(committee.members()[position].identity)
}
