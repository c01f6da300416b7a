/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed access to the consensus recovery variables of one chain.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    pluggables::{KVGet, KVStore, WriteBatch},
    variables::{self, chain_prefix, concat},
};
use crate::{
    finality::proof::FinalityProof,
    rules::validator::VoteLock,
    types::{
        block::Block,
        committee::Committee,
        data_types::{BlockHeight, ChainID, CryptoHash, SignatureBytes, TimeSlot},
        vote::Vote,
    },
};

/// Everything about a proposal record that survives a restart.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalRecordSnapshot {
    pub block: Block,
    pub committee: Committee,
    pub signing_committee: Committee,
    pub finality_proof: FinalityProof,
    pub re_propose_signature: SignatureBytes,
    pub is_valid: bool,
    pub is_pre_voted: bool,
    pub is_voted: bool,
    pub is_committed: bool,
    pub is_valid_finality_proof: bool,
    /// Only votes whose signatures were verified are persisted.
    pub pre_votes: Vec<Vote>,
    pub votes: Vec<Vote>,
    /// Seconds since the Unix epoch.
    pub receive_time: u64,
}

/// State read back from the store when an actor starts.
#[derive(Default)]
pub struct RecoveredState {
    pub propose_history: BTreeMap<TimeSlot, CryptoHash>,
    pub vote_history: BTreeMap<BlockHeight, VoteLock>,
    pub records: Vec<ProposalRecordSnapshot>,
}

/// The consensus recovery variables of one chain, stored in a [`KVStore`].
pub struct ConsensusStore<K: KVStore> {
    kv_store: K,
    prefix: Vec<u8>,
}

impl<K: KVStore> ConsensusStore<K> {
    pub fn new(kv_store: K, chain_id: ChainID) -> Self {
        Self {
            kv_store,
            prefix: chain_prefix(chain_id),
        }
    }

    /// Read every recovery variable, from a single snapshot of the store.
    pub fn load(&self) -> Result<RecoveredState, PersistenceError> {
        let snapshot = self.kv_store.snapshot();

        let propose_history = self
            .read(&snapshot, &variables::PROPOSE_HISTORY, Key::ProposeHistory)?
            .unwrap_or_default();
        let vote_history = self
            .read(&snapshot, &variables::VOTE_HISTORY, Key::VoteHistory)?
            .unwrap_or_default();
        let index: BTreeSet<CryptoHash> = self
            .read(&snapshot, &variables::RECEIVE_BLOCK_INDEX, Key::ReceiveBlockIndex)?
            .unwrap_or_default();

        let mut records = Vec::with_capacity(index.len());
        for propose_hash in index {
            let suffix = concat(&variables::RECEIVE_BLOCK_BY_HASH, &propose_hash.bytes());
            if let Some(record) =
                self.read(&snapshot, &suffix, Key::ReceiveBlockByHash { propose_hash })?
            {
                records.push(record);
            }
        }

        Ok(RecoveredState {
            propose_history,
            vote_history,
            records,
        })
    }

    pub fn save_propose_history(
        &mut self,
        propose_history: &BTreeMap<TimeSlot, CryptoHash>,
    ) -> Result<(), PersistenceError> {
        let mut wb = K::WriteBatch::new();
        self.set(&mut wb, &variables::PROPOSE_HISTORY, propose_history, Key::ProposeHistory)?;
        self.kv_store
            .write(wb)
            .map_err(|source| PersistenceError::WriteError { source })
    }

    pub fn save_vote_history(
        &mut self,
        vote_history: &BTreeMap<BlockHeight, VoteLock>,
    ) -> Result<(), PersistenceError> {
        let mut wb = K::WriteBatch::new();
        self.set(&mut wb, &variables::VOTE_HISTORY, vote_history, Key::VoteHistory)?;
        self.kv_store
            .write(wb)
            .map_err(|source| PersistenceError::WriteError { source })
    }

    /// Insert or overwrite the snapshots in `upserts` and delete the snapshots in `deletions`, in one
    /// atomic write.
    pub fn save_records(
        &mut self,
        upserts: &[(CryptoHash, ProposalRecordSnapshot)],
        deletions: &[CryptoHash],
    ) -> Result<(), PersistenceError> {
        if upserts.is_empty() && deletions.is_empty() {
            return Ok(());
        }

        let mut index: BTreeSet<CryptoHash> = self
            .read(&self.kv_store, &variables::RECEIVE_BLOCK_INDEX, Key::ReceiveBlockIndex)?
            .unwrap_or_default();
        let mut wb = K::WriteBatch::new();

        for (propose_hash, snapshot) in upserts {
            let suffix = concat(&variables::RECEIVE_BLOCK_BY_HASH, &propose_hash.bytes());
            self.set(
                &mut wb,
                &suffix,
                snapshot,
                Key::ReceiveBlockByHash {
                    propose_hash: *propose_hash,
                },
            )?;
            index.insert(*propose_hash);
        }
        for propose_hash in deletions {
            let suffix = concat(&variables::RECEIVE_BLOCK_BY_HASH, &propose_hash.bytes());
            wb.delete(&concat(&self.prefix, &suffix));
            index.remove(propose_hash);
        }
        self.set(&mut wb, &variables::RECEIVE_BLOCK_INDEX, &index, Key::ReceiveBlockIndex)?;

        self.kv_store
            .write(wb)
            .map_err(|source| PersistenceError::WriteError { source })
    }

    fn read<T: BorshDeserialize>(
        &self,
        kv_get: &impl KVGet,
        suffix: &[u8],
        key: Key,
    ) -> Result<Option<T>, PersistenceError> {
        match kv_get.get(&concat(&self.prefix, suffix)) {
            Some(bytes) => T::deserialize(&mut bytes.as_slice())
                .map(Some)
                .map_err(|source| PersistenceError::DeserializeValueError { key, source }),
            None => Ok(None),
        }
    }

    fn set<T: BorshSerialize>(
        &self,
        wb: &mut K::WriteBatch,
        suffix: &[u8],
        value: &T,
        key: Key,
    ) -> Result<(), PersistenceError> {
        let bytes = value
            .try_to_vec()
            .map_err(|source| PersistenceError::SerializeValueError { key, source })?;
        wb.set(&concat(&self.prefix, suffix), &bytes);
        Ok(())
    }
}

/// Error when reading or writing a recovery variable.
#[derive(Debug)]
pub enum PersistenceError {
    SerializeValueError { key: Key, source: std::io::Error },
    DeserializeValueError { key: Key, source: std::io::Error },
    WriteError { source: std::io::Error },
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::SerializeValueError { key, source } => {
                write!(f, "cannot serialize {}: {}", key, source)
            }
            PersistenceError::DeserializeValueError { key, source } => {
                write!(f, "cannot deserialize {}: {}", key, source)
            }
            PersistenceError::WriteError { source } => write!(f, "cannot write to the store: {}", source),
        }
    }
}

#[derive(Debug)]
pub enum Key {
    ProposeHistory,
    ReceiveBlockIndex,
    ReceiveBlockByHash { propose_hash: CryptoHash },
    VoteHistory,
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Key::ProposeHistory => write!(f, "Propose History"),
            Key::ReceiveBlockIndex => write!(f, "Receive Block Index"),
            Key::ReceiveBlockByHash { propose_hash } => {
                write!(f, "Receive Block for proposal {}", propose_hash)
            }
            Key::VoteHistory => write!(f, "Vote History"),
        }
    }
}
