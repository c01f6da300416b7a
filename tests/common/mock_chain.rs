//! In-memory implementations of the chain-side collaborators, and a clock tests move by hand.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use timeslot_bft::{
    actor::timeslot::Clock,
    chain::{
        BlockCreationError, BlockValidationError, Chain, CommitteeChain, InsertBlockError, View,
    },
    types::{
        block::{Block, BlockHeader},
        committee::Committee,
        data_types::{BlockHeight, ChainID, CryptoHash, TimeSlot, ValidatorID},
    },
};

pub(crate) const TIMESLOT: Duration = Duration::from_secs(10);

/// A time one second into `timeslot`.
pub(crate) fn at(timeslot: u64) -> Duration {
    TIMESLOT * timeslot as u32 + Duration::from_secs(1)
}

pub(crate) fn genesis() -> View {
    View {
        hash: CryptoHash::zero(),
        height: BlockHeight::new(0),
        propose_timeslot: TimeSlot::new(0),
    }
}

pub(crate) fn new_block(previous: &View, producer: ValidatorID, timeslot: TimeSlot, body: Vec<u8>) -> Block {
    Block::new(
        BlockHeader {
            height: previous.height + 1,
            previous_block_hash: previous.hash,
            producer,
            produce_timeslot: timeslot,
            proposer: producer,
            propose_timeslot: timeslot,
            aggregate_root_hash: CryptoHash::zero(),
        },
        body,
    )
}

/// A chain that finalizes every block it inserts.
pub(crate) struct MockChain {
    chain_id: ChainID,
    state: Mutex<ChainState>,
}

struct ChainState {
    blocks: HashMap<CryptoHash, Block>,
    best: View,
    rejected: HashSet<CryptoHash>,
}

impl MockChain {
    pub(crate) fn new(chain_id: ChainID) -> MockChain {
        MockChain {
            chain_id,
            state: Mutex::new(ChainState {
                blocks: HashMap::new(),
                best: genesis(),
                rejected: HashSet::new(),
            }),
        }
    }

    /// Make content validation of the block with `block_hash` fail.
    pub(crate) fn reject(&self, block_hash: CryptoHash) {
        self.state.lock().unwrap().rejected.insert(block_hash);
    }

    pub(crate) fn block(&self, block_hash: &CryptoHash) -> Option<Block> {
        self.state.lock().unwrap().blocks.get(block_hash).cloned()
    }

    pub(crate) fn best_block(&self) -> Option<Block> {
        let state = self.state.lock().unwrap();
        state.blocks.get(&state.best.hash).cloned()
    }
}

impl Chain for MockChain {
    fn chain_id(&self) -> ChainID {
        self.chain_id
    }

    fn best_view(&self) -> View {
        self.state.lock().unwrap().best
    }

    fn final_view(&self) -> View {
        self.state.lock().unwrap().best
    }

    fn has_block(&self, hash: &CryptoHash) -> bool {
        *hash == genesis().hash || self.state.lock().unwrap().blocks.contains_key(hash)
    }

    fn create_new_block(
        &self,
        previous: &View,
        producer: ValidatorID,
        timeslot: TimeSlot,
    ) -> Result<Block, BlockCreationError> {
        let mut body = producer.bytes().to_vec();
        body.extend_from_slice(&timeslot.to_le_bytes());
        Ok(new_block(previous, producer, timeslot, body))
    }

    fn validate_pre_sign_block(&self, block: &Block) -> Result<(), BlockValidationError> {
        if self.state.lock().unwrap().rejected.contains(&block.hash()) {
            return Err(BlockValidationError(String::from("rejected by test")));
        }
        Ok(())
    }

    fn insert_block(&self, block: Block) -> Result<(), InsertBlockError> {
        let mut state = self.state.lock().unwrap();
        if block.header.previous_block_hash != state.best.hash {
            return Err(InsertBlockError(String::from("does not extend the best view")));
        }
        state.best = View {
            hash: block.hash(),
            height: block.height(),
            propose_timeslot: block.header.propose_timeslot,
        };
        state.blocks.insert(block.hash(), block);
        Ok(())
    }

    fn insert_and_broadcast_block(&self, block: Block) -> Result<(), InsertBlockError> {
        self.insert_block(block)
    }
}

pub(crate) struct MockCommitteeChain {
    chain_id: ChainID,
    committee: Committee,
}

impl MockCommitteeChain {
    pub(crate) fn new(chain_id: ChainID, committee: Committee) -> MockCommitteeChain {
        MockCommitteeChain { chain_id, committee }
    }
}

impl CommitteeChain for MockCommitteeChain {
    fn final_view(&self) -> CryptoHash {
        CryptoHash::zero()
    }

    fn committees_from_view_hash(&self, _view_hash: &CryptoHash, chain_id: ChainID) -> Option<Committee> {
        (chain_id == self.chain_id).then(|| self.committee.clone())
    }
}

#[derive(Clone)]
pub(crate) struct ManualClock(Arc<Mutex<Duration>>);

impl ManualClock {
    pub(crate) fn new(now: Duration) -> ManualClock {
        ManualClock(Arc::new(Mutex::new(now)))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.0.lock().unwrap()
    }
}
