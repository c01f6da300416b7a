/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block creation bounded by a timeout.
//!
//! [`Chain::create_new_block`] runs on a helper thread while the actor waits for at most the timeout.
//! If creation overruns, the actor gives up on proposing in this timeslot and carries on ticking; the
//! helper finishes in the background and its block is discarded. Until it does, further creation
//! requests fail fast with [`BlockCreationError::Busy`], so at most one creation call is ever running.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::Duration,
};

use crate::{
    chain::{BlockCreationError, Chain, View},
    types::{
        block::Block,
        data_types::{TimeSlot, ValidatorID},
    },
};

pub(crate) struct BlockCreator<C: Chain> {
    chain: Arc<C>,
    busy: Arc<AtomicBool>,
}

impl<C: Chain> BlockCreator<C> {
    pub(crate) fn new(chain: Arc<C>) -> Self {
        Self {
            chain,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn create_or_timeout(
        &self,
        previous: View,
        producer: ValidatorID,
        timeslot: TimeSlot,
        timeout: Duration,
    ) -> Result<Block, BlockCreationError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BlockCreationError::Busy);
        }

        let (result_sender, result_receiver) = mpsc::channel();
        let chain = self.chain.clone();
        let busy = self.busy.clone();
        thread::spawn(move || {
            let result = chain.create_new_block(&previous, producer, timeslot);
            busy.store(false, Ordering::Release);
            // The receiver is gone if the actor already timed out.
            let _ = result_sender.send(result);
        });

        match result_receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BlockCreationError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(BlockCreationError::Failed(String::from(
                "block creation thread panicked",
            ))),
        }
    }
}
