/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The finality proof (proof of lock change) protocol.
//!
//! Per previous block, proofs move through `Empty -> Partial(k) -> Complete` as the
//! [tracker](tracker::FinalityProofTracker) collects re-propose signatures from propose messages.
//! [Verification](proof::FinalityProof::verify) re-derives the leader of every covered timeslot and
//! fails closed.

pub mod proof;

pub mod tracker;
