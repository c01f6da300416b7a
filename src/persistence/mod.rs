/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistence of the state an actor needs to recover from a crash without double proposing or double
//! voting.
//!
//! Three variables are persisted per chain: propose history, proposal record snapshots (the "receive
//! block by hash" table) and vote history. The [`store`] module describes how they are read and
//! written, and [`variables`] where they live in the library user's [`KVStore`](pluggables::KVStore).

pub mod pluggables;

pub mod store;

pub mod variables;
