/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable peer-to-peer transport, and the poller thread that feeds it into the actor.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::{
    actor::ActorInput,
    messages::BftMessage,
    types::data_types::{CryptoHash, PeerID},
};

pub trait Network: Clone + Send + 'static {
    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: BftMessage);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: PeerID, message: BftMessage);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(PeerID, BftMessage)>;

    /// Ask `peer` to stream the blocks with `hashes`, which a received proposal builds on but the chain
    /// does not have.
    fn request_missing_view(&mut self, peer: PeerID, hashes: Vec<CryptoHash>);
}

/// Spawn the poller thread, which polls the [`Network`] for messages and pushes them into the actor's
/// inbox.
pub(crate) fn start_polling<N: Network>(
    mut network: N,
    inbox: Sender<ActorInput>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, message)) = network.recv() {
            if inbox.send(ActorInput::Message(origin, message)).is_err() {
                log::debug!("actor inbox closed, poller exiting");
                return;
            }
        } else {
            thread::yield_now()
        }
    })
}
