use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
};

use timeslot_bft::{
    messages::BftMessage,
    networking::Network,
    types::data_types::{CryptoHash, PeerID},
};

/// A mock network stub which passes messages from and to threads using channels. Broadcasts reach the
/// sender too.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_peer_id: PeerID,
    all_peers: HashMap<PeerID, Sender<(PeerID, BftMessage)>>,
    inbox: Arc<Mutex<Receiver<(PeerID, BftMessage)>>>,
    missing_view_requests: Arc<Mutex<Vec<(PeerID, Vec<CryptoHash>)>>>,
}

impl NetworkStub {
    pub(crate) fn peer_id(&self) -> &PeerID {
        &self.my_peer_id
    }

    pub(crate) fn missing_view_requests(&self) -> Vec<(PeerID, Vec<CryptoHash>)> {
        self.missing_view_requests.lock().unwrap().clone()
    }
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: BftMessage) {
        for peer in self.all_peers.values() {
            let _ = peer.send((self.my_peer_id.clone(), message.clone()));
        }
    }

    fn send(&mut self, peer: PeerID, message: BftMessage) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_peer_id.clone(), message));
        }
    }

    fn recv(&mut self) -> Option<(PeerID, BftMessage)> {
        self.inbox.lock().unwrap().try_recv().ok()
    }

    fn request_missing_view(&mut self, peer: PeerID, hashes: Vec<CryptoHash>) {
        self.missing_view_requests.lock().unwrap().push((peer, hashes));
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = PeerID>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(PeerID, Receiver<(PeerID, BftMessage)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer.clone(), sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_peer_id, inbox)| NetworkStub {
            my_peer_id,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
            missing_view_requests: Arc::new(Mutex::new(Vec::new())),
        })
        .collect()
}
