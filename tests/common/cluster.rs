//! A committee of actors driven tick by tick from the test thread, with message delivery under the
//! test's control.

use std::sync::{
    mpsc::{self, Receiver},
    Arc,
};

use rand_core::OsRng;
use timeslot_bft::{
    actor::Actor,
    config::Configuration,
    events::Event,
    messages::BftMessage,
    networking::Network,
    types::{
        committee::{select_leader, Committee},
        crypto_primitives::ConsensusKeypair,
        data_types::{BlockHeight, ChainID, PeerID, TimeSlot},
    },
};

use super::{
    kv_store::MemKVStore,
    mock_chain::{at, MockChain, MockCommitteeChain, TIMESLOT},
    network::{mock_network, NetworkStub},
};

pub(crate) const CHAIN_ID: ChainID = ChainID::new(7);

pub(crate) type TestActor = Actor<MockChain, MockCommitteeChain, NetworkStub, MemKVStore>;

pub(crate) struct Node {
    pub(crate) keypair: ConsensusKeypair,
    pub(crate) chain: Arc<MockChain>,
    /// The test's handle on this node's inbox.
    pub(crate) network: NetworkStub,
    pub(crate) kv_store: MemKVStore,
    pub(crate) actor: TestActor,
    /// Everything the actor published.
    pub(crate) events: Receiver<Event>,
}

pub(crate) struct Cluster {
    pub(crate) nodes: Vec<Node>,
    pub(crate) committee: Committee,
    committee_chain: Arc<MockCommitteeChain>,
    lemma2_activation_height: BlockHeight,
}

pub(crate) fn keypairs(n: usize) -> Vec<ConsensusKeypair> {
    (0..n)
        .map(|_| ConsensusKeypair::generate(&mut OsRng).unwrap())
        .collect()
}

pub(crate) fn configuration(
    keypair: &ConsensusKeypair,
    peer_id: PeerID,
    lemma2_activation_height: BlockHeight,
) -> Configuration {
    Configuration::builder()
        .chain_id(CHAIN_ID)
        .keys(vec![keypair.clone()])
        .timeslot_duration(TIMESLOT)
        .lemma2_activation_height(lemma2_activation_height)
        .peer_id(peer_id)
        .build()
}

impl Cluster {
    pub(crate) fn new(n: usize, lemma2_activation_height: BlockHeight) -> Cluster {
        let keypairs = keypairs(n);
        let committee = Committee::new(keypairs.iter().map(|k| k.validator_key()).collect());
        let committee_chain = Arc::new(MockCommitteeChain::new(CHAIN_ID, committee.clone()));
        let networks = mock_network((0..n).map(|i| PeerID::new(format!("node-{}", i))));

        let nodes = keypairs
            .into_iter()
            .zip(networks)
            .map(|(keypair, network)| {
                let chain = Arc::new(MockChain::new(CHAIN_ID));
                let kv_store = MemKVStore::new();
                let (event_publisher, events) = mpsc::channel();
                let actor = Actor::new(
                    configuration(&keypair, network.peer_id().clone(), lemma2_activation_height),
                    chain.clone(),
                    committee_chain.clone(),
                    network.clone(),
                    kv_store.clone(),
                    Some(event_publisher),
                )
                .unwrap();
                Node {
                    keypair,
                    chain,
                    network,
                    kv_store,
                    actor,
                    events,
                }
            })
            .collect();

        Cluster {
            nodes,
            committee,
            committee_chain,
            lemma2_activation_height,
        }
    }

    /// Index of the node that leads `timeslot`.
    pub(crate) fn leader_of(&self, timeslot: u64) -> usize {
        let leader = select_leader(TimeSlot::new(timeslot), &self.committee).unwrap();
        self.nodes
            .iter()
            .position(|node| node.keypair.id() == leader)
            .unwrap()
    }

    pub(crate) fn tick(&mut self, timeslot: u64) {
        for node in &mut self.nodes {
            node.actor.on_tick(at(timeslot));
        }
    }

    /// Deliver every queued message for which `filter(recipient, message)` holds, and drop the rest.
    /// Returns how many messages were dequeued.
    pub(crate) fn deliver(&mut self, filter: &impl Fn(usize, &BftMessage) -> bool) -> usize {
        let mut dequeued = 0;
        for (index, node) in self.nodes.iter_mut().enumerate() {
            while let Some((origin, message)) = node.network.recv() {
                dequeued += 1;
                if filter(index, &message) {
                    node.actor.on_message(origin, message);
                }
            }
        }
        dequeued
    }

    /// Tick and deliver until the committee goes quiet in `timeslot`.
    pub(crate) fn run(&mut self, timeslot: u64, filter: impl Fn(usize, &BftMessage) -> bool) {
        for _ in 0..10 {
            self.tick(timeslot);
            if self.deliver(&filter) == 0 {
                return;
            }
        }
    }

    /// Replace a node's actor by a new one over the same store, as if its process restarted.
    pub(crate) fn restart(&mut self, index: usize) {
        let node = &mut self.nodes[index];
        let (event_publisher, events) = mpsc::channel();
        node.events = events;
        node.actor = Actor::new(
            configuration(
                &node.keypair,
                node.network.peer_id().clone(),
                self.lemma2_activation_height,
            ),
            node.chain.clone(),
            self.committee_chain.clone(),
            node.network.clone(),
            node.kv_store.clone(),
            Some(event_publisher),
        )
        .unwrap();
    }

    /// Take every event node `index` published so far.
    pub(crate) fn events(&self, index: usize) -> Vec<Event> {
        self.nodes[index].events.try_iter().collect()
    }
}

pub(crate) fn everything(_: usize, _: &BftMessage) -> bool {
    true
}
