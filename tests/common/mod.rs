pub(crate) mod cluster;

pub(crate) mod kv_store;

pub(crate) mod logging;

pub(crate) mod mock_chain;

pub(crate) mod network;
