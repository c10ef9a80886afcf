//! A keeper for a permissioned guardian network.
//!
//! Every guardian node runs one keeper. Keepers agree, without talking to each other, on which guardian is
//! on duty in each epoch ([leader]), and only that guardian's keeper sends the scheduled maintenance
//! transactions its [tasks](types::task) describe ([tx]). Everything else a keeper does (following the
//! committee, reporting its status) happens on every node. Start one with
//! [`KeeperSpec`](keeper::KeeperSpec).

pub mod types;

pub mod epoch_clock;

pub mod management;

pub mod leader;

pub mod scheduler;

pub mod chain;

pub mod signer;

pub mod tx;

pub mod events;

pub(crate) mod event_bus;
pub use event_bus::HandlerPtr;

pub mod bi_sink;

pub(crate) mod logging;

pub mod status;

pub mod config;

pub mod keeper;
