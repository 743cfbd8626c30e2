#![deny(missing_docs)]
//! Reference implementations of the vault2 personas and the group database
//! they store their accounts in.
//!
//! The flow through this crate mirrors the flow through a running vault:
//! the routing layer hands messages to the [Demultiplexer], which fans them
//! out to one persona service per destination tag; a service authorises the
//! sender, accumulates quorum evidence, and applies the message's action as
//! a commit on its [GroupDb]; the group database keeps the account registry
//! in memory and every record in a durable ordered byte store behind
//! [Backend].

pub mod fixed_width;

mod backend;
pub use backend::*;

mod data;
pub use data::*;

mod group_db;
pub use group_db::*;

mod accumulator;
pub use accumulator::*;

mod active;
pub use active::*;

pub mod service;

pub mod personas;

mod demux;
pub use demux::*;

mod disk_store;
pub use disk_store::*;
