//! The persona services.
//!
//! Each persona owns exactly one [GroupDb](crate::GroupDb) instance —
//! except the leaf PmidNode, which owns a
//! [DiskBasedStore](crate::DiskBasedStore) instead — and exposes a
//! synchronous `handle_message` the demultiplexer dispatches into.

pub mod data_manager;
pub mod maid_manager;
pub mod pmid_manager;
pub mod pmid_node;
pub mod version_handler;

pub use data_manager::DataManagerService;
pub use maid_manager::MaidManagerService;
pub use pmid_manager::PmidManagerService;
pub use pmid_node::PmidNodeService;
pub use version_handler::VersionHandlerService;
