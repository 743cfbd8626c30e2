#![deny(missing_docs)]
//! Bounded branching version histories for vault2 structured data.
//!
//! A [StructuredDataVersions] is a tree of version names: a single root,
//! parent→child edges, and an index that increases by one along every edge.
//! Clients race each other updating the same data, so the tree tolerates
//! branches and keeps updates whose parent has not arrived yet in a bounded
//! orphan buffer. Both the number of stored versions and the number of
//! branches are capped; old history is evicted deterministically so that
//! every member of a close group holding the same puts converges on the
//! same tree.

mod version;
pub use version::*;

mod sdv;
pub use sdv::*;
