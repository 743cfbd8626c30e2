//! The outbound half of the routing layer.

use crate::{BoxFut, GroupName, MessageWrapper, NodeId, VaultResult};
use std::sync::Arc;

/// Where an outbound persona message is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A single node.
    Node(NodeId),
    /// The close group of an identity; the overlay fans out to every
    /// current holder.
    Group(GroupName),
}

/// The routing layer's send surface, supplied by the embedder.
///
/// The returned future tracks the message down to the overlay's transport;
/// completion means handed off, not delivered.
pub trait RoutingSender: 'static + Send + Sync + std::fmt::Debug {
    /// Send a wrapper towards a destination.
    fn send(
        &self,
        destination: Destination,
        wrapper: MessageWrapper,
    ) -> BoxFut<'static, VaultResult<()>>;
}

/// Trait-object [RoutingSender].
pub type DynRoutingSender = Arc<dyn RoutingSender>;
