#![deny(missing_docs)]
//! Utilities for testing vault2 crates.

use std::sync::{Arc, Mutex};
use vault2_api::{
    BoxFut, Destination, DynRoutingSender, GroupName, Id, MessageWrapper,
    NodeId, RoutingSender, VaultResult, ID_LEN,
};

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// A random 512-bit identity.
pub fn random_id() -> Id {
    use rand::RngCore;
    let mut bytes = vec![0u8; ID_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    Id(bytes::Bytes::from(bytes))
}

/// An identity with every byte set to `fill`; handy for readable fixtures.
pub fn fill_id(fill: u8) -> Id {
    Id(bytes::Bytes::from(vec![fill; ID_LEN]))
}

/// A [NodeId] with every byte set to `fill`.
pub fn fill_node(fill: u8) -> NodeId {
    NodeId::from(fill_id(fill))
}

/// A [GroupName] with every byte set to `fill`.
pub fn fill_group(fill: u8) -> GroupName {
    GroupName::from(fill_id(fill))
}

/// A [RoutingSender] that records everything it is asked to send.
#[derive(Debug, Default)]
pub struct CaptureSender {
    sent: Mutex<Vec<(Destination, MessageWrapper)>>,
}

impl CaptureSender {
    /// Construct a capture sender ready to hand to a service.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<(Destination, MessageWrapper)> {
        self.sent.lock().expect("capture mutex poisoned").clone()
    }

    /// Drop the recorded history.
    pub fn clear(&self) {
        self.sent.lock().expect("capture mutex poisoned").clear();
    }
}

impl RoutingSender for CaptureSender {
    fn send(
        &self,
        destination: Destination,
        wrapper: MessageWrapper,
    ) -> BoxFut<'static, VaultResult<()>> {
        self.sent
            .lock()
            .expect("capture mutex poisoned")
            .push((destination, wrapper));
        Box::pin(async { Ok(()) })
    }
}

/// Coerce an `Arc<CaptureSender>` into the trait object services expect.
pub fn capture_as_sender(capture: &Arc<CaptureSender>) -> DynRoutingSender {
    capture.clone()
}
