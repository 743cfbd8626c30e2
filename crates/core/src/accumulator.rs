//! Quorum accumulation for persona messages.
//!
//! Every member of a sending close-group transmits the same logical
//! message, and a receiving service must apply the action exactly once,
//! only after enough distinct senders agree. The accumulator collects that
//! evidence keyed by `(message_id, action digest)`; keying on the digest
//! means a sender retransmitting a different action under a recycled
//! message id cannot pollute someone else's quorum.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;
use vault2_api::{NodeId, Timestamp};

/// Digest identifying an action's exact serialised form.
pub type ActionDigest = [u8; 32];

/// Compute the digest of an action as carried in a message wrapper.
pub fn action_digest(action_tag: u8, payload: &[u8]) -> ActionDigest {
    let mut hasher = Sha256::new();
    hasher.update([action_tag]);
    hasher.update(payload);
    hasher.finalize().into()
}

/// Accumulator configuration types.
pub mod config {
    /// Configuration parameters for [Accumulator](super::Accumulator).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct AccumulatorConfig {
        /// How many distinct senders must agree before an action is
        /// released for application. Default: 3 (of a close group of 4).
        pub quorum_size: usize,

        /// Maximum number of pending entries. When full, the oldest entry
        /// is evicted. Default: 1024.
        pub capacity: usize,

        /// Seconds an entry may wait for quorum before expiring.
        /// Default: 60s.
        pub entry_ttl_s: u32,
    }

    impl Default for AccumulatorConfig {
        fn default() -> Self {
            Self {
                quorum_size: 3,
                capacity: 1024,
                entry_ttl_s: 60,
            }
        }
    }

    impl AccumulatorConfig {
        /// Get the entry TTL as a [std::time::Duration].
        pub fn entry_ttl(&self) -> std::time::Duration {
            std::time::Duration::from_secs(self.entry_ttl_s as u64)
        }
    }

    impl vault2_api::config::ModConfig for AccumulatorConfig {}
}

pub use config::AccumulatorConfig;

/// The outcome of offering one sender's copy of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// Not enough senders agree yet; holds the current count.
    Waiting(usize),
    /// Quorum just reached: apply the action now. Returned exactly once
    /// per entry.
    Ready,
    /// Quorum was already reached earlier; drop this copy.
    AlreadyHandled,
}

#[derive(Debug)]
struct Entry {
    first_seen: Timestamp,
    senders: BTreeSet<NodeId>,
    handled: bool,
}

/// A bounded, TTL'd map collecting quorum evidence per message.
#[derive(Debug)]
pub struct Accumulator {
    quorum_size: usize,
    capacity: usize,
    entry_ttl: Duration,
    inner: Mutex<BTreeMap<(u64, ActionDigest), Entry>>,
}

impl Accumulator {
    /// Construct an accumulator from its config.
    pub fn new(config: AccumulatorConfig) -> Self {
        Self {
            quorum_size: config.quorum_size.max(1),
            capacity: config.capacity.max(1),
            entry_ttl: config.entry_ttl(),
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// The configured agreement threshold for group-sourced messages.
    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    /// Offer one sender's copy of `(message_id, digest)`; `required` is the
    /// number of distinct senders that must agree. Group-sourced messages
    /// pass [Accumulator::quorum_size]; messages from a single node pass 1,
    /// which turns the accumulator into a retransmission filter.
    pub fn add(
        &self,
        message_id: u64,
        digest: ActionDigest,
        sender: NodeId,
        required: usize,
    ) -> AddResult {
        let mut map = self.inner.lock().expect("accumulator mutex poisoned");
        let now = Timestamp::now();
        let ttl = self.entry_ttl;
        map.retain(|_, entry| {
            matches!(now - entry.first_seen, Ok(age) if age < ttl)
        });

        let entry = map.entry((message_id, digest)).or_insert_with(|| Entry {
            first_seen: now,
            senders: BTreeSet::new(),
            handled: false,
        });
        if entry.handled {
            return AddResult::AlreadyHandled;
        }
        entry.senders.insert(sender);
        let result = if entry.senders.len() >= required.max(1) {
            entry.handled = true;
            AddResult::Ready
        } else {
            AddResult::Waiting(entry.senders.len())
        };

        while map.len() > self.capacity {
            let oldest = map
                .iter()
                .min_by_key(|(_, entry)| entry.first_seen)
                .map(|(key, _)| *key)
                .expect("map is non-empty over capacity");
            tracing::debug!(message_id = oldest.0, "accumulator full, evicting oldest entry");
            map.remove(&oldest);
        }

        result
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("accumulator mutex poisoned").len()
    }

    /// True when no entries are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
