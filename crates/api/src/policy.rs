//! The group policy seam.
//!
//! The group database stores accounts for whichever persona owns it; what
//! differs between personas is the shape of keys, values and metadata, and
//! two behaviours: how a commit resolves a group that does not exist yet,
//! and what happens after every commit. Those differences live behind
//! [GroupPolicy] so the database itself stays persona-generic.

use crate::{GroupName, VaultError, VaultResult};

/// What a record-level commit asked the database to do with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbAction {
    /// Persist the (possibly new) value under the key.
    Put,
    /// Remove any value stored under the key.
    Delete,
}

/// A record key owned by one group.
///
/// The fixed-width form excludes the group name (the storage layer replaces
/// it with the group-id prefix) and must be the same length for every key of
/// the persona so that a prefix range scan enumerates exactly one group.
pub trait GroupKey:
    Clone + Eq + Ord + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static
{
    /// The group this key belongs to.
    fn group_name(&self) -> &GroupName;

    /// The fixed-width storage form, excluding the group name.
    fn to_fixed_width_bytes(&self) -> bytes::Bytes;

    /// Rebuild a key from its group and fixed-width storage form.
    fn from_fixed_width_bytes(
        group_name: GroupName,
        bytes: &[u8],
    ) -> VaultResult<Self>;
}

/// A stored record value.
///
/// A value represents ownership of a serialised blob; the database moves
/// values in and out of commits and never clones one.
pub trait GroupValue: std::fmt::Debug + Send + Sync + 'static {
    /// Serialise to the persona's stable byte form.
    fn to_bytes(&self) -> bytes::Bytes;

    /// Parse from the persona's stable byte form.
    fn from_bytes(bytes: bytes::Bytes) -> VaultResult<Self>
    where
        Self: Sized;
}

/// A group's metadata aggregate.
pub trait GroupMetadata:
    Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Serialise to the persona's stable byte form.
    fn to_bytes(&self) -> bytes::Bytes;

    /// Parse from the persona's stable byte form.
    fn from_bytes(bytes: &[u8]) -> VaultResult<Self>
    where
        Self: Sized;
}

/// The capability set a persona supplies to its group database.
pub trait GroupPolicy: 'static + Send + Sync {
    /// Tag used in logs.
    const NAME: &'static str;

    /// Record key type.
    type Key: GroupKey;
    /// Record value type.
    type Value: GroupValue;
    /// Group metadata type.
    type Metadata: GroupMetadata;

    /// Resolve a commit against a group missing from the registry.
    ///
    /// Returning metadata creates the group before the commit proceeds.
    /// The default refuses: most personas require an explicit account
    /// creation step first.
    fn find_or_create(group_name: &GroupName) -> VaultResult<Self::Metadata> {
        tracing::debug!(%group_name, persona = Self::NAME, "no creation on commit");
        Err(VaultError::NoSuchAccount)
    }

    /// Post-commit hook, fired exactly once per commit on every exit path.
    ///
    /// Returning bytes asks the database to persist them as the group's
    /// durable metadata row. The default persists nothing; metadata then
    /// lives only in the registry and travels by account transfer.
    fn update_group(
        group_name: &GroupName,
        metadata: &Self::Metadata,
    ) -> Option<bytes::Bytes> {
        let _ = (group_name, metadata);
        None
    }
}
