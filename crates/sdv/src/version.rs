//! Version naming.

use bytes::BufMut;
use vault2_api::{wire, Id, VaultResult};

/// The name of one stored version: its depth in the tree and the identity
/// of the content it points at.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionName {
    /// Distance from the root; the root is index 0.
    pub index: u64,
    /// Identity of the version's content.
    pub id: Id,
}

impl VersionName {
    /// Construct a version name.
    pub fn new(index: u64, id: Id) -> Self {
        Self { index, id }
    }

    /// Append the stable wire form: `index: u64 le || id`.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.index);
        wire::put_id(buf, &self.id);
    }

    /// Parse the stable wire form.
    pub fn decode_from(buf: &mut bytes::Bytes) -> VaultResult<Self> {
        let index = wire::get_u64_le(buf, "version index")?;
        let id = wire::get_id(buf, "version id")?;
        Ok(Self { index, id })
    }

    /// Ordering used wherever eviction needs "the oldest first": smallest
    /// index, ties broken by id ascending.
    pub fn age_key(&self) -> (u64, &Id) {
        (self.index, &self.id)
    }
}

impl std::fmt::Debug for VersionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}:{}", self.index, self.id)
    }
}

impl std::fmt::Display for VersionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}:{}", self.index, self.id)
    }
}
