//! Types dealing with data identity.
//!
//! Every name in the network is an opaque 512-bit identity: node addresses,
//! account (group) names, and the data names embedded in record keys. The
//! overlay partitions the identity space by XOR distance, so the ordering
//! helpers here are the basis of all close-group decisions.

use crate::{VaultError, VaultResult};

macro_rules! imp_deref {
    ($i:ty, $t:ty) => {
        impl std::ops::Deref for $i {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

macro_rules! imp_from {
    ($a:ty, $b:ty, $i:ident => $e:expr) => {
        impl From<$b> for $a {
            fn from($i: $b) -> Self {
                $e
            }
        }
    };
}

/// The byte length of every identity in the network.
pub const ID_LEN: usize = 64;

/// Base identity type meant for newtyping.
/// You probably want [NodeId] or [GroupName].
///
/// The bytes are ONLY the actual 512-bit name being tracked, without prefix
/// or suffix.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Id(#[serde(with = "crate::serde_bytes_base64")] pub bytes::Bytes);

imp_deref!(Id, bytes::Bytes);
imp_from!(Id, bytes::Bytes, b => Id(b));

impl Id {
    /// Construct an identity from exactly [ID_LEN] bytes.
    pub fn from_slice(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() != ID_LEN {
            return Err(VaultError::invalid_message(format!(
                "identity must be {ID_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes::Bytes::copy_from_slice(bytes)))
    }

    /// Compare the XOR distance from `self` to `target` against the XOR
    /// distance from `other` to `target`.
    ///
    /// XOR of equal-length big-endian byte strings compares byte-wise, so no
    /// intermediate big integer is needed.
    pub fn cmp_distance(
        &self,
        other: &Id,
        target: &Id,
    ) -> std::cmp::Ordering {
        for i in 0..self.0.len().min(other.0.len()).min(target.0.len()) {
            let a = self.0[i] ^ target.0[i];
            let b = other.0[i] ^ target.0[i];
            if a != b {
                return a.cmp(&b);
            }
        }
        std::cmp::Ordering::Equal
    }
}

/// The default display encodes a short base64 prefix of the id.
/// This makes debugging so much easier than rust's default of decimal array.
fn display(
    b: &bytes::Bytes,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    use base64::prelude::*;
    let enc = BASE64_URL_SAFE_NO_PAD.encode(b);
    f.write_str(&enc[..12.min(enc.len())])
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display(&self.0, f)
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display(&self.0, f)
    }
}

/// Identifies a node on the routing overlay.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub Id);

imp_deref!(NodeId, Id);
imp_from!(NodeId, bytes::Bytes, b => NodeId(Id(b)));
imp_from!(NodeId, Id, b => NodeId(b));

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display(&self.0 .0, f)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display(&self.0 .0, f)
    }
}

/// Identifies a group (account) held by a close-group of vaults.
///
/// A group name is the identity of the account owner, so every group name is
/// also an address on the overlay.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct GroupName(pub Id);

imp_deref!(GroupName, Id);
imp_from!(GroupName, bytes::Bytes, b => GroupName(Id(b)));
imp_from!(GroupName, Id, b => GroupName(b));

impl From<GroupName> for NodeId {
    fn from(g: GroupName) -> Self {
        NodeId(g.0)
    }
}

impl From<NodeId> for GroupName {
    fn from(n: NodeId) -> Self {
        GroupName(n.0)
    }
}

impl std::fmt::Display for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display(&self.0 .0, f)
    }
}

impl std::fmt::Debug for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display(&self.0 .0, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(fill: u8) -> Id {
        Id(bytes::Bytes::from(vec![fill; ID_LEN]))
    }

    #[test]
    fn from_slice_enforces_length() {
        assert!(Id::from_slice(&[0; ID_LEN]).is_ok());
        assert!(Id::from_slice(&[0; ID_LEN - 1]).is_err());
        assert!(Id::from_slice(&[0; ID_LEN + 1]).is_err());
    }

    #[test]
    fn distance_to_self_is_least() {
        let target = id(0x5a);
        let other = id(0x00);
        assert_eq!(
            std::cmp::Ordering::Less,
            target.cmp_distance(&other, &target),
        );
        assert_eq!(
            std::cmp::Ordering::Equal,
            target.cmp_distance(&target, &target),
        );
    }

    #[test]
    fn distance_orders_by_leading_bytes() {
        let target = id(0x00);
        let near = id(0x01);
        let far = id(0x80);
        assert_eq!(
            std::cmp::Ordering::Less,
            near.cmp_distance(&far, &target),
        );
        assert_eq!(
            std::cmp::Ordering::Greater,
            far.cmp_distance(&near, &target),
        );
    }

    #[test]
    fn id_serde_round_trip() {
        let i = id(0xab);
        let enc = serde_json::to_string(&i).unwrap();
        let dec: Id = serde_json::from_str(&enc).unwrap();
        assert_eq!(i, dec);
    }

    #[test]
    fn display_is_short() {
        assert_eq!(12, format!("{}", id(7)).len());
    }
}
