//! Data naming shared by the persona record keys.

use bytes::BufMut;
use vault2_api::{
    wire, GroupKey, GroupName, Id, VaultError, VaultResult, ID_LEN,
};

/// The kind of a named datum. Wire tags are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DataKind {
    /// Content-addressed, immutable chunk data.
    Immutable = 0,
    /// Owner-addressed, mutable structured data.
    Mutable = 1,
    /// A stored public key element.
    PublicKey = 2,
}

impl DataKind {
    /// Decode a wire tag.
    pub fn from_wire(tag: u8) -> VaultResult<Self> {
        match tag {
            0 => Ok(Self::Immutable),
            1 => Ok(Self::Mutable),
            2 => Ok(Self::PublicKey),
            _ => Err(VaultError::invalid_message(format!(
                "unknown data kind {tag}"
            ))),
        }
    }
}

/// The variant-typed name of a datum: a kind tag plus a 512-bit name.
///
/// Serialised as `tag || name` everywhere, which is also fixed-width, so
/// the same bytes serve as the record key's storage form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataId {
    /// Which data type the name belongs to.
    pub kind: DataKind,
    /// The 512-bit data name.
    pub name: Id,
}

/// Byte width of an encoded [DataId].
pub const DATA_ID_WIDTH: usize = 1 + ID_LEN;

impl DataId {
    /// Construct a data id.
    pub fn new(kind: DataKind, name: Id) -> Self {
        Self { kind, name }
    }

    /// Append the stable `tag || name` form.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind as u8);
        wire::put_id(buf, &self.name);
    }

    /// Parse the stable `tag || name` form.
    pub fn decode_from(buf: &mut bytes::Bytes) -> VaultResult<Self> {
        let kind = DataKind::from_wire(wire::get_u8(buf, "data kind")?)?;
        let name = wire::get_id(buf, "data name")?;
        Ok(Self { kind, name })
    }
}

impl std::fmt::Display for DataId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.name)
    }
}

/// The record key every group-holding persona uses: the owning group plus
/// the [DataId] discriminator.
///
/// The original design repeated this key shape once per persona; the shape
/// is identical everywhere so one type serves them all.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    group_name: GroupName,
    data: DataId,
}

impl RecordKey {
    /// Construct a key for `data` under `group_name`.
    pub fn new(group_name: GroupName, data: DataId) -> Self {
        Self { group_name, data }
    }

    /// The data discriminator.
    pub fn data(&self) -> &DataId {
        &self.data
    }
}

impl GroupKey for RecordKey {
    fn group_name(&self) -> &GroupName {
        &self.group_name
    }

    fn to_fixed_width_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::with_capacity(DATA_ID_WIDTH);
        self.data.encode_into(&mut buf);
        buf.freeze()
    }

    fn from_fixed_width_bytes(
        group_name: GroupName,
        bytes: &[u8],
    ) -> VaultResult<Self> {
        if bytes.len() != DATA_ID_WIDTH {
            return Err(VaultError::invalid_message(format!(
                "record key must be {DATA_ID_WIDTH} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = bytes::Bytes::copy_from_slice(bytes);
        let data = DataId::decode_from(&mut buf)?;
        Ok(Self { group_name, data })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(fill: u8) -> Id {
        Id(bytes::Bytes::from(vec![fill; ID_LEN]))
    }

    #[test]
    fn data_id_round_trip() {
        let data = DataId::new(DataKind::Mutable, id(9));
        let mut buf = bytes::BytesMut::new();
        data.encode_into(&mut buf);
        assert_eq!(DATA_ID_WIDTH, buf.len());
        let mut b = buf.freeze();
        assert_eq!(data, DataId::decode_from(&mut b).unwrap());
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut b = bytes::Bytes::from(vec![7u8; DATA_ID_WIDTH]);
        assert!(DataId::decode_from(&mut b).is_err());
    }

    #[test]
    fn record_key_fixed_width_round_trip() {
        let group = GroupName::from(id(1));
        let key = RecordKey::new(
            group.clone(),
            DataId::new(DataKind::Immutable, id(2)),
        );
        let fixed = key.to_fixed_width_bytes();
        assert_eq!(DATA_ID_WIDTH, fixed.len());
        assert_eq!(
            key,
            RecordKey::from_fixed_width_bytes(group, &fixed).unwrap(),
        );
    }
}
