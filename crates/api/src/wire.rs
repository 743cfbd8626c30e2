//! Little-endian wire codec helpers.
//!
//! Every byte format the vault emits or consumes (message wrappers, action
//! bodies, stored values, version-tree snapshots) is a fixed little-endian
//! layout: integer fields little-endian, variable-length fields prefixed
//! with a u32 length. These layouts are relied on by the deployed network
//! and must stay byte-stable.

use crate::{Id, NodeId, VaultError, VaultResult, ID_LEN};
use bytes::{Buf, BufMut};

fn short<T>(what: &str) -> VaultResult<T> {
    Err(VaultError::invalid_message(format!("truncated {what}")))
}

/// Read a u8, erroring on underflow.
pub fn get_u8(buf: &mut impl Buf, what: &str) -> VaultResult<u8> {
    if buf.remaining() < 1 {
        return short(what);
    }
    Ok(buf.get_u8())
}

/// Read a little-endian u16, erroring on underflow.
pub fn get_u16_le(buf: &mut impl Buf, what: &str) -> VaultResult<u16> {
    if buf.remaining() < 2 {
        return short(what);
    }
    Ok(buf.get_u16_le())
}

/// Read a little-endian u32, erroring on underflow.
pub fn get_u32_le(buf: &mut impl Buf, what: &str) -> VaultResult<u32> {
    if buf.remaining() < 4 {
        return short(what);
    }
    Ok(buf.get_u32_le())
}

/// Read a little-endian u64, erroring on underflow.
pub fn get_u64_le(buf: &mut impl Buf, what: &str) -> VaultResult<u64> {
    if buf.remaining() < 8 {
        return short(what);
    }
    Ok(buf.get_u64_le())
}

/// Read a little-endian i64, erroring on underflow.
pub fn get_i64_le(buf: &mut impl Buf, what: &str) -> VaultResult<i64> {
    if buf.remaining() < 8 {
        return short(what);
    }
    Ok(buf.get_i64_le())
}

/// Write a u32-length-prefixed byte field.
pub fn put_bytes(buf: &mut impl BufMut, b: &[u8]) {
    buf.put_u32_le(b.len() as u32);
    buf.put_slice(b);
}

/// Read a u32-length-prefixed byte field.
pub fn get_bytes(
    buf: &mut bytes::Bytes,
    what: &str,
) -> VaultResult<bytes::Bytes> {
    let len = get_u32_le(buf, what)? as usize;
    if buf.remaining() < len {
        return short(what);
    }
    Ok(buf.split_to(len))
}

/// Write a fixed [ID_LEN]-byte identity, unprefixed.
pub fn put_id(buf: &mut impl BufMut, id: &Id) {
    debug_assert_eq!(ID_LEN, id.len());
    buf.put_slice(id);
}

/// Read a fixed [ID_LEN]-byte identity.
pub fn get_id(buf: &mut bytes::Bytes, what: &str) -> VaultResult<Id> {
    if buf.remaining() < ID_LEN {
        return short(what);
    }
    Ok(Id(buf.split_to(ID_LEN)))
}

/// Read a fixed-width [NodeId].
pub fn get_node_id(
    buf: &mut bytes::Bytes,
    what: &str,
) -> VaultResult<NodeId> {
    Ok(NodeId(get_id(buf, what)?))
}
