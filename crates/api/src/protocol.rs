//! The persona message wrapper.
//!
//! The routing layer hands the vault parsed wrappers; the vault never sees
//! raw transport frames. The wrapper layout is fixed:
//! `message_id: u64 le || persona_tag: u8 || action_tag: u8 || payload`
//! with the payload u32-length-prefixed.

use crate::{wire, NodeId, Persona, VaultError, VaultResult};
use bytes::BytesMut;

/// A parsed persona-to-persona message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageWrapper {
    /// Network-unique id of the logical request this message belongs to.
    /// Every member of a sending close-group uses the same id.
    pub message_id: u64,

    /// The persona this message is addressed to.
    pub persona: Persona,

    /// Which action the payload encodes, scoped to the destination persona.
    pub action_tag: u8,

    /// The serialised action body.
    pub payload: bytes::Bytes,
}

impl MessageWrapper {
    /// Encode to the stable wire layout.
    pub fn encode(&self) -> bytes::Bytes {
        let mut buf = BytesMut::with_capacity(14 + self.payload.len());
        use bytes::BufMut;
        buf.put_u64_le(self.message_id);
        buf.put_u8(self.persona.to_wire());
        buf.put_u8(self.action_tag);
        wire::put_bytes(&mut buf, &self.payload);
        buf.freeze()
    }

    /// Parse from the stable wire layout.
    pub fn parse(mut contents: bytes::Bytes) -> VaultResult<Self> {
        let message_id = wire::get_u64_le(&mut contents, "message_id")?;
        let tag = wire::get_u8(&mut contents, "persona_tag")?;
        let persona = Persona::from_wire(tag).ok_or_else(|| {
            VaultError::invalid_message(format!("unknown persona tag {tag}"))
        })?;
        let action_tag = wire::get_u8(&mut contents, "action_tag")?;
        let payload = wire::get_bytes(&mut contents, "payload")?;
        Ok(Self {
            message_id,
            persona,
            action_tag,
            payload,
        })
    }
}

/// The authenticated origin of a routing message, supplied by the routing
/// layer after it has verified the sender's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSource {
    /// The persona the sender was acting as.
    pub persona: Persona,

    /// The sending node.
    pub node: NodeId,
}

/// An inbound message as delivered by the routing layer.
#[derive(Debug, Clone)]
pub struct RoutingMessage {
    /// The serialised [MessageWrapper].
    pub contents: bytes::Bytes,

    /// Verified origin.
    pub sender: MessageSource,

    /// The local address the overlay routed this message to.
    pub receiver: NodeId,
}
