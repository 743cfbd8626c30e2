//! Machinery shared by the persona services.
//!
//! Every service runs the same pipeline per message: parse the action,
//! authorise the sender's persona, accumulate quorum evidence when the
//! sender is a close group, then apply the action as a commit. The helpers
//! here keep those steps uniform across personas.

use crate::{
    action_digest, Accumulator, ActiveQueue, AddResult, TransferInfo,
};
use vault2_api::{
    Destination, GroupPolicy, MessageSource, MessageWrapper, Persona,
};

/// Action tag carrying one group's packaged contents between holders.
/// Shared by every group-holding persona.
pub const ACCOUNT_TRANSFER_TAG: u8 = 13;

/// Verify the sender acted as one of the personas allowed to emit this
/// action. Failures are logged and the message is dropped by the caller.
pub fn authorised(
    service: Persona,
    sender: &MessageSource,
    expected: &[Persona],
) -> bool {
    if expected.contains(&sender.persona) {
        return true;
    }
    tracing::warn!(
        %service,
        sender = %sender.persona,
        from = %sender.node,
        "dropping message from unexpected source persona",
    );
    false
}

/// Offer a group-sourced message to the accumulator; true when quorum has
/// just been reached and the action should be applied now.
pub fn quorum_ready(
    service: Persona,
    accumulator: &Accumulator,
    wrapper: &MessageWrapper,
    sender: &MessageSource,
) -> bool {
    ready(service, accumulator, wrapper, sender, accumulator.quorum_size())
}

/// Offer a single-node-sourced message to the accumulator; true on the
/// first copy, false for every retransmission within the entry TTL.
pub fn single_ready(
    service: Persona,
    accumulator: &Accumulator,
    wrapper: &MessageWrapper,
    sender: &MessageSource,
) -> bool {
    ready(service, accumulator, wrapper, sender, 1)
}

/// Enqueue one transfer message per departing account.
pub fn send_transfers<P: GroupPolicy>(
    active: &ActiveQueue,
    persona: Persona,
    transfer_info: TransferInfo<P>,
) {
    for (node, contents_list) in transfer_info {
        for contents in contents_list {
            let wrapper = MessageWrapper {
                message_id: rand::random(),
                persona,
                action_tag: ACCOUNT_TRANSFER_TAG,
                payload: contents.encode(),
            };
            drop(active.enqueue(Destination::Node(node.clone()), wrapper));
        }
    }
}

fn ready(
    service: Persona,
    accumulator: &Accumulator,
    wrapper: &MessageWrapper,
    sender: &MessageSource,
    required: usize,
) -> bool {
    let digest = action_digest(wrapper.action_tag, &wrapper.payload);
    match accumulator.add(
        wrapper.message_id,
        digest,
        sender.node.clone(),
        required,
    ) {
        AddResult::Ready => true,
        AddResult::Waiting(count) => {
            tracing::trace!(
                %service,
                message_id = wrapper.message_id,
                count,
                "waiting for quorum",
            );
            false
        }
        AddResult::AlreadyHandled => {
            tracing::trace!(
                %service,
                message_id = wrapper.message_id,
                "duplicate of an already handled message",
            );
            false
        }
    }
}
