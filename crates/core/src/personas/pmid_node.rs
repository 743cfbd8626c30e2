//! The PmidNode persona: a storage node holding chunk payloads on disk.
//!
//! The leaf of every put chain. No group database here; the node owns a
//! [DiskBasedStore] and answers to its PmidManager group, reporting its
//! health back to them.

use crate::service::{authorised, quorum_ready, single_ready};
use crate::{
    Accumulator, AccumulatorConfig, ActiveQueue, DataId, DiskBasedStore,
};
use std::path::Path;
use std::sync::Arc;
use vault2_api::{
    wire, BoxFut, Destination, GroupName, MessageSource,
    MessageWrapper, NodeId, Persona, VaultResult,
};
use vault2_api::builder::Builder;

/// PmidNode configuration types.
pub mod config {
    /// Configuration parameters for [PmidNodeService](super::PmidNodeService).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct PmidNodeConfig {
        /// Bytes of disk this node offers the network. Default: 1 GiB.
        pub capacity: u64,
    }

    impl Default for PmidNodeConfig {
        fn default() -> Self {
            Self {
                capacity: 1 << 30,
            }
        }
    }

    impl vault2_api::config::ModConfig for PmidNodeConfig {}
}

pub use config::PmidNodeConfig;

/// Chunks are unversioned elements in the blob store.
const CHUNK_VERSION: u64 = 0;

/// Hands a chunk to the node for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPutChunk {
    /// The chunk's name.
    pub data: DataId,
    /// The chunk payload.
    pub content: bytes::Bytes,
}

impl ActionPutChunk {
    /// Wire action id.
    pub const ACTION_ID: u8 = 16;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        wire::put_bytes(&mut buf, &self.content);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
            content: wire::get_bytes(&mut bytes, "chunk content")?,
        })
    }
}

/// Removes a chunk from the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDeleteChunk {
    /// The chunk's name.
    pub data: DataId,
}

impl ActionDeleteChunk {
    /// Wire action id.
    pub const ACTION_ID: u8 = 17;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
        })
    }
}

/// Asks the node for a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGetChunk {
    /// The chunk's name.
    pub data: DataId,
}

impl ActionGetChunk {
    /// Wire action id.
    pub const ACTION_ID: u8 = 18;
    /// Wire action id of the reply.
    pub const RESPONSE_ID: u8 = 19;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
        })
    }
}

/// The PmidNode service.
#[derive(Debug)]
pub struct PmidNodeService {
    node_id: NodeId,
    store: DiskBasedStore,
    accumulator: Accumulator,
    active: Arc<ActiveQueue>,
    config: PmidNodeConfig,
}

impl PmidNodeService {
    /// Construct the service, owning a blob store under `root`.
    pub fn new(
        root: &Path,
        builder: &Builder,
        node_id: NodeId,
    ) -> VaultResult<Self> {
        let accumulator: AccumulatorConfig =
            builder.config.get_module_config("accumulator")?;
        let config: PmidNodeConfig =
            builder.config.get_module_config("pmid_node")?;
        Ok(Self {
            node_id,
            store: DiskBasedStore::new(&root.join("pmid_node"))?,
            accumulator: Accumulator::new(accumulator),
            active: Arc::new(ActiveQueue::new(
                "pmid_node",
                builder.sender.clone(),
            )),
            config,
        })
    }

    /// The blob store, for direct inspection.
    pub fn store(&self) -> &DiskBasedStore {
        &self.store
    }

    /// Dispatch one inbound message.
    pub fn handle_message(
        &self,
        wrapper: MessageWrapper,
        sender: &MessageSource,
        _receiver: &NodeId,
    ) -> VaultResult<()> {
        match wrapper.action_tag {
            ActionPutChunk::ACTION_ID => {
                let action =
                    ActionPutChunk::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::PmidNode,
                    sender,
                    &[Persona::PmidManager],
                ) || !quorum_ready(
                    Persona::PmidNode,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                let write = self.store.store(
                    &action.data,
                    CHUNK_VERSION,
                    action.content,
                );
                tokio::spawn(async move {
                    if let Err(error) = write.await {
                        tracing::error!(?error, "failed to store chunk");
                    }
                });
                Ok(())
            }
            ActionDeleteChunk::ACTION_ID => {
                let action =
                    ActionDeleteChunk::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::PmidNode,
                    sender,
                    &[Persona::PmidManager],
                ) || !quorum_ready(
                    Persona::PmidNode,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                let removal =
                    self.store.delete(&action.data, CHUNK_VERSION);
                tokio::spawn(async move {
                    if let Err(error) = removal.await {
                        tracing::warn!(?error, "failed to delete chunk");
                    }
                });
                Ok(())
            }
            ActionGetChunk::ACTION_ID => {
                let action =
                    ActionGetChunk::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::PmidNode,
                    sender,
                    &[Persona::DataManager, Persona::DataGetter],
                ) || !single_ready(
                    Persona::PmidNode,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                let read = self.store.fetch(&action.data, CHUNK_VERSION);
                let active = self.active.clone();
                let to = sender.clone();
                let message_id = wrapper.message_id;
                tokio::spawn(async move {
                    match read.await {
                        Ok(content) => {
                            drop(active.enqueue(
                                Destination::Node(to.node.clone()),
                                MessageWrapper {
                                    message_id,
                                    persona: to.persona,
                                    action_tag: ActionGetChunk::RESPONSE_ID,
                                    payload: content,
                                },
                            ));
                        }
                        Err(error) => {
                            tracing::debug!(?error, "chunk fetch failed");
                        }
                    }
                });
                Ok(())
            }
            tag => {
                tracing::warn!(tag, "pmid node ignoring unknown action");
                Ok(())
            }
        }
    }

    /// Report current health to this node's PmidManager group.
    pub fn report_health(&self) -> BoxFut<'static, VaultResult<()>> {
        let used = self.store.used_space();
        let capacity = self.config.capacity;
        let active = self.active.clone();
        let group = GroupName::from(self.node_id.clone());
        Box::pin(async move {
            let available = capacity.saturating_sub(used.await?) as i64;
            let action =
                crate::personas::pmid_manager::ActionSetPmidHealth {
                    disk_available_size: available,
                };
            active
                .enqueue(
                    Destination::Group(group),
                    MessageWrapper {
                        message_id: rand::random(),
                        persona: Persona::PmidManager,
                        action_tag:
                            crate::personas::pmid_manager::ActionSetPmidHealth::ACTION_ID,
                        payload: action.to_bytes(),
                    },
                )
                .await
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vault2_test_utils::{fill_id, fill_node, CaptureSender};

    fn builder(capture: &std::sync::Arc<CaptureSender>) -> Builder {
        Builder {
            config: Default::default(),
            sender: capture.clone(),
        }
    }

    fn data() -> DataId {
        DataId::new(crate::DataKind::Immutable, fill_id(9))
    }

    fn put_wrapper(message_id: u64) -> MessageWrapper {
        MessageWrapper {
            message_id,
            persona: Persona::PmidNode,
            action_tag: ActionPutChunk::ACTION_ID,
            payload: ActionPutChunk {
                data: data(),
                content: bytes::Bytes::from_static(b"chunk-bytes"),
            }
            .to_bytes(),
        }
    }

    async fn wait_for_count(service: &PmidNodeService, count: usize) {
        for _ in 0..100 {
            if service.store.get_file_count().await.unwrap() == count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("store never reached {count} files");
    }

    #[tokio::test]
    async fn put_stores_after_quorum() {
        let capture = CaptureSender::new();
        let dir = tempfile::tempdir().unwrap();
        let service = PmidNodeService::new(
            dir.path(),
            &builder(&capture),
            fill_node(5),
        )
        .unwrap();
        for fill in 1..=2u8 {
            let source = MessageSource {
                persona: Persona::PmidManager,
                node: fill_node(fill),
            };
            service
                .handle_message(put_wrapper(3), &source, &fill_node(5))
                .unwrap();
        }
        assert_eq!(0, service.store.get_file_count().await.unwrap());

        let source = MessageSource {
            persona: Persona::PmidManager,
            node: fill_node(3),
        };
        service
            .handle_message(put_wrapper(3), &source, &fill_node(5))
            .unwrap();
        wait_for_count(&service, 1).await;
        assert_eq!(
            bytes::Bytes::from_static(b"chunk-bytes"),
            service.store.fetch(&data(), 0).await.unwrap(),
        );
    }

    #[tokio::test]
    async fn get_replies_with_content() {
        let capture = CaptureSender::new();
        let dir = tempfile::tempdir().unwrap();
        let service = PmidNodeService::new(
            dir.path(),
            &builder(&capture),
            fill_node(5),
        )
        .unwrap();
        service
            .store
            .store(&data(), 0, bytes::Bytes::from_static(b"chunk-bytes"))
            .await
            .unwrap();

        let get = MessageWrapper {
            message_id: 4,
            persona: Persona::PmidNode,
            action_tag: ActionGetChunk::ACTION_ID,
            payload: ActionGetChunk { data: data() }.to_bytes(),
        };
        let asker = MessageSource {
            persona: Persona::DataManager,
            node: fill_node(0x21),
        };
        service.handle_message(get, &asker, &fill_node(5)).unwrap();

        for _ in 0..100 {
            if !capture.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let sent = capture.sent();
        assert_eq!(1, sent.len());
        let (destination, reply) = &sent[0];
        assert_eq!(&Destination::Node(fill_node(0x21)), destination);
        assert_eq!(ActionGetChunk::RESPONSE_ID, reply.action_tag);
        assert_eq!(bytes::Bytes::from_static(b"chunk-bytes"), reply.payload);
    }

    #[tokio::test]
    async fn health_report_targets_own_managers() {
        let capture = CaptureSender::new();
        let dir = tempfile::tempdir().unwrap();
        let service = PmidNodeService::new(
            dir.path(),
            &builder(&capture),
            fill_node(5),
        )
        .unwrap();
        service.report_health().await.unwrap();
        let sent = capture.sent();
        assert_eq!(1, sent.len());
        let (destination, wrapper) = &sent[0];
        assert_eq!(
            &Destination::Group(vault2_test_utils::fill_group(5)),
            destination,
        );
        assert_eq!(Persona::PmidManager, wrapper.persona);
    }

    #[test]
    fn actions_round_trip() {
        let put = ActionPutChunk {
            data: data(),
            content: bytes::Bytes::from_static(b"abc"),
        };
        assert_eq!(put, ActionPutChunk::from_bytes(put.to_bytes()).unwrap());
        let delete = ActionDeleteChunk { data: data() };
        assert_eq!(
            delete,
            ActionDeleteChunk::from_bytes(delete.to_bytes()).unwrap(),
        );
        let get = ActionGetChunk { data: data() };
        assert_eq!(get, ActionGetChunk::from_bytes(get.to_bytes()).unwrap());
    }
}
