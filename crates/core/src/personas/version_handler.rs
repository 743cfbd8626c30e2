//! The VersionHandler persona: custodian of structured-data version
//! histories.
//!
//! One group per datum; the single record under it holds the datum's
//! [StructuredDataVersions] tree. Writes arrive with close-group quorum
//! from the client's MaidManagers; reads are answered directly to the
//! asking node.

use crate::service::{authorised, quorum_ready, single_ready, ACCOUNT_TRANSFER_TAG};
use crate::{
    Accumulator, AccumulatorConfig, ActiveQueue, Contents, DataId, GroupDb,
    RecordKey,
};
use bytes::BufMut;
use std::path::Path;
use vault2_api::{
    wire, DbAction, Destination, GroupMetadata, GroupName,
    GroupPolicy, GroupValue, MatrixChange, MessageSource, MessageWrapper,
    NodeId, Persona, VaultError, VaultResult,
};
use vault2_api::builder::Builder;
use vault2_sdv::{StructuredDataVersions, VersionName};

/// VersionHandler configuration types.
pub mod config {
    /// Configuration parameters for
    /// [VersionHandlerService](super::VersionHandlerService).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct VersionHandlerConfig {
        /// Version bound for trees created implicitly by a root put.
        /// Default: 100.
        pub max_versions: u32,

        /// Branch bound for trees created implicitly by a root put.
        /// Default: 20.
        pub max_branches: u32,
    }

    impl Default for VersionHandlerConfig {
        fn default() -> Self {
            Self {
                max_versions: 100,
                max_branches: 20,
            }
        }
    }

    impl vault2_api::config::ModConfig for VersionHandlerConfig {}
}

pub use config::VersionHandlerConfig;

/// Version groups keep no aggregate state yet; the row is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionHandlerMetadata;

impl GroupMetadata for VersionHandlerMetadata {
    fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::new()
    }

    fn from_bytes(_bytes: &[u8]) -> VaultResult<Self> {
        Ok(Self)
    }
}

/// A datum's version tree, as stored.
#[derive(Debug)]
pub struct VersionHandlerValue(pub StructuredDataVersions);

impl GroupValue for VersionHandlerValue {
    fn to_bytes(&self) -> bytes::Bytes {
        self.0.encode()
    }

    fn from_bytes(bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self(StructuredDataVersions::decode(bytes)?))
    }
}

/// Policy marker for the VersionHandler group database.
pub struct VersionHandler;

impl GroupPolicy for VersionHandler {
    const NAME: &'static str = "VersionHandler";
    type Key = RecordKey;
    type Value = VersionHandlerValue;
    type Metadata = VersionHandlerMetadata;
}

fn put_opt_version(buf: &mut bytes::BytesMut, version: &Option<VersionName>) {
    match version {
        None => buf.put_u8(0),
        Some(version) => {
            buf.put_u8(1);
            version.encode_into(buf);
        }
    }
}

fn get_opt_version(
    bytes: &mut bytes::Bytes,
) -> VaultResult<Option<VersionName>> {
    match wire::get_u8(bytes, "version flag")? {
        0 => Ok(None),
        1 => Ok(Some(VersionName::decode_from(bytes)?)),
        flag => Err(VaultError::invalid_message(format!(
            "bad version flag {flag}"
        ))),
    }
}

/// Appends a version to a datum's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPutVersion {
    /// The datum whose history grows.
    pub data: DataId,
    /// The parent version, `None` for a root put.
    pub old: Option<VersionName>,
    /// The new version.
    pub new: VersionName,
}

impl ActionPutVersion {
    /// Wire action id.
    pub const ACTION_ID: u8 = 10;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        put_opt_version(&mut buf, &self.old);
        self.new.encode_into(&mut buf);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
            old: get_opt_version(&mut bytes)?,
            new: VersionName::decode_from(&mut bytes)?,
        })
    }
}

/// Removes the branch ending at a tip, up to the nearest fork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDeleteBranchUntilFork {
    /// The datum whose history shrinks.
    pub data: DataId,
    /// The tip of the doomed branch.
    pub tip: VersionName,
}

impl ActionDeleteBranchUntilFork {
    /// Wire action id.
    pub const ACTION_ID: u8 = 11;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        self.tip.encode_into(&mut buf);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
            tip: VersionName::decode_from(&mut bytes)?,
        })
    }
}

/// Creates a version tree with explicit bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCreateVersionTree {
    /// The datum gaining a history.
    pub data: DataId,
    /// The root version.
    pub first: VersionName,
    /// Version bound.
    pub max_versions: u32,
    /// Branch bound.
    pub max_branches: u32,
}

impl ActionCreateVersionTree {
    /// Wire action id.
    pub const ACTION_ID: u8 = 12;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        self.first.encode_into(&mut buf);
        buf.put_u32_le(self.max_versions);
        buf.put_u32_le(self.max_branches);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
            first: VersionName::decode_from(&mut bytes)?,
            max_versions: wire::get_u32_le(&mut bytes, "max versions")?,
            max_branches: wire::get_u32_le(&mut bytes, "max branches")?,
        })
    }
}

/// Asks for a datum's current tips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGetVersions {
    /// The datum asked about.
    pub data: DataId,
}

impl ActionGetVersions {
    /// Wire action id.
    pub const ACTION_ID: u8 = 14;
    /// Wire action id of the reply.
    pub const RESPONSE_ID: u8 = 24;

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

/// Asks for the branch ending at a tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGetBranch {
    /// The datum asked about.
    pub data: DataId,
    /// The tip to walk back from.
    pub tip: VersionName,
}

impl ActionGetBranch {
    /// Wire action id.
    pub const ACTION_ID: u8 = 15;
    /// Wire action id of the reply.
    pub const RESPONSE_ID: u8 = 25;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        self.tip.encode_into(&mut buf);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
            tip: VersionName::decode_from(&mut bytes)?,
        })
    }
}

/// Encode a version list reply payload.
pub fn encode_version_list(versions: &[VersionName]) -> bytes::Bytes {
    let mut buf = bytes::BytesMut::new();
    buf.put_u32_le(versions.len() as u32);
    for version in versions {
        version.encode_into(&mut buf);
    }
    buf.freeze()
}

/// Parse a version list reply payload.
pub fn decode_version_list(
    mut bytes: bytes::Bytes,
) -> VaultResult<Vec<VersionName>> {
    let count = wire::get_u32_le(&mut bytes, "version count")?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(VersionName::decode_from(&mut bytes)?);
    }
    Ok(out)
}

/// The VersionHandler service.
#[derive(Debug)]
pub struct VersionHandlerService {
    db: GroupDb<VersionHandler>,
    accumulator: Accumulator,
    active: ActiveQueue,
    config: VersionHandlerConfig,
}

impl VersionHandlerService {
    /// Construct the service, owning a group database under `root`.
    pub fn new(root: &Path, builder: &Builder) -> VaultResult<Self> {
        let accumulator: AccumulatorConfig =
            builder.config.get_module_config("accumulator")?;
        let config: VersionHandlerConfig =
            builder.config.get_module_config("version_handler")?;
        Ok(Self {
            db: GroupDb::new(&root.join("version_handler"))?,
            accumulator: Accumulator::new(accumulator),
            active: ActiveQueue::new(
                "version_handler",
                builder.sender.clone(),
            ),
            config,
        })
    }

    /// The group database, for history reads.
    pub fn db(&self) -> &GroupDb<VersionHandler> {
        &self.db
    }

    fn ensure_group(&self, group: &GroupName) -> VaultResult<()> {
        match self.db.get_metadata(group) {
            Err(VaultError::NoSuchAccount) => self
                .db
                .add_group(group.clone(), VersionHandlerMetadata),
            Err(error) => Err(error),
            Ok(_) => Ok(()),
        }
    }

    /// Dispatch one inbound message.
    pub fn handle_message(
        &self,
        wrapper: MessageWrapper,
        sender: &MessageSource,
        receiver: &NodeId,
    ) -> VaultResult<()> {
        let group = GroupName::from(receiver.clone());
        match wrapper.action_tag {
            ActionPutVersion::ACTION_ID => {
                let action =
                    ActionPutVersion::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::VersionHandler,
                    sender,
                    &[Persona::MaidManager],
                ) || !quorum_ready(
                    Persona::VersionHandler,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                if action.old.is_none() {
                    // a root put brings the datum's group into being
                    self.ensure_group(&group)?;
                }
                let key = RecordKey::new(group, action.data.clone());
                let bounds = self.config.clone();
                self.db.commit_record(&key, move |_, value| {
                    match value {
                        Some(stored) => {
                            stored.0.put(action.old.as_ref(), action.new)?;
                        }
                        None => {
                            if action.old.is_some() {
                                return Err(VaultError::NoSuchElement);
                            }
                            let mut tree = StructuredDataVersions::new(
                                bounds.max_versions as usize,
                                bounds.max_branches as usize,
                            )?;
                            tree.put(None, action.new)?;
                            *value = Some(VersionHandlerValue(tree));
                        }
                    }
                    Ok(DbAction::Put)
                })?;
                Ok(())
            }
            ActionDeleteBranchUntilFork::ACTION_ID => {
                let action = ActionDeleteBranchUntilFork::from_bytes(
                    wrapper.payload.clone(),
                )?;
                if !authorised(
                    Persona::VersionHandler,
                    sender,
                    &[Persona::MaidManager],
                ) || !quorum_ready(
                    Persona::VersionHandler,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                let key = RecordKey::new(group, action.data.clone());
                self.db.commit_record(&key, move |_, value| {
                    let stored =
                        value.as_mut().ok_or(VaultError::NoSuchElement)?;
                    stored.0.delete_branch_until_fork(&action.tip)?;
                    if stored.0.is_empty() {
                        Ok(DbAction::Delete)
                    } else {
                        Ok(DbAction::Put)
                    }
                })?;
                Ok(())
            }
            ActionCreateVersionTree::ACTION_ID => {
                let action = ActionCreateVersionTree::from_bytes(
                    wrapper.payload.clone(),
                )?;
                if !authorised(
                    Persona::VersionHandler,
                    sender,
                    &[Persona::MaidManager],
                ) || !quorum_ready(
                    Persona::VersionHandler,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                self.ensure_group(&group)?;
                let key = RecordKey::new(group, action.data.clone());
                self.db.commit_record(&key, move |_, value| {
                    if value.is_some() {
                        return Err(VaultError::VersionAlreadyExists);
                    }
                    let mut tree = StructuredDataVersions::new(
                        action.max_versions as usize,
                        action.max_branches as usize,
                    )?;
                    tree.put(None, action.first)?;
                    *value = Some(VersionHandlerValue(tree));
                    Ok(DbAction::Put)
                })?;
                Ok(())
            }
            ActionGetVersions::ACTION_ID => {
                let action =
                    ActionGetVersions::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::VersionHandler,
                    sender,
                    &[Persona::MaidNode, Persona::DataGetter],
                ) || !single_ready(
                    Persona::VersionHandler,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                let key = RecordKey::new(group, action.data);
                let versions = self.db.get_value(&key)?.0.get_versions();
                self.reply(
                    sender,
                    wrapper.message_id,
                    ActionGetVersions::RESPONSE_ID,
                    encode_version_list(&versions),
                );
                Ok(())
            }
            ActionGetBranch::ACTION_ID => {
                let action =
                    ActionGetBranch::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::VersionHandler,
                    sender,
                    &[Persona::MaidNode, Persona::DataGetter],
                ) || !single_ready(
                    Persona::VersionHandler,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                let key = RecordKey::new(group, action.data);
                let branch =
                    self.db.get_value(&key)?.0.get_branch(&action.tip)?;
                self.reply(
                    sender,
                    wrapper.message_id,
                    ActionGetBranch::RESPONSE_ID,
                    encode_version_list(&branch),
                );
                Ok(())
            }
            ACCOUNT_TRANSFER_TAG => {
                if !authorised(
                    Persona::VersionHandler,
                    sender,
                    &[Persona::VersionHandler],
                ) {
                    return Ok(());
                }
                self.db
                    .handle_transfer(Contents::decode(wrapper.payload.clone())?)
            }
            tag => {
                tracing::warn!(tag, "version handler ignoring unknown action");
                Ok(())
            }
        }
    }

    fn reply(
        &self,
        to: &MessageSource,
        message_id: u64,
        action_tag: u8,
        payload: bytes::Bytes,
    ) {
        drop(self.active.enqueue(
            Destination::Node(to.node.clone()),
            MessageWrapper {
                message_id,
                persona: to.persona,
                action_tag,
                payload,
            },
        ));
    }

    /// React to a routing-matrix change.
    pub fn handle_matrix_change(
        &self,
        matrix_change: &MatrixChange,
    ) -> VaultResult<()> {
        let transfer_info = self.db.get_transfer_info(matrix_change)?;
        crate::service::send_transfers(
            &self.active,
            Persona::VersionHandler,
            transfer_info,
        );
        Ok(())
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
        DataId::new(crate::DataKind::Mutable, fill_id(9))
    }

    fn v(index: u64, fill: u8) -> VersionName {
        VersionName::new(index, fill_id(fill))
    }

    fn put_wrapper(
        message_id: u64,
        old: Option<VersionName>,
        new: VersionName,
    ) -> MessageWrapper {
        MessageWrapper {
            message_id,
            persona: Persona::VersionHandler,
            action_tag: ActionPutVersion::ACTION_ID,
            payload: ActionPutVersion {
                data: data(),
                old,
                new,
            }
            .to_bytes(),
        }
    }

    fn quorum(
        service: &VersionHandlerService,
        wrapper: MessageWrapper,
        receiver: &NodeId,
    ) {
        for fill in 1..=3u8 {
            let source = MessageSource {
                persona: Persona::MaidManager,
                node: fill_node(fill),
            };
            service
                .handle_message(wrapper.clone(), &source, receiver)
                .unwrap();
        }
    }

    fn tips(service: &VersionHandlerService, receiver: &NodeId) -> Vec<VersionName> {
        let key = RecordKey::new(
            GroupName::from(receiver.clone()),
            data(),
        );
        service.db.get_value(&key).unwrap().0.get_versions()
    }

    #[tokio::test]
    async fn root_put_round_trips() {
        let capture = CaptureSender::new();
        let dir = tempfile::tempdir().unwrap();
        let service =
            VersionHandlerService::new(dir.path(), &builder(&capture))
                .unwrap();
        let receiver = fill_node(9);
        quorum(&service, put_wrapper(1, None, v(0, b'a')), &receiver);
        assert_eq!(vec![v(0, b'a')], tips(&service, &receiver));
    }

    #[tokio::test]
    async fn fork_then_delete_branch_until_fork() {
        let capture = CaptureSender::new();
        let dir = tempfile::tempdir().unwrap();
        let service =
            VersionHandlerService::new(dir.path(), &builder(&capture))
                .unwrap();
        let receiver = fill_node(9);

        quorum(&service, put_wrapper(1, None, v(0, b'a')), &receiver);
        let puts = [
            (v(0, b'a'), v(1, b'b')),
            (v(1, b'b'), v(2, b'c')),
            (v(2, b'c'), v(3, b'f')),
            (v(1, b'b'), v(2, b'd')),
            (v(3, b'f'), v(4, b'i')),
        ];
        for (i, (old, new)) in puts.into_iter().enumerate() {
            quorum(
                &service,
                put_wrapper(2 + i as u64, Some(old), new),
                &receiver,
            );
        }
        let current = tips(&service, &receiver);
        assert!(current.contains(&v(4, b'i')));
        assert!(current.contains(&v(2, b'd')));

        let delete = MessageWrapper {
            message_id: 50,
            persona: Persona::VersionHandler,
            action_tag: ActionDeleteBranchUntilFork::ACTION_ID,
            payload: ActionDeleteBranchUntilFork {
                data: data(),
                tip: v(4, b'i'),
            }
            .to_bytes(),
        };
        quorum(&service, delete, &receiver);

        let current = tips(&service, &receiver);
        assert!(!current.contains(&v(4, b'i')));
        assert!(current.contains(&v(2, b'd')));
    }

    #[tokio::test]
    async fn no_apply_before_quorum() {
        let capture = CaptureSender::new();
        let dir = tempfile::tempdir().unwrap();
        let service =
            VersionHandlerService::new(dir.path(), &builder(&capture))
                .unwrap();
        let receiver = fill_node(9);
        for fill in 1..=2u8 {
            let source = MessageSource {
                persona: Persona::MaidManager,
                node: fill_node(fill),
            };
            service
                .handle_message(
                    put_wrapper(1, None, v(0, b'a')),
                    &source,
                    &receiver,
                )
                .unwrap();
        }
        assert!(service
            .db
            .get_metadata(&GroupName::from(receiver))
            .is_err());
    }

    #[tokio::test]
    async fn get_versions_replies_to_sender() {
        let capture = CaptureSender::new();
        let dir = tempfile::tempdir().unwrap();
        let service =
            VersionHandlerService::new(dir.path(), &builder(&capture))
                .unwrap();
        let receiver = fill_node(9);
        quorum(&service, put_wrapper(1, None, v(0, b'a')), &receiver);
        capture.clear();

        let get = MessageWrapper {
            message_id: 60,
            persona: Persona::VersionHandler,
            action_tag: ActionGetVersions::ACTION_ID,
            payload: ActionGetVersions { data: data() }.to_bytes(),
        };
        let asker = MessageSource {
            persona: Persona::DataGetter,
            node: fill_node(0x42),
        };
        service.handle_message(get, &asker, &receiver).unwrap();

        for _ in 0..50 {
            if !capture.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let sent = capture.sent();
        assert_eq!(1, sent.len());
        let (destination, reply) = &sent[0];
        assert_eq!(&Destination::Node(fill_node(0x42)), destination);
        assert_eq!(ActionGetVersions::RESPONSE_ID, reply.action_tag);
        assert_eq!(
            vec![v(0, b'a')],
            decode_version_list(reply.payload.clone()).unwrap(),
        );
    }

    #[test]
    fn actions_round_trip() {
        let put = ActionPutVersion {
            data: data(),
            old: Some(v(3, b'x')),
            new: v(4, b'y'),
        };
        assert_eq!(
            put,
            ActionPutVersion::from_bytes(put.to_bytes()).unwrap(),
        );
        let root = ActionPutVersion {
            data: data(),
            old: None,
            new: v(0, b'a'),
        };
        assert_eq!(
            root,
            ActionPutVersion::from_bytes(root.to_bytes()).unwrap(),
        );
        let delete = ActionDeleteBranchUntilFork {
            data: data(),
            tip: v(4, b'y'),
        };
        assert_eq!(
            delete,
            ActionDeleteBranchUntilFork::from_bytes(delete.to_bytes())
                .unwrap(),
        );
        let create = ActionCreateVersionTree {
            data: data(),
            first: v(0, b'a'),
            max_versions: 8,
            max_branches: 2,
        };
        assert_eq!(
            create,
            ActionCreateVersionTree::from_bytes(create.to_bytes()).unwrap(),
        );
    }
}
