//! The DataManager persona: custodian of a datum's holder list.
//!
//! One group per datum, keyed by the data name. The record tracks which
//! PMID nodes hold a copy; PmidManager groups report additions and losses
//! through [ActionAddPmid] and [ActionRemovePmid].

use crate::service::{authorised, quorum_ready, ACCOUNT_TRANSFER_TAG};
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

/// Aggregate state of one datum's group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataManagerMetadata {
    /// Total size of the data this group accounts for.
    pub stored_total_size: u64,
}

impl GroupMetadata for DataManagerMetadata {
    fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(
            &self.stored_total_size.to_le_bytes(),
        )
    }

    fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        let mut buf = bytes::Bytes::copy_from_slice(bytes);
        Ok(Self {
            stored_total_size: wire::get_u64_le(&mut buf, "stored size")?,
        })
    }
}

/// The holder list of one datum.
#[derive(Debug, PartialEq, Eq)]
pub struct DataManagerValue {
    /// Size of the datum.
    pub size: u64,
    /// The PMID nodes currently believed to hold a copy.
    pub pmids: Vec<NodeId>,
}

impl GroupValue for DataManagerValue {
    fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        buf.put_u64_le(self.size);
        buf.put_u32_le(self.pmids.len() as u32);
        for pmid in &self.pmids {
            wire::put_id(&mut buf, pmid);
        }
        buf.freeze()
    }

    fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        let size = wire::get_u64_le(&mut bytes, "data size")?;
        let count = wire::get_u32_le(&mut bytes, "pmid count")?;
        let mut pmids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            pmids.push(wire::get_node_id(&mut bytes, "pmid")?);
        }
        Ok(Self { size, pmids })
    }
}

/// Policy marker for the DataManager group database.
pub struct DataManager;

impl GroupPolicy for DataManager {
    const NAME: &'static str = "DataManager";
    type Key = RecordKey;
    type Value = DataManagerValue;
    type Metadata = DataManagerMetadata;
}

/// Registers a datum with its managers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDataManagerPut {
    /// The datum being stored.
    pub data: DataId,
    /// Its size in bytes.
    pub size: u64,
}

impl ActionDataManagerPut {
    /// Wire action id.
    pub const ACTION_ID: u8 = 3;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        buf.put_u64_le(self.size);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
            size: wire::get_u64_le(&mut bytes, "size")?,
        })
    }

    /// Apply within a record commit.
    pub fn apply(
        &self,
        metadata: &mut DataManagerMetadata,
        value: &mut Option<DataManagerValue>,
    ) -> VaultResult<DbAction> {
        if value.is_none() {
            metadata.stored_total_size += self.size;
            *value = Some(DataManagerValue {
                size: self.size,
                pmids: Vec::new(),
            });
        }
        Ok(DbAction::Put)
    }
}

/// Drops a datum and releases its holders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDataManagerDelete {
    /// The datum being deleted.
    pub data: DataId,
}

impl ActionDataManagerDelete {
    /// Wire action id.
    pub const ACTION_ID: u8 = 4;

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

    /// Apply within a record commit.
    pub fn apply(
        &self,
        metadata: &mut DataManagerMetadata,
        value: &mut Option<DataManagerValue>,
    ) -> VaultResult<DbAction> {
        if let Some(value) = value {
            metadata.stored_total_size =
                metadata.stored_total_size.saturating_sub(value.size);
        }
        Ok(DbAction::Delete)
    }
}

/// Adds a PMID node to a datum's holder list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionAddPmid {
    /// The datum held.
    pub data: DataId,
    /// The node now holding a copy.
    pub pmid: NodeId,
}

impl ActionAddPmid {
    /// Wire action id.
    pub const ACTION_ID: u8 = 5;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        wire::put_id(&mut buf, &self.pmid);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
            pmid: wire::get_node_id(&mut bytes, "pmid")?,
        })
    }

    /// Apply within a record commit. The datum must already be stored.
    pub fn apply(
        &self,
        _metadata: &mut DataManagerMetadata,
        value: &mut Option<DataManagerValue>,
    ) -> VaultResult<DbAction> {
        let value = value.as_mut().ok_or(VaultError::NoSuchElement)?;
        if !value.pmids.contains(&self.pmid) {
            value.pmids.push(self.pmid.clone());
        }
        Ok(DbAction::Put)
    }
}

/// Removes a PMID node from a datum's holder list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRemovePmid {
    /// The datum concerned.
    pub data: DataId,
    /// The node that lost its copy.
    pub pmid: NodeId,
}

impl ActionRemovePmid {
    /// Wire action id.
    pub const ACTION_ID: u8 = 6;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        wire::put_id(&mut buf, &self.pmid);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
            pmid: wire::get_node_id(&mut bytes, "pmid")?,
        })
    }

    /// Apply within a record commit.
    pub fn apply(
        &self,
        _metadata: &mut DataManagerMetadata,
        value: &mut Option<DataManagerValue>,
    ) -> VaultResult<DbAction> {
        let value = value.as_mut().ok_or(VaultError::NoSuchElement)?;
        value.pmids.retain(|pmid| pmid != &self.pmid);
        Ok(DbAction::Put)
    }
}

/// The DataManager service.
#[derive(Debug)]
pub struct DataManagerService {
    db: GroupDb<DataManager>,
    accumulator: Accumulator,
    active: ActiveQueue,
}

impl DataManagerService {
    /// Construct the service, owning a group database under `root`.
    pub fn new(root: &Path, builder: &Builder) -> VaultResult<Self> {
        let config: AccumulatorConfig =
            builder.config.get_module_config("accumulator")?;
        Ok(Self {
            db: GroupDb::new(&root.join("data_manager"))?,
            accumulator: Accumulator::new(config),
            active: ActiveQueue::new("data_manager", builder.sender.clone()),
        })
    }

    /// The group database, for account reads.
    pub fn db(&self) -> &GroupDb<DataManager> {
        &self.db
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
            ActionDataManagerPut::ACTION_ID => {
                let action =
                    ActionDataManagerPut::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::DataManager,
                    sender,
                    &[Persona::MaidManager],
                ) || !quorum_ready(
                    Persona::DataManager,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                // a datum's group springs into being on its first put
                if let Err(VaultError::NoSuchAccount) =
                    self.db.get_metadata(&group)
                {
                    self.db.add_group(
                        group.clone(),
                        DataManagerMetadata::default(),
                    )?;
                }
                let key = RecordKey::new(group, action.data.clone());
                self.db.commit_record(&key, |metadata, value| {
                    action.apply(metadata, value)
                })?;
                Ok(())
            }
            ActionDataManagerDelete::ACTION_ID => {
                let action = ActionDataManagerDelete::from_bytes(
                    wrapper.payload.clone(),
                )?;
                if !authorised(
                    Persona::DataManager,
                    sender,
                    &[Persona::MaidManager],
                ) || !quorum_ready(
                    Persona::DataManager,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                let key = RecordKey::new(group, action.data.clone());
                let removed = self.db.commit_record(&key, |metadata, value| {
                    action.apply(metadata, value)
                })?;
                // release every holder of the dropped datum
                if let Some(removed) = removed {
                    for pmid in removed.pmids {
                        let forward =
                            crate::personas::pmid_manager::ActionPmidManagerDelete {
                                data: action.data.clone(),
                            };
                        drop(self.active.enqueue(
                            Destination::Group(GroupName::from(pmid)),
                            MessageWrapper {
                                message_id: wrapper.message_id,
                                persona: Persona::PmidManager,
                                action_tag:
                                    crate::personas::pmid_manager::ActionPmidManagerDelete::ACTION_ID,
                                payload: forward.to_bytes(),
                            },
                        ));
                    }
                }
                Ok(())
            }
            ActionAddPmid::ACTION_ID => {
                let action =
                    ActionAddPmid::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::DataManager,
                    sender,
                    &[Persona::PmidManager],
                ) || !quorum_ready(
                    Persona::DataManager,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                let key = RecordKey::new(group, action.data.clone());
                self.db.commit_record(&key, |metadata, value| {
                    action.apply(metadata, value)
                })?;
                Ok(())
            }
            ActionRemovePmid::ACTION_ID => {
                let action =
                    ActionRemovePmid::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::DataManager,
                    sender,
                    &[Persona::PmidManager],
                ) || !quorum_ready(
                    Persona::DataManager,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                let key = RecordKey::new(group, action.data.clone());
                self.db.commit_record(&key, |metadata, value| {
                    action.apply(metadata, value)
                })?;
                Ok(())
            }
            ACCOUNT_TRANSFER_TAG => {
                if !authorised(
                    Persona::DataManager,
                    sender,
                    &[Persona::DataManager],
                ) {
                    return Ok(());
                }
                self.db
                    .handle_transfer(Contents::decode(wrapper.payload.clone())?)
            }
            tag => {
                tracing::warn!(tag, "data manager ignoring unknown action");
                Ok(())
            }
        }
    }

    /// React to a routing-matrix change.
    pub fn handle_matrix_change(
        &self,
        matrix_change: &MatrixChange,
    ) -> VaultResult<()> {
        let transfer_info = self.db.get_transfer_info(matrix_change)?;
        crate::service::send_transfers(
            &self.active,
            Persona::DataManager,
            transfer_info,
        );
        Ok(())
    }
}
