//! The PmidManager persona: custodian of a storage node's account.
//!
//! The account tracks what a PMID node claims to hold and how healthy it
//! says it is. A PMID account is created implicitly by the first put
//! routed at it, so this persona overrides the group policy to create on
//! commit, and persists its metadata from the update hook so an account
//! survives in the durable store alongside its records.

use crate::service::{
    authorised, quorum_ready, send_transfers, single_ready,
    ACCOUNT_TRANSFER_TAG,
};
use crate::{
    Accumulator, AccumulatorConfig, ActiveQueue, Contents, DataId, GroupDb,
    RecordKey,
};
use bytes::BufMut;
use std::path::Path;
use vault2_api::{
    wire, DbAction, GroupMetadata, GroupName, GroupPolicy,
    GroupValue, MatrixChange, MessageSource, MessageWrapper, NodeId,
    Persona, VaultResult,
};
use vault2_api::builder::Builder;

/// Aggregate state of one PMID node's account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PmidManagerMetadata {
    /// Whether the node has claimed this account by reporting health.
    pub claimed: bool,
    /// Disk space the node last reported available.
    pub available: i64,
    /// Total size this group believes the node stores.
    pub stored_total_size: i64,
    /// Total size lost to failed retrievals.
    pub lost_total_size: i64,
}

impl GroupMetadata for PmidManagerMetadata {
    fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::with_capacity(25);
        buf.put_u8(self.claimed as u8);
        buf.put_i64_le(self.available);
        buf.put_i64_le(self.stored_total_size);
        buf.put_i64_le(self.lost_total_size);
        buf.freeze()
    }

    fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        let mut buf = bytes::Bytes::copy_from_slice(bytes);
        Ok(Self {
            claimed: wire::get_u8(&mut buf, "claimed")? != 0,
            available: wire::get_i64_le(&mut buf, "available")?,
            stored_total_size: wire::get_i64_le(&mut buf, "stored size")?,
            lost_total_size: wire::get_i64_le(&mut buf, "lost size")?,
        })
    }
}

/// One stored chunk's entry in a PMID account.
#[derive(Debug, PartialEq, Eq)]
pub struct PmidManagerValue {
    /// Size of the stored chunk.
    pub size: u64,
}

impl GroupValue for PmidManagerValue {
    fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(&self.size.to_le_bytes())
    }

    fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            size: wire::get_u64_le(&mut bytes, "chunk size")?,
        })
    }
}

/// Policy marker for the PmidManager group database.
pub struct PmidManager;

impl GroupPolicy for PmidManager {
    const NAME: &'static str = "PmidManager";
    type Key = RecordKey;
    type Value = PmidManagerValue;
    type Metadata = PmidManagerMetadata;

    // A pmid account is created on the first put routed at it.
    fn find_or_create(
        group_name: &GroupName,
    ) -> VaultResult<Self::Metadata> {
        tracing::debug!(%group_name, "creating pmid account on first commit");
        Ok(PmidManagerMetadata::default())
    }

    fn update_group(
        _group_name: &GroupName,
        metadata: &Self::Metadata,
    ) -> Option<bytes::Bytes> {
        Some(metadata.to_bytes())
    }
}

/// Records a chunk held by the managed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPmidManagerPut {
    /// The chunk stored.
    pub data: DataId,
    /// Its size in bytes.
    pub size: u64,
}

impl ActionPmidManagerPut {
    /// Wire action id.
    pub const ACTION_ID: u8 = 7;

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
        metadata: &mut PmidManagerMetadata,
        value: &mut Option<PmidManagerValue>,
    ) -> VaultResult<DbAction> {
        if value.is_none() {
            metadata.stored_total_size += self.size as i64;
        }
        *value = Some(PmidManagerValue { size: self.size });
        Ok(DbAction::Put)
    }
}

/// Drops a chunk from the managed node's account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPmidManagerDelete {
    /// The chunk removed.
    pub data: DataId,
}

impl ActionPmidManagerDelete {
    /// Wire action id.
    pub const ACTION_ID: u8 = 8;

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
        metadata: &mut PmidManagerMetadata,
        value: &mut Option<PmidManagerValue>,
    ) -> VaultResult<DbAction> {
        if let Some(value) = value {
            metadata.stored_total_size -= value.size as i64;
        }
        Ok(DbAction::Delete)
    }
}

/// Sets the health of a PMID account from the node's own report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSetPmidHealth {
    /// Disk space the node reports available.
    pub disk_available_size: i64,
}

impl ActionSetPmidHealth {
    /// Wire action id.
    pub const ACTION_ID: u8 = 9;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(
            &self.disk_available_size.to_le_bytes(),
        )
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            disk_available_size: wire::get_i64_le(&mut bytes, "health")?,
        })
    }

    /// Apply within a metadata commit.
    pub fn apply(&self, metadata: &mut PmidManagerMetadata) {
        metadata.claimed = true;
        metadata.available = self.disk_available_size;
    }
}

/// The PmidManager service.
#[derive(Debug)]
pub struct PmidManagerService {
    db: GroupDb<PmidManager>,
    accumulator: Accumulator,
    active: ActiveQueue,
}

impl PmidManagerService {
    /// Construct the service, owning a group database under `root`.
    pub fn new(root: &Path, builder: &Builder) -> VaultResult<Self> {
        let config: AccumulatorConfig =
            builder.config.get_module_config("accumulator")?;
        Ok(Self {
            db: GroupDb::new(&root.join("pmid_manager"))?,
            accumulator: Accumulator::new(config),
            active: ActiveQueue::new("pmid_manager", builder.sender.clone()),
        })
    }

    /// The group database, for account reads.
    pub fn db(&self) -> &GroupDb<PmidManager> {
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
            ActionPmidManagerPut::ACTION_ID => {
                let action =
                    ActionPmidManagerPut::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::PmidManager,
                    sender,
                    &[Persona::DataManager],
                ) || !quorum_ready(
                    Persona::PmidManager,
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
            ActionPmidManagerDelete::ACTION_ID => {
                let action = ActionPmidManagerDelete::from_bytes(
                    wrapper.payload.clone(),
                )?;
                if !authorised(
                    Persona::PmidManager,
                    sender,
                    &[Persona::DataManager],
                ) || !quorum_ready(
                    Persona::PmidManager,
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
            ActionSetPmidHealth::ACTION_ID => {
                // the node reports its own health; single source, the
                // accumulator only filters retransmissions
                let action =
                    ActionSetPmidHealth::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::PmidManager,
                    sender,
                    &[Persona::PmidNode],
                ) || !single_ready(
                    Persona::PmidManager,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                self.db.commit_metadata(&group, |metadata| {
                    action.apply(metadata);
                    Ok(())
                })
            }
            ACCOUNT_TRANSFER_TAG => {
                if !authorised(
                    Persona::PmidManager,
                    sender,
                    &[Persona::PmidManager],
                ) {
                    return Ok(());
                }
                self.db
                    .handle_transfer(Contents::decode(wrapper.payload.clone())?)
            }
            tag => {
                tracing::warn!(tag, "pmid manager ignoring unknown action");
                Ok(())
            }
        }
    }

    /// React to a routing-matrix change: transfer departing accounts to
    /// their new holders and prune what this node no longer covers.
    pub fn handle_matrix_change(
        &self,
        matrix_change: &MatrixChange,
    ) -> VaultResult<()> {
        let transfer_info = self.db.get_transfer_info(matrix_change)?;
        send_transfers(
            &self.active,
            Persona::PmidManager,
            transfer_info,
        );
        Ok(())
    }
}
