//! The MaidManager persona: custodian of a client account.
//!
//! The account meters what a client has stored against the space it is
//! allowed. Accounts are created explicitly by the client's create-account
//! message; a put against a missing account is refused, which is what the
//! default group policy already does.

use crate::service::{authorised, single_ready, ACCOUNT_TRANSFER_TAG};
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

/// Space granted to a fresh account until an explicit allowance exists.
pub const DEFAULT_SPACE_AVAILABLE: i64 = 1 << 32;

/// Aggregate state of one client account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaidManagerMetadata {
    /// Total cost of everything the client has stored.
    pub data_stored: i64,
    /// Space remaining in the client's allowance.
    pub space_available: i64,
}

impl Default for MaidManagerMetadata {
    fn default() -> Self {
        Self {
            data_stored: 0,
            space_available: DEFAULT_SPACE_AVAILABLE,
        }
    }
}

impl GroupMetadata for MaidManagerMetadata {
    fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::with_capacity(16);
        buf.put_i64_le(self.data_stored);
        buf.put_i64_le(self.space_available);
        buf.freeze()
    }

    fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        let mut buf = bytes::Bytes::copy_from_slice(bytes);
        Ok(Self {
            data_stored: wire::get_i64_le(&mut buf, "data stored")?,
            space_available: wire::get_i64_le(&mut buf, "space available")?,
        })
    }
}

/// One stored datum's entry in a client account.
#[derive(Debug, PartialEq, Eq)]
pub struct MaidManagerValue {
    /// How many times the client has put this datum.
    pub count: u32,
    /// Accumulated cost across those puts.
    pub total_cost: u64,
}

impl GroupValue for MaidManagerValue {
    fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::with_capacity(12);
        buf.put_u32_le(self.count);
        buf.put_u64_le(self.total_cost);
        buf.freeze()
    }

    fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            count: wire::get_u32_le(&mut bytes, "count")?,
            total_cost: wire::get_u64_le(&mut bytes, "total cost")?,
        })
    }
}

/// Policy marker for the MaidManager group database.
pub struct MaidManager;

impl GroupPolicy for MaidManager {
    const NAME: &'static str = "MaidManager";
    type Key = RecordKey;
    type Value = MaidManagerValue;
    type Metadata = MaidManagerMetadata;
}

/// Creates a client account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCreateAccount;

impl ActionCreateAccount {
    /// Wire action id.
    pub const ACTION_ID: u8 = 0;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::new()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(bytes: bytes::Bytes) -> VaultResult<Self> {
        if !bytes.is_empty() {
            return Err(VaultError::invalid_message(
                "create account carries no body",
            ));
        }
        Ok(Self)
    }
}

/// Meters a client put and forwards it to the datum's managers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMaidManagerPut {
    /// The datum being stored.
    pub data: DataId,
    /// The cost charged against the account.
    pub cost: u64,
}

impl ActionMaidManagerPut {
    /// Wire action id.
    pub const ACTION_ID: u8 = 1;

    /// Serialise to the stable byte form.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        self.data.encode_into(&mut buf);
        buf.put_u64_le(self.cost);
        buf.freeze()
    }

    /// Parse the stable byte form.
    pub fn from_bytes(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        Ok(Self {
            data: DataId::decode_from(&mut bytes)?,
            cost: wire::get_u64_le(&mut bytes, "cost")?,
        })
    }

    /// Apply within a record commit.
    pub fn apply(
        &self,
        metadata: &mut MaidManagerMetadata,
        value: &mut Option<MaidManagerValue>,
    ) -> VaultResult<DbAction> {
        let cost = self.cost as i64;
        if metadata.space_available < metadata.data_stored + cost {
            return Err(VaultError::failed("account allowance exhausted"));
        }
        metadata.data_stored += cost;
        match value {
            Some(value) => {
                value.count += 1;
                value.total_cost += self.cost;
            }
            None => {
                *value = Some(MaidManagerValue {
                    count: 1,
                    total_cost: self.cost,
                });
            }
        }
        Ok(DbAction::Put)
    }
}

/// Releases a stored datum from the client account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMaidManagerDelete {
    /// The datum being deleted.
    pub data: DataId,
}

impl ActionMaidManagerDelete {
    /// Wire action id.
    pub const ACTION_ID: u8 = 2;

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
        metadata: &mut MaidManagerMetadata,
        value: &mut Option<MaidManagerValue>,
    ) -> VaultResult<DbAction> {
        if let Some(value) = value {
            metadata.data_stored -= value.total_cost as i64;
        }
        Ok(DbAction::Delete)
    }
}

/// The MaidManager service.
#[derive(Debug)]
pub struct MaidManagerService {
    db: GroupDb<MaidManager>,
    accumulator: Accumulator,
    active: ActiveQueue,
}

impl MaidManagerService {
    /// Construct the service, owning a group database under `root`.
    pub fn new(root: &Path, builder: &Builder) -> VaultResult<Self> {
        let config: AccumulatorConfig =
            builder.config.get_module_config("accumulator")?;
        Ok(Self {
            db: GroupDb::new(&root.join("maid_manager"))?,
            accumulator: Accumulator::new(config),
            active: ActiveQueue::new("maid_manager", builder.sender.clone()),
        })
    }

    /// The group database, for account reads.
    pub fn db(&self) -> &GroupDb<MaidManager> {
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
            ActionCreateAccount::ACTION_ID => {
                ActionCreateAccount::from_bytes(wrapper.payload.clone())?;
                // a client speaks for itself; the accumulator only filters
                // retransmissions
                if !authorised(
                    Persona::MaidManager,
                    sender,
                    &[Persona::MaidNode],
                ) || !single_ready(
                    Persona::MaidManager,
                    &self.accumulator,
                    &wrapper,
                    sender,
                ) {
                    return Ok(());
                }
                match self
                    .db
                    .add_group(group, MaidManagerMetadata::default())
                {
                    Err(VaultError::AccountAlreadyExists) => {
                        tracing::debug!(
                            client = %sender.node,
                            "create for an account that already exists",
                        );
                        Ok(())
                    }
                    other => other,
                }
            }
            ActionMaidManagerPut::ACTION_ID => {
                let action =
                    ActionMaidManagerPut::from_bytes(wrapper.payload.clone())?;
                if !authorised(
                    Persona::MaidManager,
                    sender,
                    &[Persona::MaidNode],
                ) || !single_ready(
                    Persona::MaidManager,
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
                // tell the datum's managers to store it
                let forward = crate::personas::data_manager::ActionDataManagerPut {
                    data: action.data.clone(),
                    size: action.cost,
                };
                drop(self.active.enqueue(
                    Destination::Group(GroupName(action.data.name.clone())),
                    MessageWrapper {
                        message_id: wrapper.message_id,
                        persona: Persona::DataManager,
                        action_tag:
                            crate::personas::data_manager::ActionDataManagerPut::ACTION_ID,
                        payload: forward.to_bytes(),
                    },
                ));
                Ok(())
            }
            ActionMaidManagerDelete::ACTION_ID => {
                let action = ActionMaidManagerDelete::from_bytes(
                    wrapper.payload.clone(),
                )?;
                if !authorised(
                    Persona::MaidManager,
                    sender,
                    &[Persona::MaidNode],
                ) || !single_ready(
                    Persona::MaidManager,
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
                if removed.is_some() {
                    let forward =
                        crate::personas::data_manager::ActionDataManagerDelete {
                            data: action.data.clone(),
                        };
                    drop(self.active.enqueue(
                        Destination::Group(GroupName(
                            action.data.name.clone(),
                        )),
                        MessageWrapper {
                            message_id: wrapper.message_id,
                            persona: Persona::DataManager,
                            action_tag:
                                crate::personas::data_manager::ActionDataManagerDelete::ACTION_ID,
                            payload: forward.to_bytes(),
                        },
                    ));
                }
                Ok(())
            }
            ACCOUNT_TRANSFER_TAG => {
                if !authorised(
                    Persona::MaidManager,
                    sender,
                    &[Persona::MaidManager],
                ) {
                    return Ok(());
                }
                self.db
                    .handle_transfer(Contents::decode(wrapper.payload.clone())?)
            }
            tag => {
                tracing::warn!(tag, "maid manager ignoring unknown action");
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
            Persona::MaidManager,
            transfer_info,
        );
        Ok(())
    }
}
