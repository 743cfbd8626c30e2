//! The persona-generic account store.
//!
//! A [GroupDb] keeps a registry of groups (accounts) in memory and every
//! record durably in a [Backend]. Each group gets a random 16-bit
//! [GroupId] on first insertion; every storage key is the group id encoded
//! big-endian as a two-byte prefix followed by the record key's
//! fixed-width form, so a prefix range scan enumerates exactly one group.
//!
//! All public methods provide the strong exception guarantee and serialise
//! under a single mutex. Nothing running under that mutex may block on the
//! network.

use crate::fixed_width::to_fixed_width_bytes;
use crate::Backend;
use bytes::BufMut;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use vault2_api::{
    wire, DbAction, GroupKey, GroupMetadata, GroupName, GroupPolicy,
    GroupRangeStatus, GroupValue, MatrixChange, NodeId, VaultError,
    VaultResult,
};

/// Internally generated identifier prefixing a group's storage keys.
pub type GroupId = u16;

/// Byte width of the encoded [GroupId] prefix.
pub const PREFIX_WIDTH: usize = 2;

const GROUPS_LIMIT: usize = 1 << (8 * PREFIX_WIDTH);

fn group_prefix(group_id: GroupId) -> [u8; PREFIX_WIDTH] {
    to_fixed_width_bytes::<PREFIX_WIDTH>(group_id as u64)
}

/// The metadata row lives at the bare prefix, which sorts before every
/// record key of the group.
fn metadata_key(group_id: GroupId) -> Vec<u8> {
    group_prefix(group_id).to_vec()
}

fn record_key<K: GroupKey>(group_id: GroupId, key: &K) -> Vec<u8> {
    let fixed = key.to_fixed_width_bytes();
    let mut out = Vec::with_capacity(PREFIX_WIDTH + fixed.len());
    out.extend_from_slice(&group_prefix(group_id));
    out.extend_from_slice(&fixed);
    out
}

/// One group's complete state, as packaged for an account transfer.
pub struct Contents<P: GroupPolicy> {
    /// The group being transferred.
    pub group_name: GroupName,
    /// Its metadata aggregate.
    pub metadata: P::Metadata,
    /// Every stored record, in key order.
    pub kv_pairs: Vec<(P::Key, P::Value)>,
}

impl<P: GroupPolicy> std::fmt::Debug for Contents<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contents")
            .field("group_name", &self.group_name)
            .field("metadata", &self.metadata)
            .field("records", &self.kv_pairs.len())
            .finish()
    }
}

impl<P: GroupPolicy> Contents<P> {
    /// Encode to the stable transfer wire form.
    pub fn encode(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        wire::put_id(&mut buf, &self.group_name);
        wire::put_bytes(&mut buf, &self.metadata.to_bytes());
        buf.put_u32_le(self.kv_pairs.len() as u32);
        for (key, value) in &self.kv_pairs {
            wire::put_bytes(&mut buf, &key.to_fixed_width_bytes());
            wire::put_bytes(&mut buf, &value.to_bytes());
        }
        buf.freeze()
    }

    /// Parse the stable transfer wire form.
    pub fn decode(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        let group_name = GroupName(wire::get_id(&mut bytes, "group name")?);
        let metadata =
            P::Metadata::from_bytes(&wire::get_bytes(&mut bytes, "metadata")?)?;
        let count = wire::get_u32_le(&mut bytes, "record count")?;
        let mut kv_pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_bytes = wire::get_bytes(&mut bytes, "record key")?;
            let key = P::Key::from_fixed_width_bytes(
                group_name.clone(),
                &key_bytes,
            )?;
            let value =
                P::Value::from_bytes(wire::get_bytes(&mut bytes, "record value")?)?;
            kv_pairs.push((key, value));
        }
        Ok(Self {
            group_name,
            metadata,
            kv_pairs,
        })
    }
}

/// Departing groups grouped by the node each should be sent to.
pub type TransferInfo<P> = BTreeMap<NodeId, Vec<Contents<P>>>;

struct GroupEntry<M> {
    id: GroupId,
    metadata: M,
}

struct Inner<P: GroupPolicy> {
    backend: Backend,
    groups: BTreeMap<GroupName, GroupEntry<P::Metadata>>,
}

/// The persona-generic account store.
pub struct GroupDb<P: GroupPolicy> {
    inner: Mutex<Inner<P>>,
}

impl<P: GroupPolicy> std::fmt::Debug for GroupDb<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupDb").field("persona", &P::NAME).finish()
    }
}

/// Fires the persona's `update_group` hook exactly once per commit, on
/// every exit path. Durable metadata persistence is skipped when the
/// commit aborted, so an aborted commit never writes.
struct CommitGuard<'g, P: GroupPolicy> {
    inner: &'g mut Inner<P>,
    group_name: GroupName,
    persist: bool,
}

impl<P: GroupPolicy> Drop for CommitGuard<'_, P> {
    fn drop(&mut self) {
        let Some(entry) = self.inner.groups.get(&self.group_name) else {
            return;
        };
        let Some(bytes) = P::update_group(&self.group_name, &entry.metadata)
        else {
            return;
        };
        if !self.persist {
            tracing::debug!(
                group = %self.group_name,
                persona = P::NAME,
                "aborted commit, metadata not persisted",
            );
            return;
        }
        let key = metadata_key(entry.id);
        if let Err(error) = self.inner.backend.put(&key, &bytes) {
            tracing::error!(
                ?error,
                group = %self.group_name,
                persona = P::NAME,
                "failed to persist group metadata",
            );
        }
    }
}

impl<P: GroupPolicy> GroupDb<P> {
    /// Open a group database owning the directory at `db_path`.
    pub fn new(db_path: &Path) -> VaultResult<Self> {
        Ok(Self {
            inner: Mutex::new(Inner {
                backend: Backend::open(db_path)?,
                groups: BTreeMap::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<P>> {
        self.inner.lock().expect("group db mutex poisoned")
    }

    /// Insert a new group. Fails with [VaultError::AccountAlreadyExists]
    /// when the name is already registered.
    pub fn add_group(
        &self,
        group_name: GroupName,
        metadata: P::Metadata,
    ) -> VaultResult<()> {
        let mut inner = self.lock();
        inner.add_group_to_map(group_name, metadata)?;
        Ok(())
    }

    /// Remove a group and every persisted record with its prefix. Use only
    /// when leaving the group's range or unregistering the account; a
    /// missing group is logged, not raised.
    pub fn delete_group(&self, group_name: &GroupName) -> VaultResult<()> {
        let mut inner = self.lock();
        inner.delete_group_entries(group_name)
    }

    /// Atomically update a group's metadata.
    ///
    /// If `f` errors the metadata is unchanged; the persona's update hook
    /// fires either way.
    pub fn commit_metadata<F>(
        &self,
        group_name: &GroupName,
        f: F,
    ) -> VaultResult<()>
    where
        F: FnOnce(&mut P::Metadata) -> VaultResult<()>,
    {
        tracing::trace!(group = %group_name, persona = P::NAME, "commit metadata");
        let mut inner = self.lock();
        inner.resolve_group(group_name)?;
        let mut guard = CommitGuard {
            inner: &mut *inner,
            group_name: group_name.clone(),
            persist: false,
        };
        let mut staged = guard
            .inner
            .groups
            .get(group_name)
            .expect("group resolved above")
            .metadata
            .clone();
        f(&mut staged)?;
        guard
            .inner
            .groups
            .get_mut(group_name)
            .expect("group resolved above")
            .metadata = staged;
        guard.persist = true;
        Ok(())
    }

    /// Atomically update a group's metadata and one record.
    ///
    /// The record's current value (if any) is loaded before `f` runs; `f`
    /// decides between [DbAction::Put] (the value must then be `Some`) and
    /// [DbAction::Delete]. Returns the removed value on delete, `None` on
    /// put. A delete with no stored value is a no-op returning `None`. If
    /// `f` errors, neither the record nor the metadata changes.
    pub fn commit_record<F>(
        &self,
        key: &P::Key,
        f: F,
    ) -> VaultResult<Option<P::Value>>
    where
        F: FnOnce(
            &mut P::Metadata,
            &mut Option<P::Value>,
        ) -> VaultResult<DbAction>,
    {
        let group_name = key.group_name().clone();
        tracing::trace!(group = %group_name, persona = P::NAME, "commit record");
        let mut inner = self.lock();
        let group_id = inner.resolve_group(&group_name)?;
        let mut guard = CommitGuard {
            inner: &mut *inner,
            group_name: group_name.clone(),
            persist: false,
        };
        let mut value = match guard.inner.get_record(group_id, key) {
            Ok(value) => Some(value),
            Err(VaultError::NoSuchElement) => None,
            Err(error) => return Err(error),
        };
        let mut staged = guard
            .inner
            .groups
            .get(&group_name)
            .expect("group resolved above")
            .metadata
            .clone();
        let action = f(&mut staged, &mut value)?;
        match action {
            DbAction::Put => {
                let new_value = value.as_ref().ok_or(VaultError::NullPointer)?;
                guard
                    .inner
                    .backend
                    .put(&record_key(group_id, key), &new_value.to_bytes())?;
                guard
                    .inner
                    .groups
                    .get_mut(&group_name)
                    .expect("group resolved above")
                    .metadata = staged;
                guard.persist = true;
                Ok(None)
            }
            DbAction::Delete => {
                if value.is_some() {
                    guard.inner.backend.delete(&record_key(group_id, key))?;
                } else {
                    tracing::warn!(
                        persona = P::NAME,
                        "delete commit with no stored value",
                    );
                }
                guard
                    .inner
                    .groups
                    .get_mut(&group_name)
                    .expect("group resolved above")
                    .metadata = staged;
                guard.persist = true;
                Ok(value)
            }
        }
    }

    /// The metadata of a registered group.
    pub fn get_metadata(
        &self,
        group_name: &GroupName,
    ) -> VaultResult<P::Metadata> {
        let inner = self.lock();
        Ok(inner.find_group(group_name)?.metadata.clone())
    }

    /// The value stored under `key`.
    pub fn get_value(&self, key: &P::Key) -> VaultResult<P::Value> {
        let inner = self.lock();
        let group_id = inner.find_group(key.group_name())?.id;
        inner.get_record(group_id, key)
    }

    /// A group's complete state.
    pub fn get_contents(
        &self,
        group_name: &GroupName,
    ) -> VaultResult<Contents<P>> {
        let inner = self.lock();
        inner.contents_of(group_name)
    }

    /// The names of every registered group.
    pub fn group_names(&self) -> Vec<GroupName> {
        self.lock().groups.keys().cloned().collect()
    }

    /// React to a routing-matrix change: package every group that gained a
    /// new holder for transfer, and prune every group this node is no
    /// longer a close holder of.
    pub fn get_transfer_info(
        &self,
        matrix_change: &MatrixChange,
    ) -> VaultResult<TransferInfo<P>> {
        let mut inner = self.lock();
        tracing::debug!(
            persona = P::NAME,
            groups = inner.groups.len(),
            "computing transfer info",
        );
        let mut transfer_info: TransferInfo<P> = BTreeMap::new();
        let mut prune = Vec::new();
        let names: Vec<GroupName> = inner.groups.keys().cloned().collect();
        for group_name in names {
            let result = matrix_change
                .check_holders(&NodeId::from(group_name.clone()));
            if result.proximity_status != GroupRangeStatus::InRange {
                prune.push(group_name);
                continue;
            }
            if result.new_holders.is_empty() {
                continue;
            }
            if result.new_holders.len() != 1 {
                tracing::error!(
                    holders = result.new_holders.len(),
                    "multiple new holders, only the first one gets processed",
                );
            }
            tracing::debug!(
                group = %group_name,
                to = %result.new_holders[0],
                "transferring account",
            );
            let contents = inner.contents_of(&group_name)?;
            transfer_info
                .entry(result.new_holders[0].clone())
                .or_default()
                .push(contents);
        }
        tracing::debug!(pruned = prune.len(), "pruning out-of-range groups");
        for group_name in &prune {
            inner.delete_group_entries(group_name)?;
        }
        Ok(transfer_info)
    }

    /// Apply an inbound account transfer, all-or-none.
    ///
    /// Accounts scatter across redundant senders during a churn event, so
    /// a transfer for a group that already exists merges into it, and
    /// re-inserted records are logged rather than failed.
    pub fn handle_transfer(&self, contents: Contents<P>) -> VaultResult<()> {
        let mut inner = self.lock();
        inner.apply_transfer(contents)
    }

    /// Leave the backing directory in place when this database drops.
    pub fn keep_backend_on_drop(&self) {
        self.lock().backend.keep_on_drop();
    }
}

impl<P: GroupPolicy> Inner<P> {
    fn find_group(
        &self,
        group_name: &GroupName,
    ) -> VaultResult<&GroupEntry<P::Metadata>> {
        self.groups
            .get(group_name)
            .ok_or(VaultError::NoSuchAccount)
    }

    /// Find the group, or create it if the persona's policy allows.
    fn resolve_group(&mut self, group_name: &GroupName) -> VaultResult<GroupId> {
        if let Some(entry) = self.groups.get(group_name) {
            return Ok(entry.id);
        }
        let metadata = P::find_or_create(group_name)?;
        self.add_group_to_map(group_name.clone(), metadata)
    }

    fn add_group_to_map(
        &mut self,
        group_name: GroupName,
        metadata: P::Metadata,
    ) -> VaultResult<GroupId> {
        if self.groups.contains_key(&group_name) {
            tracing::error!(group = %group_name, "account already exists in the group map");
            return Err(VaultError::AccountAlreadyExists);
        }
        if self.groups.len() == GROUPS_LIMIT - 1 {
            return Err(VaultError::failed("group id space exhausted"));
        }
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut group_id: GroupId = rng.gen();
        while self.groups.values().any(|entry| entry.id == group_id) {
            group_id = rng.gen();
        }
        tracing::debug!(
            group = %group_name,
            group_id,
            groups = self.groups.len(),
            persona = P::NAME,
            "group inserted",
        );
        self.groups
            .insert(group_name, GroupEntry { id: group_id, metadata });
        Ok(group_id)
    }

    fn delete_group_entries(
        &mut self,
        group_name: &GroupName,
    ) -> VaultResult<()> {
        let Some(entry) = self.groups.get(group_name) else {
            tracing::info!(group = %group_name, "account doesn't exist, nothing to delete");
            return Ok(());
        };
        let prefix = group_prefix(entry.id);
        self.backend.delete_prefix(&prefix)?;
        self.groups.remove(group_name);
        self.backend.compact();
        Ok(())
    }

    fn get_record(
        &self,
        group_id: GroupId,
        key: &P::Key,
    ) -> VaultResult<P::Value> {
        match self.backend.get(&record_key(group_id, key))? {
            Some(bytes) => P::Value::from_bytes(bytes),
            None => Err(VaultError::NoSuchElement),
        }
    }

    fn contents_of(&self, group_name: &GroupName) -> VaultResult<Contents<P>> {
        let entry = self.find_group(group_name)?;
        let prefix = group_prefix(entry.id);
        let mut kv_pairs = Vec::new();
        for (key_bytes, value_bytes) in self.backend.scan_prefix(&prefix)? {
            if key_bytes.len() == PREFIX_WIDTH {
                // the metadata row, not a record
                continue;
            }
            let key = P::Key::from_fixed_width_bytes(
                group_name.clone(),
                &key_bytes[PREFIX_WIDTH..],
            )?;
            kv_pairs.push((key, P::Value::from_bytes(value_bytes)?));
        }
        Ok(Contents {
            group_name: group_name.clone(),
            metadata: entry.metadata.clone(),
            kv_pairs,
        })
    }

    fn apply_transfer(&mut self, contents: Contents<P>) -> VaultResult<()> {
        let (group_id, created) = match self.groups.get(&contents.group_name) {
            Some(entry) => {
                tracing::debug!(
                    group = %contents.group_name,
                    "transfer merges into an account that already exists",
                );
                (entry.id, false)
            }
            None => (
                self.add_group_to_map(
                    contents.group_name.clone(),
                    contents.metadata.clone(),
                )?,
                true,
            ),
        };
        let pairs: Vec<(Vec<u8>, bytes::Bytes)> = contents
            .kv_pairs
            .iter()
            .map(|(key, value)| (record_key(group_id, key), value.to_bytes()))
            .collect();
        match self.backend.put_many(&pairs) {
            Ok(replaced) => {
                if replaced > 0 {
                    tracing::debug!(
                        replaced,
                        group = %contents.group_name,
                        "transfer re-inserted existing entries",
                    );
                }
                Ok(())
            }
            Err(error) => {
                // all-or-none per transfer: undo the registry insert
                if created {
                    self.groups.remove(&contents.group_name);
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::{DataId, DataKind, RecordKey};
    use bytes::Bytes;
    use vault2_api::{Id, ID_LEN};

    #[derive(Debug, Clone, PartialEq, Default)]
    struct TestMetadata {
        x: i64,
    }

    impl GroupMetadata for TestMetadata {
        fn to_bytes(&self) -> Bytes {
            Bytes::copy_from_slice(&self.x.to_le_bytes())
        }

        fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
            let arr: [u8; 8] = bytes
                .try_into()
                .map_err(|_| VaultError::invalid_message("metadata"))?;
            Ok(Self {
                x: i64::from_le_bytes(arr),
            })
        }
    }

    #[derive(Debug, PartialEq)]
    struct TestValue(Bytes);

    impl GroupValue for TestValue {
        fn to_bytes(&self) -> Bytes {
            self.0.clone()
        }

        fn from_bytes(bytes: Bytes) -> VaultResult<Self> {
            Ok(Self(bytes))
        }
    }

    struct TestPolicy;

    impl GroupPolicy for TestPolicy {
        const NAME: &'static str = "Test";
        type Key = RecordKey;
        type Value = TestValue;
        type Metadata = TestMetadata;
    }

    /// Mirrors the PmidManager specialisation: create on commit and
    /// persist metadata from the update hook.
    struct CreatingPolicy;

    impl GroupPolicy for CreatingPolicy {
        const NAME: &'static str = "Creating";
        type Key = RecordKey;
        type Value = TestValue;
        type Metadata = TestMetadata;

        fn find_or_create(
            _group_name: &GroupName,
        ) -> VaultResult<Self::Metadata> {
            Ok(TestMetadata::default())
        }

        fn update_group(
            _group_name: &GroupName,
            metadata: &Self::Metadata,
        ) -> Option<Bytes> {
            Some(metadata.to_bytes())
        }
    }

    fn id(fill: u8) -> Id {
        Id(Bytes::from(vec![fill; ID_LEN]))
    }

    fn group(fill: u8) -> GroupName {
        GroupName::from(id(fill))
    }

    fn key(group_fill: u8, data_fill: u8) -> RecordKey {
        RecordKey::new(
            group(group_fill),
            DataId::new(DataKind::Immutable, id(data_fill)),
        )
    }

    fn open<P: GroupPolicy>() -> (tempfile::TempDir, GroupDb<P>) {
        let dir = tempfile::tempdir().unwrap();
        let db = GroupDb::new(&dir.path().join("group_db")).unwrap();
        (dir, db)
    }

    #[test]
    fn add_group_then_get_metadata() {
        let (_dir, db) = open::<TestPolicy>();
        db.add_group(group(1), TestMetadata { x: 42 }).unwrap();
        assert_eq!(TestMetadata { x: 42 }, db.get_metadata(&group(1)).unwrap());
        assert!(matches!(
            db.get_metadata(&group(2)),
            Err(VaultError::NoSuchAccount),
        ));
    }

    #[test]
    fn add_group_twice_fails() {
        let (_dir, db) = open::<TestPolicy>();
        db.add_group(group(1), TestMetadata::default()).unwrap();
        assert!(matches!(
            db.add_group(group(1), TestMetadata::default()),
            Err(VaultError::AccountAlreadyExists),
        ));
    }

    #[test]
    fn group_ids_stay_unique() {
        let (_dir, db) = open::<TestPolicy>();
        for fill in 0..100u8 {
            db.add_group(group(fill), TestMetadata::default()).unwrap();
        }
        let inner = db.lock();
        let mut ids: Vec<GroupId> =
            inner.groups.values().map(|e| e.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(100, ids.len());
    }

    #[test]
    fn commit_record_put_then_get() {
        let (_dir, db) = open::<TestPolicy>();
        db.add_group(group(1), TestMetadata::default()).unwrap();
        let k = key(1, 2);
        let removed = db
            .commit_record(&k, |metadata, value| {
                metadata.x += 1;
                *value = Some(TestValue(Bytes::from_static(b"v1")));
                Ok(DbAction::Put)
            })
            .unwrap();
        assert!(removed.is_none());
        assert_eq!(
            TestValue(Bytes::from_static(b"v1")),
            db.get_value(&k).unwrap(),
        );
        assert_eq!(1, db.get_metadata(&group(1)).unwrap().x);
    }

    #[test]
    fn commit_record_delete_returns_prior_value() {
        let (_dir, db) = open::<TestPolicy>();
        db.add_group(group(1), TestMetadata::default()).unwrap();
        let k = key(1, 2);
        db.commit_record(&k, |_, value| {
            *value = Some(TestValue(Bytes::from_static(b"v1")));
            Ok(DbAction::Put)
        })
        .unwrap();
        let removed = db
            .commit_record(&k, |_, _| Ok(DbAction::Delete))
            .unwrap();
        assert_eq!(Some(TestValue(Bytes::from_static(b"v1"))), removed);
        assert!(matches!(
            db.get_value(&k),
            Err(VaultError::NoSuchElement),
        ));
    }

    #[test]
    fn delete_of_absent_record_is_a_noop() {
        let (_dir, db) = open::<TestPolicy>();
        db.add_group(group(1), TestMetadata::default()).unwrap();
        let removed = db
            .commit_record(&key(1, 2), |_, _| Ok(DbAction::Delete))
            .unwrap();
        assert!(removed.is_none());
    }

    #[test]
    fn put_without_value_is_a_null_pointer() {
        let (_dir, db) = open::<TestPolicy>();
        db.add_group(group(1), TestMetadata::default()).unwrap();
        assert!(matches!(
            db.commit_record(&key(1, 2), |_, _| Ok(DbAction::Put)),
            Err(VaultError::NullPointer),
        ));
    }

    #[test]
    fn commit_on_missing_group_refused_by_default_policy() {
        let (_dir, db) = open::<TestPolicy>();
        assert!(matches!(
            db.commit_metadata(&group(1), |_| Ok(())),
            Err(VaultError::NoSuchAccount),
        ));
        assert!(matches!(
            db.commit_record(&key(1, 2), |_, _| Ok(DbAction::Delete)),
            Err(VaultError::NoSuchAccount),
        ));
    }

    #[test]
    fn creating_policy_builds_group_on_first_commit() {
        let (_dir, db) = open::<CreatingPolicy>();
        db.commit_record(&key(1, 2), |metadata, value| {
            metadata.x = 7;
            *value = Some(TestValue(Bytes::from_static(b"v")));
            Ok(DbAction::Put)
        })
        .unwrap();
        assert_eq!(7, db.get_metadata(&group(1)).unwrap().x);
    }

    #[test]
    fn failed_commit_leaves_metadata_and_value_unchanged() {
        let (_dir, db) = open::<TestPolicy>();
        db.add_group(group(1), TestMetadata { x: 5 }).unwrap();
        let k = key(1, 2);
        db.commit_record(&k, |_, value| {
            *value = Some(TestValue(Bytes::from_static(b"old")));
            Ok(DbAction::Put)
        })
        .unwrap();

        let result = db.commit_record(&k, |metadata, value| {
            metadata.x = 99;
            *value = Some(TestValue(Bytes::from_static(b"new")));
            Err(VaultError::failed("functor bails"))
        });
        assert!(result.is_err());
        assert_eq!(5, db.get_metadata(&group(1)).unwrap().x);
        assert_eq!(
            TestValue(Bytes::from_static(b"old")),
            db.get_value(&k).unwrap(),
        );
    }

    #[test]
    fn aborted_commit_never_persists_metadata() {
        let (_dir, db) = open::<CreatingPolicy>();
        db.add_group(group(1), TestMetadata { x: 1 }).unwrap();
        let result = db.commit_metadata(&group(1), |metadata| {
            metadata.x = 99;
            Err(VaultError::failed("functor bails"))
        });
        assert!(result.is_err());
        // no metadata row was written for the aborted commit
        let inner = db.lock();
        let entry = inner.groups.get(&group(1)).unwrap();
        assert_eq!(
            None,
            inner.backend.get(&metadata_key(entry.id)).unwrap(),
        );
    }

    #[test]
    fn successful_commit_persists_metadata_via_hook() {
        let (_dir, db) = open::<CreatingPolicy>();
        db.add_group(group(1), TestMetadata::default()).unwrap();
        db.commit_metadata(&group(1), |metadata| {
            metadata.x = 3;
            Ok(())
        })
        .unwrap();
        let inner = db.lock();
        let entry = inner.groups.get(&group(1)).unwrap();
        let row = inner.backend.get(&metadata_key(entry.id)).unwrap().unwrap();
        assert_eq!(TestMetadata { x: 3 }, TestMetadata::from_bytes(&row).unwrap());
    }

    #[test]
    fn contents_round_trip_through_transfer() {
        let (_dir, a) = open::<TestPolicy>();
        a.add_group(group(1), TestMetadata { x: 11 }).unwrap();
        for data_fill in [2u8, 3] {
            a.commit_record(&key(1, data_fill), |_, value| {
                *value = Some(TestValue(Bytes::from(vec![data_fill; 3])));
                Ok(DbAction::Put)
            })
            .unwrap();
        }

        let contents = a.get_contents(&group(1)).unwrap();
        let (_dir_b, b) = open::<TestPolicy>();
        b.handle_transfer(
            Contents::decode(contents.encode()).unwrap(),
        )
        .unwrap();

        assert_eq!(TestMetadata { x: 11 }, b.get_metadata(&group(1)).unwrap());
        assert_eq!(
            TestValue(Bytes::from(vec![2u8; 3])),
            b.get_value(&key(1, 2)).unwrap(),
        );
        assert_eq!(
            TestValue(Bytes::from(vec![3u8; 3])),
            b.get_value(&key(1, 3)).unwrap(),
        );
        let echoed = b.get_contents(&group(1)).unwrap();
        assert_eq!(2, echoed.kv_pairs.len());
    }

    #[test]
    fn duplicate_transfer_is_tolerated() {
        let (_dir, a) = open::<TestPolicy>();
        a.add_group(group(1), TestMetadata::default()).unwrap();
        a.commit_record(&key(1, 2), |_, value| {
            *value = Some(TestValue(Bytes::from_static(b"v")));
            Ok(DbAction::Put)
        })
        .unwrap();
        let (_dir_b, b) = open::<TestPolicy>();
        b.handle_transfer(a.get_contents(&group(1)).unwrap()).unwrap();
        b.handle_transfer(a.get_contents(&group(1)).unwrap()).unwrap();
        assert_eq!(
            TestValue(Bytes::from_static(b"v")),
            b.get_value(&key(1, 2)).unwrap(),
        );
    }

    fn node(fill: u8) -> NodeId {
        NodeId::from(id(fill))
    }

    #[test]
    fn out_of_range_groups_are_pruned() {
        let (_dir, db) = open::<TestPolicy>();
        // this node is 0x01; group 0x00 stays close, group 0xf0 moves away
        db.add_group(group(0x00), TestMetadata::default()).unwrap();
        db.add_group(group(0xf0), TestMetadata::default()).unwrap();
        let old = vec![node(0x02), node(0x03), node(0x04)];
        let mut new = old.clone();
        // four joiners closer to 0xf0 than this node
        new.extend([node(0xf1), node(0xf2), node(0xf3), node(0xf4)]);
        let change = MatrixChange::new(node(0x01), old, new);

        let info = db.get_transfer_info(&change).unwrap();

        // group 0x00: still in range and its close group gained no member
        // nearer than the incumbents, so nothing to transfer
        assert!(info
            .values()
            .flatten()
            .all(|c| c.group_name != group(0x00)));
        assert!(db.get_metadata(&group(0x00)).is_ok());
        // group 0xf0: out of range now, pruned
        assert!(matches!(
            db.get_metadata(&group(0xf0)),
            Err(VaultError::NoSuchAccount),
        ));
    }

    #[test]
    fn new_holder_receives_departing_group_contents() {
        let (_dir, db) = open::<TestPolicy>();
        db.add_group(group(0x00), TestMetadata { x: 9 }).unwrap();
        db.commit_record(&key(0x00, 5), |_, value| {
            *value = Some(TestValue(Bytes::from_static(b"v")));
            Ok(DbAction::Put)
        })
        .unwrap();
        let old = vec![node(0x40), node(0x50), node(0x60)];
        let mut new = old.clone();
        new.push(node(0x02));
        let change = MatrixChange::new(node(0x01), old, new);

        let info = db.get_transfer_info(&change).unwrap();
        let contents = &info.get(&node(0x02)).unwrap()[0];
        assert_eq!(group(0x00), contents.group_name);
        assert_eq!(1, contents.kv_pairs.len());
        // still in range ourselves, so not pruned
        assert!(db.get_metadata(&group(0x00)).is_ok());
    }

    #[test]
    fn delete_group_missing_is_silent() {
        let (_dir, db) = open::<TestPolicy>();
        db.delete_group(&group(9)).unwrap();
    }

    #[test]
    fn delete_group_removes_records() {
        let (_dir, db) = open::<TestPolicy>();
        db.add_group(group(1), TestMetadata::default()).unwrap();
        db.commit_record(&key(1, 2), |_, value| {
            *value = Some(TestValue(Bytes::from_static(b"v")));
            Ok(DbAction::Put)
        })
        .unwrap();
        db.delete_group(&group(1)).unwrap();
        assert!(matches!(
            db.get_value(&key(1, 2)),
            Err(VaultError::NoSuchAccount),
        ));
        // re-adding starts clean
        db.add_group(group(1), TestMetadata::default()).unwrap();
        assert!(db.get_contents(&group(1)).unwrap().kv_pairs.is_empty());
    }
}
