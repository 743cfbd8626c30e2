//! The version tree itself.

use crate::VersionName;
use bytes::BufMut;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use vault2_api::{wire, VaultError, VaultResult};

#[derive(Debug)]
struct Node {
    parent: Option<VersionName>,
    children: Vec<VersionName>,
}

/// A bounded branching version history.
///
/// Holds at most `max_versions` stored versions across at most
/// `max_branches` branches. Inserts whose declared parent has not arrived
/// yet wait in a FIFO orphan buffer of `max_versions` entries.
#[derive(Debug)]
pub struct StructuredDataVersions {
    max_versions: usize,
    max_branches: usize,
    nodes: BTreeMap<VersionName, Node>,
    root: Option<VersionName>,
    tips: BTreeSet<VersionName>,
    orphans: VecDeque<(VersionName, VersionName)>,
}

impl StructuredDataVersions {
    /// Construct an empty tree with the given bounds.
    pub fn new(
        max_versions: usize,
        max_branches: usize,
    ) -> VaultResult<Self> {
        if max_versions == 0 || max_branches == 0 {
            return Err(VaultError::failed(
                "version tree bounds must be non-zero",
            ));
        }
        Ok(Self {
            max_versions,
            max_branches,
            nodes: BTreeMap::new(),
            root: None,
            tips: BTreeSet::new(),
            orphans: VecDeque::new(),
        })
    }

    /// The configured version bound.
    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// The configured branch bound.
    pub fn max_branches(&self) -> usize {
        self.max_branches
    }

    /// Number of stored versions (orphans excluded).
    pub fn version_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of branches.
    pub fn branch_count(&self) -> usize {
        self.tips.len()
    }

    /// True when no versions are stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `version` is currently stored.
    pub fn contains(&self, version: &VersionName) -> bool {
        self.nodes.contains_key(version)
    }

    /// Insert `new` as the child of `old`, or as the root when `old` is
    /// `None`.
    ///
    /// An insert whose parent is unknown is buffered, not an error: close
    /// groups receive puts in whatever order quorum resolves them. A
    /// duplicate insert at the same parent is idempotent.
    pub fn put(
        &mut self,
        old: Option<&VersionName>,
        new: VersionName,
    ) -> VaultResult<()> {
        if let Some(existing) = self.nodes.get(&new) {
            if existing.parent.as_ref() == old {
                return Ok(());
            }
            return Err(VaultError::VersionAlreadyExists);
        }

        match old {
            None => {
                if !self.nodes.is_empty() {
                    return Err(VaultError::CannotOverwriteExistingRoot);
                }
                self.nodes.insert(
                    new.clone(),
                    Node {
                        parent: None,
                        children: Vec::new(),
                    },
                );
                self.root = Some(new.clone());
                self.tips.insert(new.clone());
                self.resolve_orphans();
                self.evict();
                Ok(())
            }
            Some(parent) => {
                if !self.nodes.contains_key(parent) {
                    self.buffer_orphan(parent.clone(), new);
                    return Ok(());
                }
                if new.index != parent.index + 1 {
                    return Err(VaultError::invalid_message(format!(
                        "version index {} does not follow parent {}",
                        new.index, parent.index,
                    )));
                }
                self.attach(parent.clone(), new);
                self.resolve_orphans();
                self.evict();
                Ok(())
            }
        }
    }

    /// Current branch tips, newest first (index descending, ties by id
    /// ascending).
    pub fn get_versions(&self) -> Vec<VersionName> {
        let mut tips: Vec<VersionName> = self.tips.iter().cloned().collect();
        tips.sort_by(|a, b| {
            b.index.cmp(&a.index).then_with(|| a.id.cmp(&b.id))
        });
        tips
    }

    /// The versions from `tip` back to the root, newest first.
    pub fn get_branch(
        &self,
        tip: &VersionName,
    ) -> VaultResult<Vec<VersionName>> {
        if !self.nodes.contains_key(tip) {
            return Err(VaultError::VersionNotFound);
        }
        let mut out = Vec::new();
        let mut current = Some(tip.clone());
        while let Some(version) = current {
            current = self
                .nodes
                .get(&version)
                .and_then(|n| n.parent.clone());
            out.push(version);
        }
        Ok(out)
    }

    /// Remove the branch ending at `tip`: walk towards the root deleting
    /// nodes until a fork is reached (the fork itself stays) or the root
    /// has been removed.
    pub fn delete_branch_until_fork(
        &mut self,
        tip: &VersionName,
    ) -> VaultResult<()> {
        if !self.tips.contains(tip) {
            return Err(VaultError::NoBranchToDelete);
        }
        let mut current = tip.clone();
        loop {
            let node = self
                .nodes
                .remove(&current)
                .expect("walked to a version not in the tree");
            self.tips.remove(&current);
            match node.parent {
                None => {
                    self.root = None;
                    break;
                }
                Some(parent) => {
                    let parent_node = self
                        .nodes
                        .get_mut(&parent)
                        .expect("parent of a stored version must be stored");
                    parent_node.children.retain(|c| c != &current);
                    if parent_node.children.is_empty() {
                        current = parent;
                    } else {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn attach(&mut self, parent: VersionName, child: VersionName) {
        self.nodes
            .get_mut(&parent)
            .expect("attach called with unknown parent")
            .children
            .push(child.clone());
        self.tips.remove(&parent);
        self.nodes.insert(
            child.clone(),
            Node {
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        self.tips.insert(child);
    }

    fn buffer_orphan(&mut self, parent: VersionName, child: VersionName) {
        if self.orphans.iter().any(|(p, c)| p == &parent && c == &child) {
            return;
        }
        self.orphans.push_back((parent, child));
        if self.orphans.len() > self.max_versions {
            let dropped = self.orphans.pop_front();
            tracing::warn!(?dropped, "orphan buffer full, dropped oldest");
        }
    }

    /// Attach every buffered orphan whose declared parent has arrived.
    /// Each pass over the buffer attaches at least one node or stops, so
    /// resolution is bounded by the node count.
    fn resolve_orphans(&mut self) {
        let mut progress = true;
        while progress {
            progress = false;
            let mut i = 0;
            while i < self.orphans.len() {
                if !self.nodes.contains_key(&self.orphans[i].0) {
                    i += 1;
                    continue;
                }
                let (parent, child) = self
                    .orphans
                    .remove(i)
                    .expect("index checked against len");
                if self.nodes.contains_key(&child) {
                    continue;
                }
                if child.index != parent.index + 1 {
                    tracing::warn!(
                        %parent, %child,
                        "dropping orphan with wrong index",
                    );
                    continue;
                }
                self.attach(parent, child);
                progress = true;
            }
        }
    }

    fn evict(&mut self) {
        while self.nodes.len() > self.max_versions {
            if !self.evict_one_version() {
                break;
            }
        }
        while self.tips.len() > self.max_branches {
            if !self.evict_oldest_tip() {
                break;
            }
        }
    }

    /// Trim history at the root end: drop the root and promote its sole
    /// child. A root with several children cannot be dropped without
    /// splitting the tree, so the stalest branch end goes instead.
    fn evict_one_version(&mut self) -> bool {
        let Some(root) = self.root.clone() else {
            return false;
        };
        let children = &self
            .nodes
            .get(&root)
            .expect("root must be stored")
            .children;
        match children.len() {
            0 => self.evict_oldest_tip(),
            1 => {
                let heir = children[0].clone();
                self.nodes.remove(&root);
                self.tips.remove(&root);
                self.nodes
                    .get_mut(&heir)
                    .expect("child of root must be stored")
                    .parent = None;
                self.root = Some(heir);
                true
            }
            _ => self.evict_oldest_tip(),
        }
    }

    fn evict_oldest_tip(&mut self) -> bool {
        let Some(oldest) = self
            .tips
            .iter()
            .min_by(|a, b| a.age_key().cmp(&b.age_key()))
            .cloned()
        else {
            return false;
        };
        let node = self
            .nodes
            .remove(&oldest)
            .expect("tip must be stored");
        self.tips.remove(&oldest);
        match node.parent {
            None => self.root = None,
            Some(parent) => {
                let parent_node = self
                    .nodes
                    .get_mut(&parent)
                    .expect("parent of a stored version must be stored");
                parent_node.children.retain(|c| c != &oldest);
                if parent_node.children.is_empty() {
                    self.tips.insert(parent);
                }
            }
        }
        true
    }

    /// Encode to the stable wire form.
    pub fn encode(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::new();
        buf.put_u32_le(self.max_versions as u32);
        buf.put_u32_le(self.max_branches as u32);
        buf.put_u32_le(self.nodes.len() as u32);
        for (version, node) in &self.nodes {
            version.encode_into(&mut buf);
            match &node.parent {
                None => buf.put_u8(0),
                Some(parent) => {
                    buf.put_u8(1);
                    parent.encode_into(&mut buf);
                }
            }
        }
        buf.put_u32_le(self.orphans.len() as u32);
        for (parent, child) in &self.orphans {
            parent.encode_into(&mut buf);
            child.encode_into(&mut buf);
        }
        buf.freeze()
    }

    /// Parse the stable wire form.
    pub fn decode(mut bytes: bytes::Bytes) -> VaultResult<Self> {
        let max_versions =
            wire::get_u32_le(&mut bytes, "max_versions")? as usize;
        let max_branches =
            wire::get_u32_le(&mut bytes, "max_branches")? as usize;
        let mut out = Self::new(max_versions, max_branches)?;

        let node_count = wire::get_u32_le(&mut bytes, "node count")?;
        let mut parents = Vec::new();
        for _ in 0..node_count {
            let version = VersionName::decode_from(&mut bytes)?;
            let parent = match wire::get_u8(&mut bytes, "parent flag")? {
                0 => None,
                1 => Some(VersionName::decode_from(&mut bytes)?),
                flag => {
                    return Err(VaultError::invalid_message(format!(
                        "bad parent flag {flag}"
                    )))
                }
            };
            if parent.is_none() {
                if out.root.is_some() {
                    return Err(VaultError::invalid_message(
                        "version tree with two roots",
                    ));
                }
                out.root = Some(version.clone());
            } else {
                parents.push((version.clone(), parent.clone()));
            }
            out.nodes.insert(
                version,
                Node {
                    parent,
                    children: Vec::new(),
                },
            );
        }
        for (child, parent) in parents {
            let parent = parent.expect("only parented entries collected");
            if !out.nodes.contains_key(&parent) {
                return Err(VaultError::invalid_message(
                    "version tree edge to unknown parent",
                ));
            }
            out.nodes
                .get_mut(&parent)
                .expect("presence checked above")
                .children
                .push(child);
        }
        out.tips = out
            .nodes
            .iter()
            .filter(|(_, n)| n.children.is_empty())
            .map(|(v, _)| v.clone())
            .collect();

        let orphan_count = wire::get_u32_le(&mut bytes, "orphan count")?;
        for _ in 0..orphan_count {
            let parent = VersionName::decode_from(&mut bytes)?;
            let child = VersionName::decode_from(&mut bytes)?;
            out.orphans.push_back((parent, child));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vault2_api::{Id, ID_LEN};

    fn id(fill: u8) -> Id {
        Id(bytes::Bytes::from(vec![fill; ID_LEN]))
    }

    fn v(index: u64, fill: u8) -> VersionName {
        VersionName::new(index, id(fill))
    }

    #[test]
    fn root_put_and_get() {
        let mut sdv = StructuredDataVersions::new(100, 20).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        assert_eq!(vec![v(0, b'a')], sdv.get_versions());
    }

    #[test]
    fn second_root_rejected_but_same_root_idempotent() {
        let mut sdv = StructuredDataVersions::new(100, 20).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        assert!(matches!(
            sdv.put(None, v(0, b'b')),
            Err(VaultError::CannotOverwriteExistingRoot),
        ));
    }

    #[test]
    fn duplicate_at_other_parent_rejected() {
        let mut sdv = StructuredDataVersions::new(100, 20).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        sdv.put(Some(&v(0, b'a')), v(1, b'b')).unwrap();
        sdv.put(Some(&v(1, b'b')), v(2, b'c')).unwrap();
        assert!(matches!(
            sdv.put(Some(&v(0, b'a')), v(2, b'c')),
            Err(VaultError::VersionAlreadyExists),
        ));
    }

    #[test]
    fn wrong_index_rejected() {
        let mut sdv = StructuredDataVersions::new(100, 20).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        assert!(sdv.put(Some(&v(0, b'a')), v(5, b'b')).is_err());
    }

    #[test]
    fn fork_and_delete_branch_until_fork() {
        // v0 -> v1 -> v2c -> v3 -> v4i
        //          \-> v2d
        let mut sdv = StructuredDataVersions::new(100, 20).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        sdv.put(Some(&v(0, b'a')), v(1, b'b')).unwrap();
        sdv.put(Some(&v(1, b'b')), v(2, b'c')).unwrap();
        sdv.put(Some(&v(2, b'c')), v(3, b'f')).unwrap();
        sdv.put(Some(&v(1, b'b')), v(2, b'd')).unwrap();
        sdv.put(Some(&v(3, b'f')), v(4, b'i')).unwrap();

        let versions = sdv.get_versions();
        assert!(versions.contains(&v(4, b'i')));
        assert!(versions.contains(&v(2, b'd')));

        sdv.delete_branch_until_fork(&v(4, b'i')).unwrap();

        assert!(!sdv.contains(&v(4, b'i')));
        assert!(!sdv.contains(&v(3, b'f')));
        assert!(!sdv.contains(&v(2, b'c')));
        assert!(sdv.contains(&v(2, b'd')));
        assert!(sdv.contains(&v(1, b'b')));
        assert!(sdv.contains(&v(0, b'a')));

        let versions = sdv.get_versions();
        assert!(versions.contains(&v(2, b'd')));
        assert!(!versions.contains(&v(4, b'i')));
    }

    #[test]
    fn delete_branch_to_root_empties_tree() {
        let mut sdv = StructuredDataVersions::new(100, 20).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        sdv.put(Some(&v(0, b'a')), v(1, b'b')).unwrap();
        sdv.delete_branch_until_fork(&v(1, b'b')).unwrap();
        assert!(sdv.is_empty());
        assert!(sdv.get_versions().is_empty());
    }

    #[test]
    fn delete_branch_requires_a_tip() {
        let mut sdv = StructuredDataVersions::new(100, 20).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        sdv.put(Some(&v(0, b'a')), v(1, b'b')).unwrap();
        assert!(matches!(
            sdv.delete_branch_until_fork(&v(0, b'a')),
            Err(VaultError::NoBranchToDelete),
        ));
        assert!(matches!(
            sdv.delete_branch_until_fork(&v(7, b'z')),
            Err(VaultError::NoBranchToDelete),
        ));
    }

    #[test]
    fn orphans_attach_when_parent_arrives() {
        let mut sdv = StructuredDataVersions::new(100, 20).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        sdv.put(Some(&v(1, b'b')), v(2, b'c')).unwrap();
        assert!(!sdv.contains(&v(2, b'c')));

        sdv.put(Some(&v(0, b'a')), v(1, b'b')).unwrap();

        assert_eq!(vec![v(2, b'c')], sdv.get_versions());
        assert!(sdv.contains(&v(1, b'b')));
        assert_eq!(
            vec![v(2, b'c'), v(1, b'b'), v(0, b'a')],
            sdv.get_branch(&v(2, b'c')).unwrap(),
        );
    }

    #[test]
    fn orphan_buffer_is_fifo_bounded() {
        let mut sdv = StructuredDataVersions::new(3, 20).unwrap();
        for fill in 0..4u8 {
            sdv.put(Some(&v(10, fill)), v(11, 100 + fill)).unwrap();
        }
        assert_eq!(3, sdv.orphans.len());
        // the first orphan was dropped
        assert!(!sdv
            .orphans
            .iter()
            .any(|(p, _)| p == &v(10, 0)));
    }

    #[test]
    fn version_bound_evicts_root_first() {
        let mut sdv = StructuredDataVersions::new(3, 20).unwrap();
        sdv.put(None, v(0, 0)).unwrap();
        for i in 1..=4u64 {
            sdv.put(Some(&v(i - 1, (i - 1) as u8)), v(i, i as u8))
                .unwrap();
        }
        assert_eq!(3, sdv.version_count());
        // newest survive, oldest history trimmed
        assert!(sdv.contains(&v(4, 4)));
        assert!(sdv.contains(&v(3, 3)));
        assert!(sdv.contains(&v(2, 2)));
        assert!(!sdv.contains(&v(0, 0)));
        assert!(!sdv.contains(&v(1, 1)));
        // the promoted root still walks to a branch
        assert_eq!(
            vec![v(4, 4), v(3, 3), v(2, 2)],
            sdv.get_branch(&v(4, 4)).unwrap(),
        );
    }

    #[test]
    fn branch_bound_evicts_oldest_tip() {
        let mut sdv = StructuredDataVersions::new(100, 2).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        sdv.put(Some(&v(0, b'a')), v(1, b'b')).unwrap();
        sdv.put(Some(&v(0, b'a')), v(1, b'c')).unwrap();
        assert_eq!(2, sdv.branch_count());
        sdv.put(Some(&v(0, b'a')), v(1, b'd')).unwrap();
        assert_eq!(2, sdv.branch_count());
        // v1:b was the oldest tip (smallest index, lowest id)
        assert!(!sdv.contains(&v(1, b'b')));
        assert!(sdv.contains(&v(1, b'c')));
        assert!(sdv.contains(&v(1, b'd')));
    }

    #[test]
    fn bounds_hold_over_random_growth() {
        let mut sdv = StructuredDataVersions::new(8, 3).unwrap();
        sdv.put(None, v(0, 0)).unwrap();
        let mut frontier = vec![v(0, 0)];
        for step in 1..60u64 {
            let parent = frontier[(step as usize * 7) % frontier.len()].clone();
            let child = v(parent.index + 1, step as u8);
            if sdv.put(Some(&parent), child.clone()).is_ok()
                && sdv.contains(&child)
            {
                frontier.push(child);
            }
            frontier.retain(|f| sdv.contains(f));
            if frontier.is_empty() {
                break;
            }
            assert!(sdv.version_count() <= 8);
            assert!(sdv.branch_count() <= 3);
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut sdv = StructuredDataVersions::new(100, 20).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        sdv.put(Some(&v(0, b'a')), v(1, b'b')).unwrap();
        sdv.put(Some(&v(1, b'b')), v(2, b'c')).unwrap();
        sdv.put(Some(&v(1, b'b')), v(2, b'd')).unwrap();
        sdv.put(Some(&v(9, b'x')), v(10, b'y')).unwrap();

        let decoded =
            StructuredDataVersions::decode(sdv.encode()).unwrap();
        assert_eq!(sdv.max_versions(), decoded.max_versions());
        assert_eq!(sdv.max_branches(), decoded.max_branches());
        assert_eq!(sdv.version_count(), decoded.version_count());
        assert_eq!(sdv.get_versions(), decoded.get_versions());
        assert_eq!(
            sdv.get_branch(&v(2, b'c')).unwrap(),
            decoded.get_branch(&v(2, b'c')).unwrap(),
        );
        assert_eq!(sdv.orphans, decoded.orphans);
    }

    #[test]
    fn decode_rejects_double_root() {
        let mut sdv = StructuredDataVersions::new(10, 10).unwrap();
        sdv.put(None, v(0, b'a')).unwrap();
        let mut enc = bytes::BytesMut::from(&sdv.encode()[..]);
        // claim two nodes, both parentless
        enc[8] = 2;
        let version = v(0, b'b');
        let mut extra = bytes::BytesMut::new();
        version.encode_into(&mut extra);
        extra.put_u8(0);
        let insert_at = enc.len() - 4;
        let tail = enc.split_off(insert_at);
        enc.extend_from_slice(&extra);
        enc.extend_from_slice(&tail);
        assert!(StructuredDataVersions::decode(enc.freeze()).is_err());
    }
}
