//! The routing-matrix view consumed from the overlay.
//!
//! The routing layer notifies the vault of close-group membership changes as
//! a [MatrixChange]: the local node's view of the overlay before and after
//! the change. The vault only ever asks one question of it: for a given
//! target identity, who held the close group before, who holds it now, and
//! is this node still one of the holders.

use crate::{Id, NodeId};

/// The number of nodes custodially responsible for any identity.
pub const CLOSE_GROUP_SIZE: usize = 4;

/// Whether the local node is a close-group holder of a target identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRangeStatus {
    /// The local node is in the target's close group.
    InRange,
    /// The local node is no longer in the target's close group.
    OutOfRange,
}

/// The answer to [MatrixChange::check_holders] for one target identity.
#[derive(Debug, Clone)]
pub struct CheckHoldersResult {
    /// The local node's own membership in the target's close group, after
    /// the change.
    pub proximity_status: GroupRangeStatus,

    /// Close-group members that joined with this change, nearest first.
    pub new_holders: Vec<NodeId>,

    /// Close-group members that left with this change, nearest first.
    pub old_holders: Vec<NodeId>,
}

/// A routing-layer notification summarising additions and removals in the
/// local node's view of the overlay.
#[derive(Debug, Clone)]
pub struct MatrixChange {
    node_id: NodeId,
    old_matrix: Vec<NodeId>,
    new_matrix: Vec<NodeId>,
    group_size: usize,
}

impl MatrixChange {
    /// Build a matrix change for `node_id` from its old and new overlay
    /// views. The local node is always a member of both views.
    pub fn new(
        node_id: NodeId,
        old_matrix: Vec<NodeId>,
        new_matrix: Vec<NodeId>,
    ) -> Self {
        Self::with_group_size(
            node_id,
            old_matrix,
            new_matrix,
            CLOSE_GROUP_SIZE,
        )
    }

    /// As [MatrixChange::new] with an explicit close-group size.
    pub fn with_group_size(
        node_id: NodeId,
        mut old_matrix: Vec<NodeId>,
        mut new_matrix: Vec<NodeId>,
        group_size: usize,
    ) -> Self {
        for matrix in [&mut old_matrix, &mut new_matrix] {
            if !matrix.contains(&node_id) {
                matrix.push(node_id.clone());
            }
            matrix.sort();
            matrix.dedup();
        }
        Self {
            node_id,
            old_matrix,
            new_matrix,
            group_size,
        }
    }

    /// The local node this change was delivered to.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// For a target identity, report the close-group delta and whether the
    /// local node remains a holder.
    pub fn check_holders(&self, target: &NodeId) -> CheckHoldersResult {
        let old_group = close_group(&self.old_matrix, target, self.group_size);
        let new_group = close_group(&self.new_matrix, target, self.group_size);

        let proximity_status = if new_group.contains(&self.node_id) {
            GroupRangeStatus::InRange
        } else {
            GroupRangeStatus::OutOfRange
        };

        let new_holders = new_group
            .iter()
            .filter(|n| !old_group.contains(n))
            .cloned()
            .collect();
        let old_holders = old_group
            .iter()
            .filter(|n| !new_group.contains(n))
            .cloned()
            .collect();

        CheckHoldersResult {
            proximity_status,
            new_holders,
            old_holders,
        }
    }
}

/// The `group_size` members of `matrix` nearest to `target` by XOR
/// distance, nearest first.
fn close_group(
    matrix: &[NodeId],
    target: &NodeId,
    group_size: usize,
) -> Vec<NodeId> {
    let mut sorted: Vec<NodeId> = matrix.to_vec();
    let target: &Id = target;
    sorted.sort_by(|a, b| a.cmp_distance(b, target));
    sorted.truncate(group_size);
    sorted
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ID_LEN;

    fn node(fill: u8) -> NodeId {
        NodeId::from(bytes::Bytes::from(vec![fill; ID_LEN]))
    }

    #[test]
    fn close_group_is_nearest_k() {
        let target = node(0x00);
        let matrix =
            vec![node(0x01), node(0x02), node(0x04), node(0x08), node(0x80)];
        let group = close_group(&matrix, &target, 4);
        assert_eq!(
            vec![node(0x01), node(0x02), node(0x04), node(0x08)],
            group,
        );
    }

    #[test]
    fn still_in_range_no_new_holders() {
        let me = node(0x01);
        let matrix = vec![node(0x02), node(0x03), node(0x04)];
        let change =
            MatrixChange::new(me.clone(), matrix.clone(), matrix.clone());
        let result = change.check_holders(&node(0x00));
        assert_eq!(GroupRangeStatus::InRange, result.proximity_status);
        assert!(result.new_holders.is_empty());
        assert!(result.old_holders.is_empty());
    }

    #[test]
    fn pushed_out_of_range_by_nearer_joiners() {
        let me = node(0x70);
        let old = vec![node(0x71), node(0x72), node(0x73)];
        // Four nodes nearer the target than any of the old group arrive.
        let mut new = old.clone();
        new.extend([node(0x01), node(0x02), node(0x03), node(0x04)]);
        let change = MatrixChange::new(me, old, new);
        let result = change.check_holders(&node(0x00));
        assert_eq!(GroupRangeStatus::OutOfRange, result.proximity_status);
        assert_eq!(4, result.new_holders.len());
        assert_eq!(4, result.old_holders.len());
    }

    #[test]
    fn single_joiner_reported_as_new_holder() {
        let me = node(0x01);
        let old = vec![node(0x40), node(0x50), node(0x60)];
        let mut new = old.clone();
        new.push(node(0x02));
        let change = MatrixChange::new(me.clone(), old, new);
        let result = change.check_holders(&node(0x00));
        assert_eq!(GroupRangeStatus::InRange, result.proximity_status);
        assert_eq!(vec![node(0x02)], result.new_holders);
        assert_eq!(vec![node(0x60)], result.old_holders);
    }
}
