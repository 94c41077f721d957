use serde::{Deserialize, Serialize};

use super::common::RoleKind;

/// A role assignment the synchronizer granted on an event. The set of these
/// rows per (event, role kind) is the synchronized baseline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub evento_event_id: i64,
    pub evento_user_id: i64,
    /// Target platform user the role was granted to.
    pub user_id: i64,
    pub role_kind: RoleKind,
}

/// Outcome of one synchronization pass for a single event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MembershipDelta {
    pub assigned: Vec<(i64, RoleKind)>,
    pub deassigned: Vec<(i64, RoleKind)>,
    pub parent_assigned: usize,
    pub parent_deassigned: usize,
    /// Roster entries whose account has no mapping yet.
    pub unknown_members: Vec<i64>,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
            && self.deassigned.is_empty()
            && self.parent_assigned == 0
            && self.parent_deassigned == 0
    }

    pub fn merge(&mut self, other: MembershipDelta) {
        self.assigned.extend(other.assigned);
        self.deassigned.extend(other.deassigned);
        self.parent_assigned += other.parent_assigned;
        self.parent_deassigned += other.parent_deassigned;
        self.unknown_members.extend(other.unknown_members);
    }
}
