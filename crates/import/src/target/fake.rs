//! In-memory target platform used by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use evento_core::error::{EventoError, Result};

use super::{
    ContainerRoles, CreatedContainer, NewContainer, ObjectType, TargetObjects, TargetRoles,
    TargetTree, TargetUser, TargetUsers, TreeNode, UserProfile,
};

#[derive(Default)]
pub(crate) struct FakeState {
    pub nodes: BTreeMap<i64, TreeNode>,
    pub roles: BTreeMap<i64, ContainerRoles>,
    pub descriptions: BTreeMap<i64, Option<String>>,
    pub owners: BTreeMap<i64, Option<i64>>,
    pub assignments: BTreeSet<(i64, i64)>,
    pub favourites: BTreeSet<(i64, i64)>,
    pub users: BTreeMap<i64, TargetUser>,
    pub profiles: BTreeMap<i64, UserProfile>,
    pub next_id: i64,
    pub assign_calls: usize,
    pub deassign_calls: usize,
}

pub(crate) struct FakeTarget {
    pub state: Mutex<FakeState>,
}

impl FakeTarget {
    pub fn new() -> Self {
        let target = Self {
            state: Mutex::new(FakeState {
                next_id: 1000,
                ..Default::default()
            }),
        };
        target.add_node(super::ROOT_REF_ID, None, ObjectType::Root, "Repository");
        target
    }

    pub fn add_node(&self, ref_id: i64, parent: Option<i64>, object_type: ObjectType, title: &str) {
        self.state.lock().unwrap().nodes.insert(
            ref_id,
            TreeNode {
                ref_id,
                parent_ref_id: parent,
                object_type,
                title: title.to_string(),
                deleted: false,
            },
        );
    }

    /// Add a course or group with roles `ref*10+1` (admin) and `ref*10+2` (member).
    pub fn add_container(
        &self,
        ref_id: i64,
        parent: i64,
        object_type: ObjectType,
        title: &str,
    ) -> ContainerRoles {
        self.add_node(ref_id, Some(parent), object_type, title);
        let roles = ContainerRoles {
            admin_role_id: ref_id * 10 + 1,
            member_role_id: ref_id * 10 + 2,
        };
        self.state.lock().unwrap().roles.insert(ref_id, roles);
        roles
    }

    pub fn trash(&self, ref_id: i64) {
        if let Some(node) = self.state.lock().unwrap().nodes.get_mut(&ref_id) {
            node.deleted = true;
        }
    }

    pub fn add_user(&self, user_id: i64, login: &str) {
        self.state.lock().unwrap().users.insert(
            user_id,
            TargetUser {
                user_id,
                login: login.to_string(),
                auth_mode: "ldap".to_string(),
                active: true,
                created_at: Utc::now(),
                time_limit_until: None,
            },
        );
    }

    pub fn assign(&self, role_id: i64, user_id: i64) {
        self.state
            .lock()
            .unwrap()
            .assignments
            .insert((role_id, user_id));
    }

    pub fn holders(&self, role_id: i64) -> BTreeSet<i64> {
        self.state
            .lock()
            .unwrap()
            .assignments
            .iter()
            .filter(|(r, _)| *r == role_id)
            .map(|(_, u)| *u)
            .collect()
    }

    pub fn node(&self, ref_id: i64) -> Option<TreeNode> {
        self.state.lock().unwrap().nodes.get(&ref_id).cloned()
    }

    pub fn roles_of(&self, ref_id: i64) -> Option<ContainerRoles> {
        self.state.lock().unwrap().roles.get(&ref_id).copied()
    }

    pub fn user(&self, user_id: i64) -> Option<TargetUser> {
        self.state.lock().unwrap().users.get(&user_id).cloned()
    }

    pub fn has_favourite(&self, user_id: i64, ref_id: i64) -> bool {
        self.state
            .lock()
            .unwrap()
            .favourites
            .contains(&(user_id, ref_id))
    }

    pub fn assign_calls(&self) -> usize {
        self.state.lock().unwrap().assign_calls
    }

    pub fn deassign_calls(&self) -> usize {
        self.state.lock().unwrap().deassign_calls
    }
}

fn missing(what: &str, id: i64) -> EventoError {
    EventoError::Target(format!("{what} {id} not found"))
}

#[async_trait]
impl TargetTree for FakeTarget {
    async fn get_node(&self, ref_id: i64) -> Result<Option<TreeNode>> {
        Ok(self.node(ref_id))
    }

    async fn list_children(&self, ref_id: i64) -> Result<Vec<TreeNode>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .values()
            .filter(|n| n.parent_ref_id == Some(ref_id) && !n.deleted)
            .cloned()
            .collect())
    }

    async fn find_by_title(&self, title: &str) -> Result<Vec<TreeNode>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .values()
            .filter(|n| n.title == title && !n.deleted)
            .cloned()
            .collect())
    }

    async fn move_node(&self, ref_id: i64, new_parent_ref_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(&ref_id)
            .ok_or_else(|| missing("node", ref_id))?;
        node.parent_ref_id = Some(new_parent_ref_id);
        Ok(())
    }

    async fn move_to_trash(&self, ref_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(&ref_id)
            .ok_or_else(|| missing("node", ref_id))?;
        node.deleted = true;
        Ok(())
    }
}

#[async_trait]
impl TargetObjects for FakeTarget {
    async fn create_container(&self, container: &NewContainer) -> Result<CreatedContainer> {
        let ref_id = {
            let mut state = self.state.lock().unwrap();
            if !state.nodes.contains_key(&container.parent_ref_id) {
                return Err(missing("parent", container.parent_ref_id));
            }
            state.next_id += 1;
            state.next_id
        };
        let roles = self.add_container(
            ref_id,
            container.parent_ref_id,
            container.object_type,
            &container.title,
        );
        let mut state = self.state.lock().unwrap();
        state
            .descriptions
            .insert(ref_id, container.description.clone());
        state.owners.insert(ref_id, container.owner_user_id);
        Ok(CreatedContainer {
            ref_id,
            admin_role_id: roles.admin_role_id,
            member_role_id: roles.member_role_id,
        })
    }

    async fn update_container(
        &self,
        ref_id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(&ref_id)
            .ok_or_else(|| missing("container", ref_id))?;
        node.title = title.to_string();
        state
            .descriptions
            .insert(ref_id, description.map(String::from));
        Ok(())
    }

    async fn get_container_roles(&self, ref_id: i64) -> Result<Option<ContainerRoles>> {
        Ok(self.roles_of(ref_id))
    }
}

#[async_trait]
impl TargetRoles for FakeTarget {
    async fn list_user_roles(&self, user_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .assignments
            .iter()
            .filter(|(_, u)| *u == user_id)
            .map(|(r, _)| *r)
            .collect())
    }

    async fn assign_role(&self, role_id: i64, user_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.assign_calls += 1;
        state.assignments.insert((role_id, user_id));
        Ok(())
    }

    async fn deassign_role(&self, role_id: i64, user_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deassign_calls += 1;
        state.assignments.remove(&(role_id, user_id));
        Ok(())
    }

    async fn add_favourite(&self, user_id: i64, ref_id: i64) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .favourites
            .insert((user_id, ref_id));
        Ok(())
    }

    async fn remove_favourite(&self, user_id: i64, ref_id: i64) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .favourites
            .remove(&(user_id, ref_id));
        Ok(())
    }
}

#[async_trait]
impl TargetUsers for FakeTarget {
    async fn get_user(&self, user_id: i64) -> Result<Option<TargetUser>> {
        Ok(self.user(user_id))
    }

    async fn create_user(&self, profile: &UserProfile) -> Result<TargetUser> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let user = TargetUser {
            user_id: state.next_id,
            login: profile.login.clone(),
            auth_mode: profile.auth_mode.clone(),
            active: profile.active,
            created_at: Utc::now(),
            time_limit_until: profile.time_limit_until,
        };
        state.users.insert(user.user_id, user.clone());
        state.profiles.insert(user.user_id, profile.clone());
        Ok(user)
    }

    async fn update_user(&self, user_id: i64, profile: &UserProfile) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| missing("user", user_id))?;
        user.login = profile.login.clone();
        user.auth_mode = profile.auth_mode.clone();
        user.active = profile.active;
        user.time_limit_until = profile.time_limit_until;
        state.profiles.insert(user_id, profile.clone());
        Ok(())
    }

    async fn set_auth_mode(&self, user_id: i64, auth_mode: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| missing("user", user_id))?;
        user.auth_mode = auth_mode.to_string();
        Ok(())
    }

    async fn deactivate_user(&self, user_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| missing("user", user_id))?;
        user.active = false;
        Ok(())
    }
}
