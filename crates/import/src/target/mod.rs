//! Operations the importer needs from the target learning platform.
//!
//! Each call is atomic on the platform side; the importer never composes
//! them into larger transactions.

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use evento_core::error::Result;

pub use client::TargetClient;

/// Ref id of the repository root on the target platform.
pub const ROOT_REF_ID: i64 = 1;

/// Kinds of repository objects the importer distinguishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Root,
    Category,
    Course,
    Group,
    Folder,
    #[serde(other)]
    Other,
}

impl ObjectType {
    /// Objects that carry their own admin and member roles.
    pub fn has_membership(&self) -> bool {
        matches!(self, ObjectType::Course | ObjectType::Group)
    }
}

/// A node of the target repository tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub ref_id: i64,
    #[serde(default)]
    pub parent_ref_id: Option<i64>,
    pub object_type: ObjectType,
    pub title: String,
    /// The object sits in the trash.
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRoles {
    pub admin_role_id: i64,
    pub member_role_id: i64,
}

/// A course or group to be created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewContainer {
    pub object_type: ObjectType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parent_ref_id: i64,
    /// Owner account; `None` leaves ownership with the platform root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedContainer {
    pub ref_id: i64,
    pub admin_role_id: i64,
    pub member_role_id: i64,
}

/// Account attributes the importer writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub auth_mode: String,
    /// `None` means the account never expires.
    pub time_limit_until: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetUser {
    pub user_id: i64,
    pub login: String,
    pub auth_mode: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub time_limit_until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TargetTree: Send + Sync {
    /// Look up a node; trashed nodes are returned with `deleted` set.
    async fn get_node(&self, ref_id: i64) -> Result<Option<TreeNode>>;
    async fn list_children(&self, ref_id: i64) -> Result<Vec<TreeNode>>;
    /// Live (not trashed) nodes whose title matches exactly.
    async fn find_by_title(&self, title: &str) -> Result<Vec<TreeNode>>;
    async fn move_node(&self, ref_id: i64, new_parent_ref_id: i64) -> Result<()>;
    async fn move_to_trash(&self, ref_id: i64) -> Result<()>;
}

#[async_trait]
pub trait TargetObjects: Send + Sync {
    async fn create_container(&self, container: &NewContainer) -> Result<CreatedContainer>;
    async fn update_container(
        &self,
        ref_id: i64,
        title: &str,
        description: Option<&str>,
    ) -> Result<()>;
    /// Default admin and member roles of a course or group.
    async fn get_container_roles(&self, ref_id: i64) -> Result<Option<ContainerRoles>>;
}

#[async_trait]
pub trait TargetRoles: Send + Sync {
    async fn list_user_roles(&self, user_id: i64) -> Result<Vec<i64>>;
    async fn is_assigned(&self, role_id: i64, user_id: i64) -> Result<bool> {
        Ok(self.list_user_roles(user_id).await?.contains(&role_id))
    }
    async fn assign_role(&self, role_id: i64, user_id: i64) -> Result<()>;
    async fn deassign_role(&self, role_id: i64, user_id: i64) -> Result<()>;
    async fn add_favourite(&self, user_id: i64, ref_id: i64) -> Result<()>;
    async fn remove_favourite(&self, user_id: i64, ref_id: i64) -> Result<()>;
}

#[async_trait]
pub trait TargetUsers: Send + Sync {
    async fn get_user(&self, user_id: i64) -> Result<Option<TargetUser>>;
    async fn create_user(&self, profile: &UserProfile) -> Result<TargetUser>;
    async fn update_user(&self, user_id: i64, profile: &UserProfile) -> Result<()>;
    async fn set_auth_mode(&self, user_id: i64, auth_mode: &str) -> Result<()>;
    async fn deactivate_user(&self, user_id: i64) -> Result<()>;
}

/// Everything the importer needs from the target platform.
pub trait TargetSystem: TargetTree + TargetObjects + TargetRoles + TargetUsers {}

impl<T: TargetTree + TargetObjects + TargetRoles + TargetUsers> TargetSystem for T {}

#[cfg(test)]
pub(crate) mod fake;
