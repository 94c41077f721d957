//! Applies decided account actions to the target platform and the mapping store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use evento_core::config::UserImportConfig;
use evento_core::db::repository::EventoRepository;
use evento_core::error::Result;
use evento_core::models::common::AccountType;
use evento_core::models::user::{EventoUser, MappedUser};

use crate::target::{TargetSystem, UserProfile};
use crate::user_action::{compute_time_limit, UserAction, UserDeleteAction};

/// Auth mode of accounts detached from the directory.
pub const LOCAL_AUTH_MODE: &str = "local";

pub struct UserActionExecutor<R: EventoRepository, T: TargetSystem> {
    repo: Arc<R>,
    target: Arc<T>,
    config: UserImportConfig,
}

impl<R: EventoRepository, T: TargetSystem> UserActionExecutor<R, T> {
    pub fn new(repo: Arc<R>, target: Arc<T>, config: UserImportConfig) -> Self {
        Self {
            repo,
            target,
            config,
        }
    }

    /// Apply `action`. Returns the mapping left in place, if any.
    pub async fn execute(
        &self,
        user: &EventoUser,
        action: UserAction,
    ) -> Result<Option<MappedUser>> {
        match action {
            UserAction::Lockdown { mapped: None } => Ok(None),
            UserAction::Lockdown {
                mapped: Some(mapped),
            } => {
                self.repo.delete_mapped_user(mapped.evento_id).await?;
                if self.target.get_user(mapped.user_id).await?.is_some() {
                    self.target.deactivate_user(mapped.user_id).await?;
                }
                info!(evento_id = mapped.evento_id, user_id = mapped.user_id, "Locked down account");
                Ok(None)
            }
            UserAction::CreateUser => self.create(user).await.map(Some),
            UserAction::ConvertAuthMode { mut mapped } => {
                let auth_mode = self.auth_mode_for(user.account_type);
                self.target.set_auth_mode(mapped.user_id, &auth_mode).await?;
                mapped.account_type = user.account_type;
                mapped.last_imported = Utc::now();
                self.repo.upsert_mapped_user(&mapped).await?;
                info!(
                    evento_id = mapped.evento_id,
                    user_id = mapped.user_id,
                    auth_mode = %auth_mode,
                    "Converted auth mode"
                );
                Ok(Some(mapped))
            }
            UserAction::UpdateUser { mut mapped } => {
                let Some(existing) = self.target.get_user(mapped.user_id).await? else {
                    debug!(
                        evento_id = mapped.evento_id,
                        user_id = mapped.user_id,
                        "Mapped account vanished, recreating"
                    );
                    return self.create(user).await.map(Some);
                };
                let profile = self.profile(user, Utc::now(), existing.created_at);
                self.target.update_user(mapped.user_id, &profile).await?;
                self.sync_global_roles(mapped.user_id, &user.roles).await?;
                mapped.last_imported = Utc::now();
                self.repo.upsert_mapped_user(&mapped).await?;
                Ok(Some(mapped))
            }
        }
    }

    pub async fn execute_delete(&self, action: UserDeleteAction) -> Result<()> {
        let mapped = action.mapped().clone();
        let account_exists = self.target.get_user(mapped.user_id).await?.is_some();
        match action {
            UserDeleteAction::ConvertToLocalAuth { .. } => {
                if account_exists {
                    self.target
                        .set_auth_mode(mapped.user_id, LOCAL_AUTH_MODE)
                        .await?;
                }
            }
            UserDeleteAction::DeactivateAccount { .. } => {
                if account_exists {
                    self.target.deactivate_user(mapped.user_id).await?;
                }
            }
        }
        self.repo.delete_mapped_user(mapped.evento_id).await?;
        Ok(())
    }

    async fn create(&self, user: &EventoUser) -> Result<MappedUser> {
        let now = Utc::now();
        let created = self
            .target
            .create_user(&self.profile(user, now, now))
            .await?;
        self.sync_global_roles(created.user_id, &user.roles).await?;

        let mapped = MappedUser {
            evento_id: user.evento_id,
            user_id: created.user_id,
            account_type: user.account_type,
            last_imported: now,
        };
        self.repo.upsert_mapped_user(&mapped).await?;
        info!(evento_id = user.evento_id, user_id = created.user_id, login = %user.login_name, "Created account");
        Ok(mapped)
    }

    fn profile(
        &self,
        user: &EventoUser,
        now: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> UserProfile {
        UserProfile {
            login: user.login_name.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            gender: user.gender.clone(),
            email: user.primary_email().map(String::from),
            auth_mode: self.auth_mode_for(user.account_type),
            time_limit_until: compute_time_limit(
                now,
                created_at,
                self.config.account_duration_months,
                self.config.max_account_duration_months,
            ),
            active: true,
        }
    }

    fn auth_mode_for(&self, account_type: AccountType) -> String {
        match account_type {
            AccountType::Directory => self.config.auth_mode.clone(),
            AccountType::Local => LOCAL_AUTH_MODE.to_string(),
        }
    }

    /// Grant the default role and every mapped role the Evento account holds;
    /// drop mapped roles it no longer holds. The default role is never removed.
    async fn sync_global_roles(&self, user_id: i64, evento_roles: &[i64]) -> Result<()> {
        let held: HashSet<i64> = self
            .target
            .list_user_roles(user_id)
            .await?
            .into_iter()
            .collect();

        let mut wanted: HashSet<i64> = self
            .config
            .role_mapping
            .iter()
            .filter(|m| evento_roles.contains(&m.evento_role_id))
            .map(|m| m.role_id)
            .collect();
        if let Some(default_role) = self.config.default_role_id {
            wanted.insert(default_role);
        }

        for role_id in wanted.iter().filter(|r| !held.contains(r)) {
            self.target.assign_role(*role_id, user_id).await?;
        }
        for mapping in &self.config.role_mapping {
            let stale = held.contains(&mapping.role_id)
                && !wanted.contains(&mapping.role_id)
                && Some(mapping.role_id) != self.config.default_role_id;
            if stale {
                self.target.deassign_role(mapping.role_id, user_id).await?;
            }
        }
        Ok(())
    }
}
