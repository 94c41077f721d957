//! Decision state machine for account records.

use chrono::{DateTime, Months, Utc};

use evento_core::models::common::AccountType;
use evento_core::models::user::{EventoUser, MappedUser};

/// The single corrective action decided for one account record.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    /// Tombstone record: withdraw the account if it is mapped.
    Lockdown { mapped: Option<MappedUser> },
    CreateUser,
    /// The account moved to another identity source.
    ConvertAuthMode { mapped: MappedUser },
    UpdateUser { mapped: MappedUser },
}

impl UserAction {
    pub fn kind(&self) -> &'static str {
        match self {
            UserAction::Lockdown { .. } => "lockdown",
            UserAction::CreateUser => "create_user",
            UserAction::ConvertAuthMode { .. } => "convert_auth_mode",
            UserAction::UpdateUser { .. } => "update_user",
        }
    }
}

/// Action for a mapped account that is no longer delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum UserDeleteAction {
    /// Keep the account and its content, detached from the directory.
    ConvertToLocalAuth { mapped: MappedUser },
    DeactivateAccount { mapped: MappedUser },
}

impl UserDeleteAction {
    pub fn kind(&self) -> &'static str {
        match self {
            UserDeleteAction::ConvertToLocalAuth { .. } => "convert_to_local_auth",
            UserDeleteAction::DeactivateAccount { .. } => "deactivate_account",
        }
    }

    pub fn mapped(&self) -> &MappedUser {
        match self {
            UserDeleteAction::ConvertToLocalAuth { mapped }
            | UserDeleteAction::DeactivateAccount { mapped } => mapped,
        }
    }
}

pub fn decide(user: &EventoUser, mapped: Option<MappedUser>) -> UserAction {
    if user.lockdown {
        return UserAction::Lockdown { mapped };
    }
    match mapped {
        None => UserAction::CreateUser,
        Some(mapped) if mapped.account_type != user.account_type => {
            UserAction::ConvertAuthMode { mapped }
        }
        Some(mapped) => UserAction::UpdateUser { mapped },
    }
}

pub fn decide_delete(mapped: MappedUser) -> UserDeleteAction {
    match mapped.account_type {
        AccountType::Directory => UserDeleteAction::ConvertToLocalAuth { mapped },
        AccountType::Local => UserDeleteAction::DeactivateAccount { mapped },
    }
}

/// Expiry of an account refreshed at `now`.
///
/// `duration_months == 0` means the account never expires. A non-zero
/// `max_months` caps the window at that many months after creation.
pub fn compute_time_limit(
    now: DateTime<Utc>,
    created_at: DateTime<Utc>,
    duration_months: u32,
    max_months: u32,
) -> Option<DateTime<Utc>> {
    if duration_months == 0 {
        return None;
    }
    let until = now.checked_add_months(Months::new(duration_months))?;
    if max_months == 0 {
        return Some(until);
    }
    let ceiling = created_at.checked_add_months(Months::new(max_months))?;
    Some(until.min(ceiling))
}
