use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{optional_bool, optional_str, required_i64, required_str, AccountType};
use crate::error::{EventoError, Result};

/// An account record delivered by the Evento user feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventoUser {
    pub evento_id: i64,
    pub login_name: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Option<String>,
    pub email_addresses: Vec<String>,
    /// Evento role ids held by the account.
    pub roles: Vec<i64>,
    pub account_type: AccountType,
    /// Tombstone: the account must be withdrawn from the target platform.
    pub lockdown: bool,
    /// The payload as delivered, kept for the outcome log.
    pub raw: serde_json::Value,
}

impl EventoUser {
    /// Build a typed record from a raw feed entry.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let evento_id = required_i64(value, "idAccount", None)?;
        let id = Some(evento_id);

        let email_addresses = ["email", "email2", "email3"]
            .iter()
            .filter_map(|key| optional_str(value, key))
            .filter(|mail| !mail.is_empty())
            .collect();

        let roles = match value.get("roles") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(raw) => raw
                .as_array()
                .ok_or_else(|| EventoError::record(id, "field 'roles' is not a list"))?
                .iter()
                .map(|r| {
                    r.as_i64()
                        .ok_or_else(|| EventoError::record(id, "role id is not a number"))
                })
                .collect::<Result<Vec<i64>>>()?,
        };

        let account_type = match optional_str(value, "accountType").as_deref() {
            None | Some("") | Some("directory") => AccountType::Directory,
            Some("local") => AccountType::Local,
            Some(other) => {
                return Err(EventoError::record(
                    id,
                    format!("unknown accountType '{other}'"),
                ))
            }
        };

        Ok(Self {
            evento_id,
            login_name: required_str(value, "loginName", id)?,
            first_name: required_str(value, "firstName", id)?,
            last_name: required_str(value, "lastName", id)?,
            gender: optional_str(value, "gender").filter(|g| !g.is_empty()),
            email_addresses,
            roles,
            account_type,
            lockdown: optional_bool(value, "isLockdownAccount"),
            raw: value.clone(),
        })
    }

    pub fn primary_email(&self) -> Option<&str> {
        self.email_addresses.first().map(String::as_str)
    }
}

/// Persisted link between an Evento account and a target platform user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappedUser {
    pub evento_id: i64,
    pub user_id: i64,
    pub account_type: AccountType,
    /// Last time the account was seen in a feed.
    pub last_imported: DateTime<Utc>,
}
