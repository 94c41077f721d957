use serde::{Deserialize, Serialize};

use crate::error::{EventoError, Result};

/// Which of an event's two managed roles a roster entry grants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Admin,
    Member,
}

impl RoleKind {
    pub const ALL: [RoleKind; 2] = [RoleKind::Admin, RoleKind::Member];
}

/// Identity source an account is bound to.
///
/// Directory accounts authenticate against the institution directory and are
/// converted to local authentication when Evento stops delivering them. Local
/// accounts are deactivated instead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Directory,
    Local,
}

/// A reference to an Evento account inside an event roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventoUserRef {
    pub evento_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_name: Option<String>,
}

/// Read a required integer field from a raw record.
pub(crate) fn required_i64(
    value: &serde_json::Value,
    key: &str,
    evento_id: Option<i64>,
) -> Result<i64> {
    value
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| EventoError::record(evento_id, format!("missing or invalid field '{key}'")))
}

/// Read a required, non-blank string field from a raw record. The value is trimmed.
pub(crate) fn required_str(
    value: &serde_json::Value,
    key: &str,
    evento_id: Option<i64>,
) -> Result<String> {
    optional_str(value, key)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EventoError::record(evento_id, format!("missing or empty field '{key}'")))
}

/// Read an optional string field from a raw record. The value is trimmed.
pub(crate) fn optional_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

pub(crate) fn optional_bool(value: &serde_json::Value, key: &str) -> bool {
    value.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Parse a roster array of `{ idAccount, loginName }` objects.
pub(crate) fn user_refs(
    value: &serde_json::Value,
    key: &str,
    evento_id: Option<i64>,
) -> Result<Vec<EventoUserRef>> {
    let Some(raw) = value.get(key) else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let items = raw
        .as_array()
        .ok_or_else(|| EventoError::record(evento_id, format!("field '{key}' is not a list")))?;

    items
        .iter()
        .map(|item| {
            let id = item.get("idAccount").and_then(|v| v.as_i64()).ok_or_else(|| {
                EventoError::record(evento_id, format!("entry in '{key}' has no idAccount"))
            })?;
            Ok(EventoUserRef {
                evento_id: id,
                login_name: optional_str(item, "loginName"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_kind_serialization() {
        assert_eq!(serde_json::to_string(&RoleKind::Admin).unwrap(), "\"admin\"");
        assert_eq!(
            serde_json::to_string(&RoleKind::Member).unwrap(),
            "\"member\""
        );
    }

    #[test]
    fn account_type_serialization() {
        assert_eq!(
            serde_json::to_string(&AccountType::Directory).unwrap(),
            "\"directory\""
        );
        let back: AccountType = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(back, AccountType::Local);
    }

    #[test]
    fn required_str_trims_and_rejects_blank() {
        let v = json!({ "name": "  Algebra  ", "blank": "   " });
        assert_eq!(required_str(&v, "name", None).unwrap(), "Algebra");
        assert!(required_str(&v, "blank", Some(3)).is_err());
        assert!(required_str(&v, "missing", Some(3)).is_err());
    }

    #[test]
    fn user_refs_parses_list() {
        let v = json!({ "students": [
            { "idAccount": 1, "loginName": "a" },
            { "idAccount": 2 }
        ]});
        let refs = user_refs(&v, "students", Some(10)).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].login_name.as_deref(), Some("a"));
        assert_eq!(refs[1].evento_id, 2);
        assert!(refs[1].login_name.is_none());
    }

    #[test]
    fn user_refs_missing_or_null_is_empty() {
        let v = json!({ "employees": null });
        assert!(user_refs(&v, "employees", None).unwrap().is_empty());
        assert!(user_refs(&v, "students", None).unwrap().is_empty());
    }

    #[test]
    fn user_refs_rejects_entry_without_id() {
        let v = json!({ "students": [ { "loginName": "ghost" } ] });
        let err = user_refs(&v, "students", Some(7)).unwrap_err();
        assert!(err.to_string().contains("evento id 7"));
    }
}
