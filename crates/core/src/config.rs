//! TOML-based configuration system for the Evento importer.

use crate::error::{EventoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level importer configuration, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventoConfig {
    pub evento: EventoSection,
    pub api: ApiConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub user_import: UserImportConfig,
    #[serde(default)]
    pub event_import: EventImportConfig,
}

/// Core instance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventoSection {
    pub instance_name: String,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Database backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: Some("/var/lib/evento/evento.db".into()),
        }
    }
}

/// Connection settings for the Evento REST feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub auth_key: String,
    #[serde(default)]
    pub auth_secret: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound on pages fetched per run. `0` disables the limit.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Pause after every successful request, in milliseconds.
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_page_size() -> u32 {
    500
}

fn default_max_pages() -> u32 {
    1000
}

fn default_request_interval_ms() -> u64 {
    0
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Bounded retry with exponential backoff for feed requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Disable retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        if attempt == 0 {
            return std::time::Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        std::time::Duration::from_millis(ms)
    }
}

/// Connection settings for the target learning platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    /// Ref id of the repository root node.
    #[serde(default = "default_root_ref_id")]
    pub root_ref_id: i64,
}

fn default_root_ref_id() -> i64 {
    1
}

/// User import settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserImportConfig {
    /// Auth mode assigned to imported accounts on the target platform.
    #[serde(default = "default_auth_mode")]
    pub auth_mode: String,
    #[serde(default = "default_account_duration_months")]
    pub account_duration_months: u32,
    /// Hard ceiling on the account window, measured from account creation. `0` means no ceiling.
    #[serde(default)]
    pub max_account_duration_months: u32,
    #[serde(default)]
    pub default_role_id: Option<i64>,
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u32,
    #[serde(default)]
    pub role_mapping: Vec<RoleMapping>,
}

impl Default for UserImportConfig {
    fn default() -> Self {
        Self {
            auth_mode: default_auth_mode(),
            account_duration_months: default_account_duration_months(),
            max_account_duration_months: 0,
            default_role_id: None,
            stale_after_days: default_stale_after_days(),
            role_mapping: Vec::new(),
        }
    }
}

fn default_auth_mode() -> String {
    "ldap".into()
}

fn default_account_duration_months() -> u32 {
    24
}

fn default_stale_after_days() -> u32 {
    7
}

/// Maps an Evento role to a global role on the target platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleMapping {
    pub role_id: i64,
    pub evento_role_id: i64,
}

/// Event import settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventImportConfig {
    #[serde(default)]
    pub object_owner: ObjectOwner,
    #[serde(default)]
    pub locations: LocationSettings,
}

/// Owner assigned to containers created by the importer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObjectOwner {
    #[default]
    Root,
    User(i64),
}

/// Allow-lists used to rebuild the location table from the target tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocationSettings {
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub years: Vec<String>,
    /// Target category title → department label delivered by the feed.
    #[serde(default)]
    pub department_aliases: BTreeMap<String, String>,
}

impl LocationSettings {
    /// Department label stored for a category title.
    pub fn department_label<'a>(&'a self, category_title: &'a str) -> &'a str {
        self.department_aliases
            .get(category_title)
            .map(String::as_str)
            .unwrap_or(category_title)
    }
}

impl EventoConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| EventoError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Validate the configuration, returning an error for invalid combinations.
    pub fn validate(&self) -> Result<()> {
        if self.evento.instance_name.is_empty() {
            return Err(EventoError::Config(
                "evento.instance_name must not be empty".into(),
            ));
        }

        if self.evento.database.path.is_none() {
            return Err(EventoError::Config(
                "evento.database.path is required".into(),
            ));
        }

        if self.api.base_url.is_empty() {
            return Err(EventoError::Config("api.base_url must not be empty".into()));
        }

        if self.api.page_size == 0 {
            return Err(EventoError::Config(
                "api.page_size must be greater than zero".into(),
            ));
        }

        if self.target.base_url.is_empty() {
            return Err(EventoError::Config(
                "target.base_url must not be empty".into(),
            ));
        }

        let ui = &self.user_import;
        if ui.max_account_duration_months != 0
            && ui.max_account_duration_months < ui.account_duration_months
        {
            return Err(EventoError::Config(format!(
                "user_import.max_account_duration_months ({}) must not be below account_duration_months ({})",
                ui.max_account_duration_months, ui.account_duration_months
            )));
        }

        if ui.stale_after_days == 0 {
            return Err(EventoError::Config(
                "user_import.stale_after_days must be greater than zero".into(),
            ));
        }

        let mut seen_roles = std::collections::HashSet::new();
        for mapping in &ui.role_mapping {
            if !seen_roles.insert(mapping.role_id) {
                return Err(EventoError::Config(format!(
                    "user_import.role_mapping lists role {} more than once",
                    mapping.role_id
                )));
            }
        }

        if let ObjectOwner::User(id) = self.event_import.object_owner {
            if id <= 0 {
                return Err(EventoError::Config(format!(
                    "event_import.object_owner user id must be positive, got {id}"
                )));
            }
        }

        Ok(())
    }

    /// Generate a sensible default configuration.
    pub fn generate_default() -> Self {
        Self {
            evento: EventoSection {
                instance_name: "Evento Import".into(),
                database: DatabaseConfig::default(),
            },
            api: ApiConfig {
                base_url: "https://evento.example.org/api".into(),
                auth_key: String::new(),
                auth_secret: String::new(),
                page_size: default_page_size(),
                max_pages: default_max_pages(),
                request_interval_ms: default_request_interval_ms(),
                request_timeout_secs: default_request_timeout_secs(),
                retry: RetryConfig::default(),
            },
            target: TargetConfig {
                base_url: "https://lms.example.org/api".into(),
                api_token: String::new(),
                root_ref_id: default_root_ref_id(),
            },
            user_import: UserImportConfig::default(),
            event_import: EventImportConfig::default(),
        }
    }
}
