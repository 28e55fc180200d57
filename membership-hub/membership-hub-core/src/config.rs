//! Configuration for the membership hub.
//!
//! Values come from an optional JSON file and are then overridden from the
//! environment. Every field has a default so an empty object is a valid file.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Options that change how membership queries are built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Match search patterns anywhere in a field (`%p%`) instead of only as
    /// a prefix (`p%`).
    #[serde(default = "default_true")]
    pub enable_medial_search: bool,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            enable_medial_search: true,
        }
    }
}

/// Process-level configuration for the admin CLI and HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Address the HTTP admin API binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Users of this group may manage every group
    #[serde(default = "default_admin_group")]
    pub admin_group: String,

    /// HS256 secret for bearer tokens. Without it callers are identified by
    /// the `X-User-Id` header.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    #[serde(default)]
    pub membership: MembershipConfig,
}

fn default_true() -> bool { true }
fn default_database_path() -> PathBuf { PathBuf::from("membership-hub.db") }
fn default_listen_addr() -> String { "127.0.0.1:3000".to_string() }
fn default_admin_group() -> String { "admin".to_string() }

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            listen_addr: default_listen_addr(),
            admin_group: default_admin_group(),
            jwt_secret: None,
            membership: MembershipConfig::default(),
        }
    }
}

impl HubConfig {
    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Load from `path` when given, otherwise start from defaults, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.apply_env())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup("MEMBERSHIP_HUB_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("MEMBERSHIP_HUB_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(group) = lookup("MEMBERSHIP_HUB_ADMIN_GROUP") {
            self.admin_group = group;
        }
        if let Some(secret) = lookup("MEMBERSHIP_HUB_JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }
        if let Some(flag) = lookup("ACCOUNTS_ENABLE_MEDIAL_SEARCH").and_then(|v| parse_flag(&v)) {
            self.membership.enable_medial_search = flag;
        }
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
