//! Settings loading: TOML file + environment credentials
//!
//! Resolution order for the settings file: explicit `--config` path, then the
//! user config dir (`memrec/config.toml`), then `./memrec.toml`, then compiled
//! defaults. Credentials come from the environment only and are never written
//! to a settings file.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_REGISTRY_EMAIL: &str = "MEMREC_REGISTRY_EMAIL";
pub const ENV_REGISTRY_PASSWORD: &str = "MEMREC_REGISTRY_PASSWORD";
pub const ENV_PLATFORM_API_KEY: &str = "MEMREC_PLATFORM_API_KEY";

/// Workspace-wide settings, deserialized from TOML
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub registry: RegistrySettings,
    pub platform: PlatformSettings,
    pub matching: MatchingSettings,
    pub selectors: SelectorSettings,
    pub timing: TimingSettings,
}

impl Settings {
    /// Load settings, failing loudly on an unreadable or invalid file.
    ///
    /// A missing file at a default location is fine (defaults apply); an
    /// explicitly passed path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Settings> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for path in Self::default_locations() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Settings::default())
    }

    fn from_file(path: &Path) -> Result<Settings> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read config file {}: {e}", path.display())))?;
        let settings = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "Loaded settings file");
        Ok(settings)
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("memrec").join("config.toml"));
        }
        paths.push(PathBuf::from("memrec.toml"));
        paths
    }

    /// Registry sign-in credentials from the environment.
    pub fn registry_credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            email: require_env(ENV_REGISTRY_EMAIL)?,
            password: require_env(ENV_REGISTRY_PASSWORD)?,
        })
    }

    /// Roster API bearer token from the environment.
    pub fn platform_api_key(&self) -> Result<String> {
        require_env(ENV_PLATFORM_API_KEY)
    }
}

/// Registry sign-in credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(Error::Config(format!(
            "Missing required environment variable: {name}"
        ))),
    }
}

/// Membership registry endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub login_url: String,
    pub search_url: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            login_url: "https://member.usafencing.org/login".to_string(),
            search_url: "https://member.usafencing.org/search/members".to_string(),
        }
    }
}

/// Scheduling platform (roster source) endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub base_url: String,
    /// Display name of the custom field holding the self-reported member ID
    pub member_field: String,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: "https://bayareafencing.pike13.com".to_string(),
            member_field: "USA Fencing Membership number".to_string(),
        }
    }
}

/// Fallback-match gating
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// Affiliation substrings a fallback row must contain (case-insensitive).
    /// Empty list disables the gate.
    pub affiliation_patterns: Vec<String>,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            affiliation_patterns: list(&["Bay Area Fencing Club"]),
        }
    }
}

/// Prioritized selector lists for the registry web surface.
///
/// Entries are CSS selectors, or XPath when prefixed with `//` or `(`. Order
/// is priority: the first selector that yields a visible element wins. The
/// registry markup is unversioned, so these are data, not code.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorSettings {
    pub email: Vec<String>,
    pub password: Vec<String>,
    pub submit: Vec<String>,
    pub post_login: Vec<String>,
    pub error_banner: Vec<String>,
    pub cookie_accept: Vec<String>,
    /// Search inputs an ID can be typed into, broadest last
    pub member_id: Vec<String>,
    /// Strictly ID-specific inputs, cleared before a name search
    pub id_only: Vec<String>,
    pub first_name: Vec<String>,
    pub last_name: Vec<String>,
    pub search_button: Vec<String>,
    pub result_rows: Vec<String>,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            email: list(&[
                r#"input[name="email"]"#,
                "input#email",
                r#"input[type="email"]"#,
                r#"input[name="username"]"#,
                r#"input[name="user[email]"]"#,
                r#"input[name="login"]"#,
                r#"input[placeholder*="Email" i]"#,
            ]),
            password: list(&[
                r#"input[name="password"]"#,
                "input#password",
                r#"input[type="password"]"#,
                r#"input[placeholder*="Password" i]"#,
            ]),
            submit: list(&[
                "//button[@type='submit'][contains(., 'Sign In')]",
                "//button[contains(., 'Sign in')]",
                "//button[contains(., 'SIGN IN')]",
                "//button[contains(., 'Log In')]",
                r#"input[type="submit"]"#,
            ]),
            post_login: list(&[
                "//*[contains(text(), 'SIGN OUT')]",
                "//*[contains(text(), 'Sign out')]",
                "//a[contains(., 'My Account')]",
            ]),
            error_banner: list(&[
                ".alert-danger",
                r#"[role="alert"]"#,
                "//*[contains(text(), 'Invalid')]",
            ]),
            cookie_accept: list(&["//button[contains(., 'Accept')]"]),
            member_id: list(&[
                r#"input[name="member_id"]"#,
                r#"input[placeholder*="Member ID" i]"#,
                "#member_id",
                r#"input[type="search"]"#,
                r#"input[name="query"]"#,
            ]),
            id_only: list(&[
                r#"input[name="member_id"]"#,
                r#"input[placeholder*="Member ID" i]"#,
                "#member_id",
            ]),
            first_name: list(&[
                r#"input[name="first_name"]"#,
                r#"input[placeholder*="First" i]"#,
                "#first_name",
                r#"input[name="fname"]"#,
            ]),
            last_name: list(&[
                r#"input[name="last_name"]"#,
                r#"input[placeholder*="Last" i]"#,
                "#last_name",
                r#"input[name="lname"]"#,
            ]),
            search_button: list(&["//button[contains(., 'Search')]"]),
            result_rows: list(&["table tr", ".results .result", ".list .list-item"]),
        }
    }
}

/// Delays and timeouts for driving the registry surface
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Ceiling for selector discovery on the sign-in form
    pub field_timeout_ms: u64,
    /// Poll interval while waiting for selectors or page readiness
    pub poll_interval_ms: u64,
    /// Fixed settle delay after navigation or a search trigger
    pub settle_delay_ms: u64,
    /// Pause between records on one worker
    pub politeness_delay_ms: u64,
    /// Linear backoff unit for ID-search retries (attempt * unit)
    pub retry_backoff_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            field_timeout_ms: 15_000,
            poll_interval_ms: 100,
            settle_delay_ms: 500,
            politeness_delay_ms: 300,
            retry_backoff_ms: 800,
        }
    }
}

impl TimingSettings {
    pub fn field_timeout(&self) -> Duration {
        Duration::from_millis(self.field_timeout_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms * attempt as u64)
    }
}

fn list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
