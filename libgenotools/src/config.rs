use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::macros::format_description;
use time::PrimitiveDateTime;

use super::constants::{DEFAULT_KNOWN_USERS, MIN_EDS_SIZE_BYTES};
use super::error::ConfigError;

/// How often a transiently failing export is attempted, and the pause between attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_ms: 4000,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// A maintenance window during which running instances shut themselves down,
/// so that the shared install can be replaced. Times are `dd.mm.YYYY HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateWindow {
    pub start: String,
    pub end: String,
}

impl UpdateWindow {
    fn parse_time(value: &str) -> Result<PrimitiveDateTime, ConfigError> {
        let format = format_description!("[day].[month].[year] [hour]:[minute]");
        PrimitiveDateTime::parse(value.trim(), &format)
            .map_err(|_| ConfigError::BadUpdateWindow(value.to_string()))
    }

    /// Is `now` strictly inside the window
    pub fn contains(&self, now: PrimitiveDateTime) -> Result<bool, ConfigError> {
        let start = Self::parse_time(&self.start)?;
        let end = Self::parse_time(&self.end)?;
        Ok(start < now && now < end)
    }
}

/// Structure representing the application configuration. Contains pathing and watch tuning.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub assay_table_path: PathBuf,
    pub formula_workbook_path: PathBuf,
    pub qiaxcel_path: PathBuf,
    pub genotyping_path: PathBuf,
    pub user: Option<String>,
    pub known_users: Vec<String>,
    pub auto_export: bool,
    pub recursive: bool,
    pub eds_debounce_ms: u64,
    pub export_debounce_ms: u64,
    pub min_eds_size_bytes: u64,
    pub reconnect_interval_secs: u64,
    pub tick_interval_secs: u64,
    pub retry: RetryPolicy,
    pub update_window: Option<UpdateWindow>,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            assay_table_path: PathBuf::from("None"),
            formula_workbook_path: PathBuf::from("None"),
            qiaxcel_path: PathBuf::from("None"),
            genotyping_path: PathBuf::from("None"),
            user: None,
            known_users: DEFAULT_KNOWN_USERS.iter().map(|u| u.to_string()).collect(),
            auto_export: true,
            recursive: false,
            eds_debounce_ms: 1000,
            export_debounce_ms: 300,
            min_eds_size_bytes: MIN_EDS_SIZE_BYTES,
            reconnect_interval_secs: 10,
            tick_interval_secs: 30,
            retry: RetryPolicy::default(),
            update_window: None,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// The login whose files get distinguished notifications, lower-cased.
    ///
    /// Falls back to the USERNAME (Windows) or USER environment variable.
    pub fn login(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USERNAME").ok())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Username tokens that may appear in export file names, including our own login
    pub fn user_tokens(&self) -> Vec<String> {
        let mut users: Vec<String> = self.known_users.iter().map(|u| u.to_lowercase()).collect();
        let login = self.login();
        if !login.is_empty() && !users.contains(&login) {
            users.push(login);
        }
        users
    }

    pub fn eds_debounce(&self) -> Duration {
        Duration::from_millis(self.eds_debounce_ms)
    }

    pub fn export_debounce(&self) -> Duration {
        Duration::from_millis(self.export_debounce_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_yaml_round_trip_keeps_defaults() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.min_eds_size_bytes, 1_300_000);
        assert_eq!(config.known_users.len(), 7);
    }

    #[test]
    fn test_missing_config_file() {
        let result = Config::read_config_file(Path::new("/definitely/not/here.yml"));
        assert!(matches!(result, Err(ConfigError::BadFilePath(_))));
    }

    #[test]
    fn test_login_is_lower_case_and_joins_user_tokens() {
        let config = Config {
            user: Some(String::from("AB12")),
            ..Default::default()
        };
        assert_eq!(config.login(), "ab12");
        let tokens = config.user_tokens();
        assert!(tokens.contains(&String::from("ab12")));
        assert!(tokens.contains(&String::from("jb40")));
    }

    #[test]
    fn test_update_window() {
        let window = UpdateWindow {
            start: String::from("01.08.2019 18:00"),
            end: String::from("02.08.2019 08:30"),
        };
        assert!(window.contains(datetime!(2019-08-01 23:15)).unwrap());
        assert!(!window.contains(datetime!(2019-08-02 08:30)).unwrap());

        let broken = UpdateWindow {
            start: String::from("tomorrow"),
            end: String::from("02.08.2019 08:30"),
        };
        assert!(broken.contains(datetime!(2019-08-01 23:15)).is_err());
    }
}
