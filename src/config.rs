//! Configuration management for the weather load job
//!
//! Reads the city list from a YAML document, resolves the required
//! credentials from the process environment and applies the optional
//! `WEATHERLOAD_*` overrides. Everything ends up in one [`AppConfig`]
//! that is built once at startup and passed by reference.

use crate::{LoadError, Result};
use ::config::{Config, File, FileFormat};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const API_KEY_VAR: &str = "API_KEY";
pub const WAREHOUSE_ACCOUNT_VAR: &str = "WAREHOUSE_ACCOUNT";
pub const WAREHOUSE_USER_VAR: &str = "WAREHOUSE_USER";
pub const WAREHOUSE_PASSWORD_VAR: &str = "WAREHOUSE_PASSWORD";
pub const WAREHOUSE_NAME_VAR: &str = "WAREHOUSE_NAME";
pub const WAREHOUSE_DATABASE_VAR: &str = "WAREHOUSE_DATABASE";
pub const WAREHOUSE_SCHEMA_VAR: &str = "WAREHOUSE_SCHEMA";
pub const WAREHOUSE_TABLE_VAR: &str = "WAREHOUSE_TABLE";
pub const WORKSPACE_VAR: &str = "GITHUB_WORKSPACE";

pub const BASE_URL_VAR: &str = "WEATHERLOAD_BASE_URL";
pub const TIMEOUT_VAR: &str = "WEATHERLOAD_TIMEOUT_SECS";
pub const MAX_RETRIES_VAR: &str = "WEATHERLOAD_MAX_RETRIES";
pub const LOG_LEVEL_VAR: &str = "WEATHERLOAD_LOG_LEVEL";
pub const LOG_FORMAT_VAR: &str = "WEATHERLOAD_LOG_FORMAT";

/// City config location relative to the workspace root
const CITY_CONFIG_RELATIVE: [&str; 2] = ["api_data_load", "api_config.yaml"];

/// Declarative city list document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityConfig {
    /// Cities in processing order
    pub cities: Vec<String>,
}

/// Load the ordered city list from a YAML file
pub fn load_cities(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(LoadError::config(format!(
            "City config file not found: {}",
            path.display()
        )));
    }

    let settings = Config::builder()
        .add_source(File::from(path.to_path_buf()).format(FileFormat::Yaml))
        .build()
        .map_err(|e| {
            LoadError::config(format!("Failed to parse {}: {e}", path.display()))
        })?;

    let city_config: CityConfig = settings.try_deserialize().map_err(|e| {
        LoadError::config(format!(
            "Expected a 'cities' list in {}: {e}",
            path.display()
        ))
    })?;

    if let Some(position) = city_config.cities.iter().position(|c| c.trim().is_empty()) {
        return Err(LoadError::config(format!(
            "City entry {} in {} is blank",
            position + 1,
            path.display()
        )));
    }

    Ok(city_config.cities)
}

/// Warehouse login and destination
#[derive(Debug)]
pub struct WarehouseCredentials {
    /// Host of the warehouse account, optionally `host:port`
    pub account: String,
    pub user: String,
    pub password: SecretString,
    /// Compute unit the session is tagged with
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub table: String,
}

/// Secrets and parameters required before the job may start
#[derive(Debug)]
pub struct Credentials {
    /// Weather provider access key
    pub api_key: SecretString,
    pub warehouse: WarehouseCredentials,
}

impl Credentials {
    /// Resolve credentials from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve credentials through an arbitrary lookup.
    ///
    /// Every missing or empty variable is reported in one error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut required = |name: &'static str| -> String {
            match lookup(name).filter(|value| !value.is_empty()) {
                Some(value) => value,
                None => {
                    missing.push(name);
                    String::new()
                }
            }
        };

        let api_key = required(API_KEY_VAR);
        let account = required(WAREHOUSE_ACCOUNT_VAR);
        let user = required(WAREHOUSE_USER_VAR);
        let password = required(WAREHOUSE_PASSWORD_VAR);
        let warehouse = required(WAREHOUSE_NAME_VAR);
        let database = required(WAREHOUSE_DATABASE_VAR);
        let schema = required(WAREHOUSE_SCHEMA_VAR);
        let table = required(WAREHOUSE_TABLE_VAR);

        if !missing.is_empty() {
            return Err(LoadError::startup(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            warehouse: WarehouseCredentials {
                account,
                user,
                password: SecretString::from(password),
                warehouse,
                database,
                schema,
                table,
            },
        })
    }
}

/// Weather provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Base URL of the provider, without the endpoint path
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    /// Request timeout in seconds, 0 disables the timeout
    #[serde(default = "default_weather_timeout")]
    pub timeout_seconds: u64,
    /// Retries for transient failures, 0 means a single attempt
    #[serde(default)]
    pub max_retries: u32,
}

/// Output format for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

/// What the run does when a single city fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failed city
    #[default]
    Abort,
    /// Record the failure and move on to the next city
    Continue,
}

fn default_weather_base_url() -> String {
    "http://api.weatherstack.com".to_string()
}

fn default_weather_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_weather_base_url(),
            timeout_seconds: default_weather_timeout(),
            max_retries: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WeatherConfig {
    /// Apply `WEATHERLOAD_*` overrides found through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(BASE_URL_VAR).filter(|v| !v.is_empty()) {
            self.base_url = base_url;
        }
        if let Some(raw) = lookup(TIMEOUT_VAR) {
            self.timeout_seconds = parse_number(TIMEOUT_VAR, &raw)?;
        }
        if let Some(raw) = lookup(MAX_RETRIES_VAR) {
            self.max_retries = parse_number(MAX_RETRIES_VAR, &raw)?;
        }
        Ok(())
    }

    /// Validate numeric ranges and the base URL
    pub fn validate(&self) -> Result<()> {
        if self.timeout_seconds > 300 {
            return Err(LoadError::config(
                "Weather API timeout cannot exceed 300 seconds",
            ));
        }

        if self.max_retries > 10 {
            return Err(LoadError::config("Weather API max retries cannot exceed 10"));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(LoadError::config(
                "Weather API base URL must be a valid HTTP or HTTPS URL",
            ));
        }

        Ok(())
    }
}

impl LogFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

impl LoggingConfig {
    /// Resolve and validate the logging settings through `lookup`
    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut logging = Self::default();
        logging.apply_overrides(lookup)?;
        logging.validate()?;
        Ok(logging)
    }

    /// Apply `WEATHERLOAD_LOG_*` overrides found through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(LOG_LEVEL_VAR).filter(|v| !v.is_empty()) {
            self.level = level.to_lowercase();
        }
        if let Some(format) = lookup(LOG_FORMAT_VAR).filter(|v| !v.is_empty()) {
            self.format = match format.to_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                other => {
                    return Err(LoadError::config(format!(
                        "Invalid log format '{other}'. Must be one of: pretty, json"
                    )));
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.level.as_str()) {
            return Err(LoadError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.level,
                valid_log_levels.join(", ")
            )));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| LoadError::config(format!("{name} must be a non-negative integer, got '{raw}'")))
}

/// Lookup that answers from `overrides` first and falls back to `fallback`.
///
/// Command line flags are passed as overrides so they shadow the
/// environment before anything is parsed or validated.
pub fn layered<'a, F>(
    overrides: &'a [(&'static str, String)],
    fallback: F,
) -> impl Fn(&str) -> Option<String> + 'a
where
    F: Fn(&str) -> Option<String> + 'a,
{
    move |name: &str| {
        overrides
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone())
            .or_else(|| fallback(name))
    }
}

/// Root configuration for one run
#[derive(Debug)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub weather: WeatherConfig,
    /// Location of the city list document
    pub cities_path: PathBuf,
    pub failure_policy: FailurePolicy,
}

impl AppConfig {
    /// Build the configuration from the process environment
    pub fn from_env(cities_path: Option<PathBuf>) -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok(), cities_path)
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// `cities_path` replaces the workspace-relative default; without it
    /// `GITHUB_WORKSPACE` becomes a required variable.
    pub fn from_lookup<F>(lookup: F, cities_path: Option<PathBuf>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cities_path = match cities_path {
            Some(path) => path,
            None => Self::workspace_cities_path(&lookup)?,
        };

        let credentials = Credentials::from_lookup(&lookup)?;

        let mut weather = WeatherConfig::default();
        weather.apply_overrides(&lookup)?;

        let config = Self {
            credentials,
            weather,
            cities_path,
            failure_policy: FailurePolicy::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn workspace_cities_path<F>(lookup: &F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        let workspace = lookup(WORKSPACE_VAR)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                LoadError::startup(format!(
                    "missing required environment variables: {WORKSPACE_VAR}"
                ))
            })?;

        let mut path = PathBuf::from(workspace);
        path.extend(CITY_CONFIG_RELATIVE);
        Ok(path)
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.weather.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::io::Write;

    fn full_env() -> HashMap<&'static str, String> {
        HashMap::from([
            (API_KEY_VAR, "test_api_key".to_string()),
            (WAREHOUSE_ACCOUNT_VAR, "warehouse.example.com".to_string()),
            (WAREHOUSE_USER_VAR, "loader".to_string()),
            (WAREHOUSE_PASSWORD_VAR, "p@ss word".to_string()),
            (WAREHOUSE_NAME_VAR, "COMPUTE_WH".to_string()),
            (WAREHOUSE_DATABASE_VAR, "analytics".to_string()),
            (WAREHOUSE_SCHEMA_VAR, "weather".to_string()),
            (WAREHOUSE_TABLE_VAR, "current_conditions".to_string()),
            (WORKSPACE_VAR, "/workspace".to_string()),
        ])
    }

    fn lookup_in<'a>(env: &'a HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| env.get(name).cloned()
    }

    fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_cities_preserves_order() {
        let file = write_yaml("cities:\n  - Paris\n  - Lagos\n  - Paris\n");
        let cities = load_cities(file.path()).unwrap();
        assert_eq!(cities, vec!["Paris", "Lagos", "Paris"]);
    }

    #[test]
    fn test_load_cities_empty_list() {
        let file = write_yaml("cities: []\n");
        assert!(load_cities(file.path()).unwrap().is_empty());
    }

    #[rstest]
    #[case::missing_key("towns:\n  - Paris\n")]
    #[case::not_a_list("cities: Paris\n")]
    #[case::blank_entry("cities:\n  - Paris\n  - \"  \"\n")]
    #[case::unparsable("cities: [Paris\n")]
    fn test_load_cities_rejects_malformed(#[case] contents: &str) {
        let file = write_yaml(contents);
        let err = load_cities(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Config { .. }), "got {err:?}");
    }

    #[test]
    fn test_load_cities_missing_file() {
        let err = load_cities(Path::new("/definitely/not/here/api_config.yaml")).unwrap_err();
        assert!(matches!(err, LoadError::Config { .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_credentials_resolved() {
        let env = full_env();
        let credentials = Credentials::from_lookup(lookup_in(&env)).unwrap();
        assert_eq!(credentials.api_key.expose_secret(), "test_api_key");
        assert_eq!(credentials.warehouse.schema, "weather");
        assert_eq!(credentials.warehouse.password.expose_secret(), "p@ss word");
    }

    #[rstest]
    #[case(API_KEY_VAR)]
    #[case(WAREHOUSE_PASSWORD_VAR)]
    #[case(WAREHOUSE_TABLE_VAR)]
    fn test_missing_credential_is_startup_error(#[case] removed: &str) {
        let mut env = full_env();
        env.remove(removed);
        let err = Credentials::from_lookup(lookup_in(&env)).unwrap_err();
        assert!(matches!(err, LoadError::Startup { .. }));
        assert!(err.to_string().contains(removed));
    }

    #[test]
    fn test_all_missing_credentials_reported_together() {
        let err = Credentials::from_lookup(|_| None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(API_KEY_VAR));
        assert!(message.contains(WAREHOUSE_SCHEMA_VAR));
        assert!(message.contains(WAREHOUSE_TABLE_VAR));
    }

    #[test]
    fn test_empty_credential_counts_as_missing() {
        let mut env = full_env();
        env.insert(WAREHOUSE_USER_VAR, String::new());
        let err = Credentials::from_lookup(lookup_in(&env)).unwrap_err();
        assert!(err.to_string().contains(WAREHOUSE_USER_VAR));
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let env = full_env();
        let credentials = Credentials::from_lookup(lookup_in(&env)).unwrap();
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("test_api_key"));
        assert!(!debug.contains("p@ss word"));
    }

    #[test]
    fn test_app_config_uses_workspace_path() {
        let env = full_env();
        let config = AppConfig::from_lookup(lookup_in(&env), None).unwrap();
        assert_eq!(
            config.cities_path,
            PathBuf::from("/workspace/api_data_load/api_config.yaml")
        );
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.weather.base_url, "http://api.weatherstack.com");
        assert_eq!(config.weather.max_retries, 0);
    }

    #[test]
    fn test_explicit_path_does_not_need_workspace() {
        let mut env = full_env();
        env.remove(WORKSPACE_VAR);
        let config =
            AppConfig::from_lookup(lookup_in(&env), Some(PathBuf::from("cities.yaml"))).unwrap();
        assert_eq!(config.cities_path, PathBuf::from("cities.yaml"));
    }

    #[test]
    fn test_missing_workspace_is_startup_error() {
        let mut env = full_env();
        env.remove(WORKSPACE_VAR);
        let err = AppConfig::from_lookup(lookup_in(&env), None).unwrap_err();
        assert!(matches!(err, LoadError::Startup { .. }));
    }

    #[test]
    fn test_weather_overrides() {
        let mut env = full_env();
        env.insert(BASE_URL_VAR, "http://localhost:8080".to_string());
        env.insert(TIMEOUT_VAR, "5".to_string());
        env.insert(MAX_RETRIES_VAR, "2".to_string());
        let config = AppConfig::from_lookup(lookup_in(&env), None).unwrap();
        assert_eq!(config.weather.base_url, "http://localhost:8080");
        assert_eq!(config.weather.timeout_seconds, 5);
        assert_eq!(config.weather.max_retries, 2);
    }

    #[test]
    fn test_logging_overrides() {
        let mut env = full_env();
        env.insert(LOG_LEVEL_VAR, "DEBUG".to_string());
        env.insert(LOG_FORMAT_VAR, "JSON".to_string());
        let logging = LoggingConfig::from_lookup(&lookup_in(&env)).unwrap();
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, LogFormat::Json);
    }

    #[rstest]
    #[case(LOG_LEVEL_VAR, "verbose", "Invalid log level")]
    #[case(LOG_FORMAT_VAR, "xml", "Invalid log format")]
    fn test_invalid_logging_overrides(
        #[case] name: &'static str,
        #[case] value: &str,
        #[case] expected: &str,
    ) {
        let mut env = full_env();
        env.insert(name, value.to_string());
        let err = LoggingConfig::from_lookup(&lookup_in(&env)).unwrap_err();
        assert!(err.to_string().contains(expected), "got {err}");
    }

    #[rstest]
    #[case(TIMEOUT_VAR, "500", "timeout cannot exceed")]
    #[case(MAX_RETRIES_VAR, "11", "max retries cannot exceed")]
    #[case(TIMEOUT_VAR, "soon", "non-negative integer")]
    #[case(BASE_URL_VAR, "ftp://api", "HTTP or HTTPS")]
    fn test_invalid_overrides(#[case] name: &'static str, #[case] value: &str, #[case] expected: &str) {
        let mut env = full_env();
        env.insert(name, value.to_string());
        let err = AppConfig::from_lookup(lookup_in(&env), None).unwrap_err();
        assert!(err.to_string().contains(expected), "got {err}");
    }

    #[test]
    fn test_flags_shadow_out_of_range_environment() {
        let mut env = full_env();
        env.insert(TIMEOUT_VAR, "500".to_string());
        env.insert(MAX_RETRIES_VAR, "many".to_string());
        env.insert(LOG_LEVEL_VAR, "verbose".to_string());
        let flags = vec![
            (TIMEOUT_VAR, "10".to_string()),
            (MAX_RETRIES_VAR, "3".to_string()),
            (LOG_LEVEL_VAR, "debug".to_string()),
        ];
        let lookup = layered(&flags, lookup_in(&env));

        let config = AppConfig::from_lookup(&lookup, None).unwrap();
        assert_eq!(config.weather.timeout_seconds, 10);
        assert_eq!(config.weather.max_retries, 3);

        let logging = LoggingConfig::from_lookup(&lookup).unwrap();
        assert_eq!(logging.level, "debug");
    }

    #[test]
    fn test_layered_falls_back_for_unset_flags() {
        let mut env = full_env();
        env.insert(BASE_URL_VAR, "http://localhost:9000".to_string());
        let flags = vec![(TIMEOUT_VAR, "7".to_string())];
        let config = AppConfig::from_lookup(layered(&flags, lookup_in(&env)), None).unwrap();
        assert_eq!(config.weather.base_url, "http://localhost:9000");
        assert_eq!(config.weather.timeout_seconds, 7);
    }
}
