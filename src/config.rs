use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub password_policy: PasswordPolicyConfig,

    pub tokens: TokenConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// `sqlite:` or `postgres://` connection URL.
    pub database_url: String,

    pub log_level: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/roster.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,

    pub port: u16,

    /// Host header values this service answers to.
    ///
    /// Empty or containing `*` accepts any host. A leading dot matches the
    /// domain and all of its subdomains (`.example.com`).
    pub allowed_hosts: Vec<String>,

    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            allowed_hosts: Vec::new(),
            cors_allowed_origins: vec![
                "http://localhost:8000".to_string(),
                "http://127.0.0.1:8000".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 19456 = 19MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 19 * 1024,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
        }
    }
}

/// Password strength rules, applied in the order listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordRule {
    UserAttributeSimilarity,
    MinimumLength,
    CommonPassword,
    Numeric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicyConfig {
    pub rules: Vec<PasswordRule>,

    pub min_length: usize,

    /// Similarity ratio (0.1..=1.0) at which a password counts as too close
    /// to the account's username, names or email.
    pub max_similarity: f64,

    /// Newline separated list replacing the built-in common password list.
    pub common_passwords_path: Option<PathBuf>,
}

impl Default for PasswordPolicyConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                PasswordRule::UserAttributeSimilarity,
                PasswordRule::MinimumLength,
                PasswordRule::CommonPassword,
                PasswordRule::Numeric,
            ],
            min_length: 8,
            max_similarity: 0.7,
            common_passwords_path: None,
        }
    }
}

/// Where issued tokens live. Only the account database is supported; expiry
/// or an external store would hang off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenBackend {
    #[default]
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub backend: TokenBackend,

    /// Scheme expected in `Authorization: <keyword> <token>`.
    pub header_keyword: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            backend: TokenBackend::Database,
            header_keyword: "Token".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "roster".to_string());

        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            password_policy: PasswordPolicyConfig::default(),
            tokens: TokenConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    /// Loads the first config file found, then applies `ROSTER_*` environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        let mut config = None;
        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                config = Some(Self::load_from_path(path)?);
                break;
            }
        }

        let mut config = config.unwrap_or_else(|| {
            info!("No config file found, using defaults");
            Self::default()
        });
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("ROSTER_DATABASE_URL") {
            self.general.database_url = url;
        }

        if let Some(level) = var("ROSTER_LOG_LEVEL") {
            self.general.log_level = level;
        }

        if let Some(port) = var("ROSTER_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid ROSTER_PORT: {port}"))?;
        }

        if let Some(hosts) = var("ROSTER_ALLOWED_HOSTS") {
            self.server.allowed_hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(())
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("roster").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".roster").join("config.toml"));
        }

        paths
    }

    #[must_use]
    pub fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    /// Copy safe to print: credentials in the database URL are masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Ok(mut url) = url::Url::parse(&config.general.database_url)
            && url.password().is_some()
            && url.set_password(Some("********")).is_ok()
        {
            config.general.database_url = url.to_string();
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.database_url.trim().is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }

        let policy = &self.password_policy;
        if policy.min_length == 0 {
            anyhow::bail!("Password minimum length must be > 0");
        }

        if !(0.1..=1.0).contains(&policy.max_similarity) {
            anyhow::bail!(
                "Password max_similarity must be between 0.1 and 1.0, got {}",
                policy.max_similarity
            );
        }

        for (i, rule) in policy.rules.iter().enumerate() {
            if policy.rules[..i].contains(rule) {
                anyhow::bail!("Password rule {rule:?} is listed more than once");
            }
        }

        if self.tokens.header_keyword.trim().is_empty()
            || self.tokens.header_keyword.contains(char::is_whitespace)
        {
            anyhow::bail!("Token header keyword must be a single non-empty word");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.password_policy.min_length, 8);
        assert_eq!(config.password_policy.rules.len(), 4);
        assert_eq!(config.tokens.header_keyword, "Token");
        assert!(config.server.allowed_hosts.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[password_policy]"));
        assert!(toml_str.contains("[tokens]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [password_policy]
            rules = ["minimum_length", "numeric"]
            min_length = 12
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(
            config.password_policy.rules,
            vec![PasswordRule::MinimumLength, PasswordRule::Numeric]
        );
        assert_eq!(config.password_policy.min_length, 12);
        assert_eq!(config.tokens.backend, TokenBackend::Database);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(|key| match key {
                "ROSTER_PORT" => Some("9001".to_string()),
                "ROSTER_ALLOWED_HOSTS" => Some("api.example.com, .example.org,".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.server.port, 9001);
        assert_eq!(
            config.server.allowed_hosts,
            vec!["api.example.com".to_string(), ".example.org".to_string()]
        );

        let err = config.apply_env_overrides(|key| {
            (key == "ROSTER_PORT").then(|| "not-a-port".to_string())
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        let mut config = Config::default();
        config.password_policy.max_similarity = 0.05;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.password_policy.rules = vec![PasswordRule::Numeric, PasswordRule::Numeric];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tokens.header_keyword = "Bad Keyword".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_masks_database_password() {
        let mut config = Config::default();
        config.general.database_url = "postgres://roster:hunter2@db:5432/roster".to_string();

        let redacted = config.redacted();
        assert!(!redacted.general.database_url.contains("hunter2"));
        assert!(redacted.general.database_url.contains("roster@db:5432"));

        let sqlite = Config::default().redacted();
        assert_eq!(sqlite.general.database_url, "sqlite:data/roster.db");
    }

    #[test]
    fn test_create_default_if_missing() {
        let path = std::env::temp_dir()
            .join(format!("roster-config-{}", uuid::Uuid::new_v4()))
            .join("config.toml");

        assert!(Config::create_default_if_missing(&path).unwrap());
        assert!(!Config::create_default_if_missing(&path).unwrap());

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.server.port, Config::default().server.port);

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }
}
