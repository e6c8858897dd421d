use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{env, fs, io, path::PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Base URL of the collaboration server, e.g. `wss://collab.example.com`.
pub const SOCKET_URL: &str = "SOCKET_URL";
/// File holding the console access token used to authenticate sockets.
pub const CONSOLE_TOKEN_FILE: &str = "CONSOLE_TOKEN_FILE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[async_trait]
#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
    async fn del(&self, key: &str) -> Result<(), ConfigError>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn describe(&self) -> String;
}

/// Shared handle on whichever configuration backend the binary picked.
#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    /// Non-empty value of `key`, or `default`.
    pub async fn get_or(&self, key: &str, default: &str) -> String {
        match self.0.get(key).await {
            Some(value) if !value.trim().is_empty() => value,
            _ => default.to_string(),
        }
    }

    pub async fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        for key in self.0.keys().await {
            if let Some(value) = self.0.get(&key).await {
                entries.push((key, value));
            }
        }
        entries.sort();
        entries
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.describe())
    }
}

/// Process environment, seeded from and persisted to a `.env` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        match dotenvy::from_path(&env_file) {
            Ok(()) => info!("loaded {}", env_file.display()),
            Err(err) if env_file.exists() => warn!("could not parse {}: {}", env_file.display(), err),
            Err(_) => debug!("no env file at {}", env_file.display()),
        }
        Box::new(Self { env_file })
    }

    fn rewrite(&self, key: &str, value: Option<&str>) -> Result<(), ConfigError> {
        let content = fs::read_to_string(&self.env_file).unwrap_or_default();
        let mut lines: Vec<String> = content
            .lines()
            .filter(|line| line.split_once('=').is_none_or(|(k, _)| k.trim() != key))
            .map(str::to_string)
            .collect();
        if let Some(value) = value {
            lines.push(format!("{key}={value}"));
        }
        if let Some(parent) = self.env_file.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.env_file, lines.join("\n") + "\n").map_err(|source| ConfigError::Write {
            path: self.env_file.clone(),
            source,
        })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.rewrite(key, Some(value))?;
        unsafe { env::set_var(key, value) };
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ConfigError> {
        self.rewrite(key, None)?;
        unsafe { env::remove_var(key) };
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn describe(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// In-memory configuration, used by tests and embedders.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn with(entries: &[(&str, &str)]) -> Box<Self> {
        let map = DashMap::new();
        for (k, v) in entries {
            map.insert(k.to_string(), v.to_string());
        }
        Box::new(Self { map })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ConfigError> {
        self.map.remove(key);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn describe(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_map_config_get_or() {
        let config = ConfigManager(MapConfigManager::with(&[(SOCKET_URL, "ws://collab:5001"), ("BLANK", " ")]));
        assert_eq!(config.get_or(SOCKET_URL, "ws://localhost:5001").await, "ws://collab:5001");
        assert_eq!(config.get_or("BLANK", "fallback").await, "fallback");
        assert_eq!(config.get_or("MISSING", "fallback").await, "fallback");

        config.0.del(SOCKET_URL).await.unwrap();
        assert_eq!(config.0.get(SOCKET_URL).await, None);
    }

    #[tokio::test]
    async fn test_map_config_entries_are_sorted() {
        let config = ConfigManager(MapConfigManager::new());
        config.0.set("b", "2").await.unwrap();
        config.0.set("a", "1").await.unwrap();
        assert_eq!(
            config.entries().await,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_env_config_loads_and_persists() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "FLOWTRACE_TEST_LOADED=yes\nOTHER=1\n").unwrap();

        let config = ConfigManager(EnvConfigManager::new(env_path.clone()));
        assert_eq!(config.0.get("FLOWTRACE_TEST_LOADED").await.as_deref(), Some("yes"));

        config.0.set("FLOWTRACE_TEST_SET", "v1").await.unwrap();
        config.0.set("FLOWTRACE_TEST_SET", "v2").await.unwrap();
        let written = fs::read_to_string(&env_path).unwrap();
        assert!(written.contains("FLOWTRACE_TEST_SET=v2"));
        assert!(!written.contains("FLOWTRACE_TEST_SET=v1"));
        assert!(written.contains("OTHER=1"));

        config.0.del("FLOWTRACE_TEST_SET").await.unwrap();
        assert_eq!(env::var("FLOWTRACE_TEST_SET").ok(), None);
        assert!(!fs::read_to_string(&env_path).unwrap().contains("FLOWTRACE_TEST_SET"));

        unsafe { env::remove_var("FLOWTRACE_TEST_LOADED") };
    }

    #[tokio::test]
    async fn test_missing_env_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let config = ConfigManager(EnvConfigManager::new(dir.path().join("absent.env")));
        assert!(format!("{config:?}").contains("absent.env"));
    }
}
