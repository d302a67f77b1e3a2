use crate::config::schema::{self, NearbyConfig};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use validator::Validate;

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<NearbyConfig> {
        let path = path.as_ref();
        let mut visited = HashSet::new();
        Self::load_with_inheritance(path, &mut visited, false)
    }

    /// Loads `path` if given, otherwise returns the validated defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<NearbyConfig> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = NearbyConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn load_with_inheritance(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        is_parent_load: bool,
    ) -> Result<NearbyConfig> {
        let path = fs::canonicalize(path)
            .with_context(|| format!("Failed to canonicalize path: {}", path.display()))?;

        if visited.contains(&path) {
            anyhow::bail!("Circular inheritance detected involving {}", path.display());
        }
        visited.insert(path.clone());

        let config = Self::load_file(&path)?;

        let final_config = if let Some(parent_path_str) = &config.extends {
            let parent_path = path
                .parent()
                .context("Cannot determine parent directory")?
                .join(parent_path_str);

            let parent_config = Self::load_with_inheritance(&parent_path, visited, true)?;
            Self::merge_configs(parent_config, config)
        } else {
            config
        };

        if !is_parent_load {
            final_config.validate()?;
        }

        Ok(final_config)
    }

    fn load_file(path: &Path) -> Result<NearbyConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                let config: NearbyConfig = serde_json::from_str(&content)?;
                Ok(config)
            }
            Some("yaml") | Some("yml") => {
                let config: NearbyConfig = serde_yaml::from_str(&content)?;
                Ok(config)
            }
            Some("toml") => {
                let config: NearbyConfig = toml::from_str(&content)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", path.display()),
        }
    }

    /// Child values win wherever they differ from the defaults.
    fn merge_configs(mut parent: NearbyConfig, child: NearbyConfig) -> NearbyConfig {
        if child.max_cache_size != schema::default_max_cache_size() {
            parent.max_cache_size = child.max_cache_size;
        }
        if child.max_cache_age_secs != schema::default_max_cache_age_secs() {
            parent.max_cache_age_secs = child.max_cache_age_secs;
        }
        if child.stale_notification_timeout_secs != schema::default_stale_notification_timeout_secs() {
            parent.stale_notification_timeout_secs = child.stale_notification_timeout_secs;
        }
        if child.store_path != schema::default_store_path() {
            parent.store_path = child.store_path;
        }

        if child.resolver.endpoint != schema::default_endpoint() {
            parent.resolver.endpoint = child.resolver.endpoint;
        }
        if child.resolver.api_key.is_some() {
            parent.resolver.api_key = child.resolver.api_key;
        }
        if child.resolver.timeout_ms != schema::default_timeout_ms() {
            parent.resolver.timeout_ms = child.resolver.timeout_ms;
        }

        parent.extends = None;
        parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml_with_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nearby.toml");
        fs::write(&path, "max_cache_size = 5\n")?;

        let config = ConfigLoader::load(&path)?;
        assert_eq!(config.max_cache_size, 5);
        assert_eq!(config.max_cache_age_secs, 86_400);
        assert_eq!(config.resolver.timeout_ms, 10_000);
        Ok(())
    }

    #[test]
    fn test_inheritance_yaml_over_json() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join("base.json"),
            r#"{"store_path":"base.db","resolver":{"endpoint":"https://resolver.example/v1","api_key":"k"}}"#,
        )?;
        let child = dir.path().join("child.yaml");
        fs::write(&child, "extends: base.json\nmax_cache_age_secs: 60\n")?;

        let config = ConfigLoader::load(&child)?;
        assert_eq!(config.store_path, "base.db");
        assert_eq!(config.max_cache_age_secs, 60);
        assert_eq!(config.resolver.endpoint, "https://resolver.example/v1");
        assert_eq!(config.resolver.api_key.as_deref(), Some("k"));
        assert!(config.extends.is_none());
        Ok(())
    }

    #[test]
    fn test_circular_inheritance() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.toml"), "extends = \"b.toml\"\n")?;
        fs::write(dir.path().join("b.toml"), "extends = \"a.toml\"\n")?;

        let err = ConfigLoader::load(dir.path().join("a.toml")).unwrap_err();
        assert!(err.to_string().contains("Circular inheritance"));
        Ok(())
    }

    #[test]
    fn test_validation_rejects_zero_capacity() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"max_cache_size":0}"#)?;

        assert!(ConfigLoader::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_unsupported_extension() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.ini");
        fs::write(&path, "")?;

        assert!(ConfigLoader::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_defaults_are_valid() -> Result<()> {
        let config = ConfigLoader::load_or_default(None)?;
        assert_eq!(config.max_cache_size, 100);
        Ok(())
    }
}
