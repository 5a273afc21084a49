use anyhow::{Context, Result};
use dynasession_core::SessionConfig;
use std::path::Path;

/// Settings from an optional TOML file, overlaid with the process environment.
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    load_config_with(path, |key| std::env::var(key).ok())
}

pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<SessionConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            SessionConfig::from_toml_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => SessionConfig::default(),
    };
    let config = base.merge_env(lookup)?;
    config.validate()?;
    Ok(config)
}

/// Command-line flags win over file and environment.
pub fn apply_gc_overrides(
    mut config: SessionConfig,
    max_age_secs: Option<u64>,
    max_stale_secs: Option<u64>,
    batch_size: Option<usize>,
) -> SessionConfig {
    if max_age_secs.is_some() {
        config.max_age_secs = max_age_secs;
    }
    if max_stale_secs.is_some() {
        config.max_stale_secs = max_stale_secs;
    }
    if let Some(batch_size) = batch_size {
        config.gc_batch_size = batch_size;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = load_config_with(None, env(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let path = std::env::temp_dir().join(format!("dynasession-cli-{}.toml", std::process::id()));
        std::fs::write(&path, "table_name = \"from_file\"\nmax_age_secs = 60\n").unwrap();

        let config =
            load_config_with(Some(&path), env(&[("DYNAMO_DB_SESSION_TABLE_NAME", "from_env")]))
                .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.table_name, "from_env");
        assert_eq!(config.max_age_secs, Some(60));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = load_config_with(Some(Path::new("/nonexistent/sessions.toml")), env(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sessions.toml"));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let err = load_config_with(None, env(&[("DYNAMO_DB_SESSION_GC_BATCH_SIZE", "0")]));
        assert!(err.is_err());
    }

    #[test]
    fn test_gc_flags_take_precedence() {
        let base = SessionConfig::default().with_max_age(std::time::Duration::from_secs(10));
        let config = apply_gc_overrides(base, None, Some(99), Some(5));
        assert_eq!(config.max_age_secs, Some(10));
        assert_eq!(config.max_stale_secs, Some(99));
        assert_eq!(config.gc_batch_size, 5);
    }
}
