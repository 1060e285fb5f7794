use std::path::{Path, PathBuf};

use super::types::{AppConfig, TransportConfig};

/// Get the default genbatch data directory: ~/.genbatch
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".genbatch"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.genbatch/config.toml (highest)
    let data_dir = get_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let mut cfg = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    // Fill the log directory under the data dir if not set
    if cfg.logging.file
        && cfg
            .logging
            .directory
            .as_deref()
            .map(str::trim)
            .map(str::is_empty)
            .unwrap_or(true)
    {
        cfg.logging.directory = Some(data_dir.join("logs").to_string_lossy().to_string());
    }

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)?;
    let cfg = toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
    Ok(cfg)
}

/// Environment variable overrides (Priority 0: highest).
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let TransportConfig::Http(ref mut http) = cfg.transport {
        if let Some(v) = get("GENBATCH_BASE_URL") {
            http.base_url = v;
        }
        if let Some(v) = get("GENBATCH_API_KEY") {
            http.api_key = v;
        }
    }

    if let Some(v) = get("GENBATCH_BATCH_CONCURRENCY") {
        match v.trim().parse::<usize>() {
            Ok(n) => cfg.batch.concurrency = n.max(1),
            Err(_) => tracing::warn!("ignoring invalid GENBATCH_BATCH_CONCURRENCY={}", v),
        }
    }

    if let Some(v) = get("GENBATCH_TIMEOUT_MS") {
        match v.trim().parse::<u64>() {
            Ok(ms) => cfg.generation.timeout_ms = ms,
            Err(_) => tracing::warn!("ignoring invalid GENBATCH_TIMEOUT_MS={}", v),
        }
    }
}
