//! Startup configuration surface: bind address, index root, and the default
//! source/bucket name, loadable from a TOML file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7878
}

fn default_source() -> String {
    "bloom".to_string()
}

/// Server startup configuration. Every field has a sensible default so a
/// config file is optional — CLI flags (see `main.rs`) override whatever a
/// loaded file sets.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Root directory the indexer wrote `<shard_id>/<column>.pickle` files
    /// under.
    pub index_root: PathBuf,

    /// Default `bloom_source` namespace new artifacts are discovered into.
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            index_root: PathBuf::from("./index"),
            source: default_source(),
        }
    }
}

/// Loads a `ServerConfig` from a TOML file, failing loudly since a requested
/// but unreadable config file is an operator error, not a soft fallback.
pub fn load_config(path: &Path) -> Result<ServerConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read config file {}: {e}", path.display()))?;
    toml::from_str(&text).map_err(|e| format!("failed to parse config file {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_index_root_given() {
        let cfg: ServerConfig = toml::from_str(r#"index_root = "/tmp/idx""#).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 7878);
        assert_eq!(cfg.source, "bloom");
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/does-not-exist.toml")).unwrap_err();
        assert!(err.contains("failed to read config file"));
    }
}
