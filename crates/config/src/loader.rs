use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::WahubConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["wahub.toml", "wahub.yaml", "wahub.yml", "wahub.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, config discovery only looks in
/// this directory (project-local and user-global paths are skipped).
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<WahubConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./wahub.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/wahub/wahub.{toml,yaml,yml,json}` (user-global)
///
/// Returns `WahubConfig::default()` if no config file is found or it fails to parse.
pub fn discover_and_load() -> WahubConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return WahubConfig::default();
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            WahubConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    if let Some(p) = first_existing(Path::new(".")) {
        return Some(p);
    }

    config_dir().and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/wahub/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("wahub"))
}

/// Returns the default data directory: `~/.wahub/`.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".wahub"))
        .unwrap_or_else(|| PathBuf::from(".wahub"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<WahubConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_supported_format() {
        let toml_cfg = parse_config("[server]\nport = 4000\n", Path::new("wahub.toml")).unwrap();
        assert_eq!(toml_cfg.server.port, 4000);

        let yaml_cfg =
            parse_config("login:\n  timeout_secs: 30\n", Path::new("wahub.yaml")).unwrap();
        assert_eq!(yaml_cfg.login.timeout_secs, 30);

        let json_cfg = parse_config(
            r#"{"whatsapp":{"sidecar_port":7000}}"#,
            Path::new("wahub.json"),
        )
        .unwrap();
        assert_eq!(json_cfg.whatsapp.sidecar_port, 7000);
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(parse_config("", Path::new("wahub.ini")).is_err());
    }

    #[test]
    fn load_config_applies_env_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wahub.toml");
        std::fs::write(
            &path,
            "[server]\napi_token = \"${WAHUB_LOADER_UNSET_TOKEN:-secret}\"\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn override_dir_is_searched_exclusively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wahub.yml"), "server:\n  port: 5555\n").unwrap();

        set_config_dir(dir.path().to_path_buf());
        let found = find_config_file();
        let cfg = discover_and_load();
        clear_config_dir();

        assert_eq!(found, Some(dir.path().join("wahub.yml")));
        assert_eq!(cfg.server.port, 5555);
    }
}
