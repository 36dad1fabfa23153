use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 2;
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub music_roots: Vec<String>,
    /// Single-root form written by version 1 configs.
    #[serde(default, skip_serializing)]
    pub music_root: String,
    pub index_path: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,
    pub watch_music: bool,
    pub watch_debounce_secs: u64,
    /// 0 keeps every extracted picture.
    pub art_cache_max_entries: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            music_roots: Vec::new(),
            music_root: String::new(),
            index_path: "library.redb".to_string(),
            port: DEFAULT_PORT,
            bind_addr: None,
            watch_music: true,
            watch_debounce_secs: 2,
            art_cache_max_entries: 0,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("SOUNDSHELF_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Loads the config, writing defaults on first run and writing back any
/// migrated fields. Returns `true` when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let loaded: ServerConfig = serde_yaml::from_str(&contents)?;
        let config = migrate(loaded.clone());
        if config != loaded {
            save_config(path, &config)?;
        }
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

fn migrate(mut config: ServerConfig) -> ServerConfig {
    if config.version < CONFIG_VERSION {
        config.version = CONFIG_VERSION;
    }
    let legacy_root = config.music_root.trim().to_string();
    if !legacy_root.is_empty() && !config.music_roots.iter().any(|root| root.trim() == legacy_root) {
        config.music_roots.insert(0, legacy_root);
    }
    config.music_root.clear();
    if config.index_path.trim().is_empty() {
        config.index_path = "library.redb".to_string();
    }
    if config.port == 0 {
        if let Some(bind_addr) = config.bind_addr.as_deref() {
            if let Some(port) = parse_port(bind_addr) {
                config.port = port;
            }
        }
        if config.port == 0 {
            config.port = DEFAULT_PORT;
        }
    }
    if config.watch_debounce_secs == 0 {
        config.watch_debounce_secs = 2;
    }
    config.bind_addr = None;
    config
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

/// Non-empty roots resolved against the config directory.
pub fn resolve_music_roots(config_path: &Path, values: &[String]) -> Vec<PathBuf> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| resolve_path(config_path, value))
        .collect()
}

fn parse_port(value: &str) -> Option<u16> {
    let port = value.rsplit(':').next()?.trim();
    port.parse::<u16>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_default_config_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert_eq!(config, ServerConfig::default());
        assert!(path.exists());

        let (reloaded, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(reloaded.port, DEFAULT_PORT);
    }

    #[test]
    fn legacy_fields_are_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "version: 1\nmusic_root: /srv/music\nport: 0\nbind_addr: 0.0.0.0:8080\n",
        )
        .unwrap();
        let (config, _) = load_or_create_config(&path).unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.music_roots, vec!["/srv/music".to_string()]);
        assert_eq!(config.port, 8080);
        assert!(config.bind_addr.is_none());
        assert_eq!(config.index_path, "library.redb");

        let saved = fs::read_to_string(&path).unwrap();
        assert!(!saved.contains("music_root:"));
        assert!(!saved.contains("bind_addr"));
        let reloaded: ServerConfig = serde_yaml::from_str(&saved).unwrap();
        assert_eq!(reloaded.version, CONFIG_VERSION);
        assert_eq!(reloaded.music_roots, vec!["/srv/music".to_string()]);
        assert_eq!(reloaded.port, 8080);
    }

    #[test]
    fn current_config_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        let before = fs::read_to_string(&path).unwrap();

        let (reloaded, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(reloaded, config);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn relative_roots_resolve_against_config_dir() {
        let config_path = Path::new("/etc/soundshelf/config.yaml");
        let roots = resolve_music_roots(
            config_path,
            &["music".to_string(), " ".to_string(), "/abs".to_string()],
        );
        assert_eq!(
            roots,
            vec![PathBuf::from("/etc/soundshelf/music"), PathBuf::from("/abs")]
        );
    }
}
